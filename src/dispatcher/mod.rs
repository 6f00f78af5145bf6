mod dispatcher;
mod payload;

pub use dispatcher::Dispatcher;
