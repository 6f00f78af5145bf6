mod cache;
mod queue;
mod shutdown;

pub use cache::{FlightCache, MemCache};
pub use queue::{BroadcastQueue, Queue};
pub use shutdown::Shutdown;
