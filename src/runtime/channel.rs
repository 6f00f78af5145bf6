use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use globset::{Glob, GlobMatcher};

use crate::{
    Result, ShareLock,
    common::{BroadcastQueue, Shutdown},
    events::{Event, Message},
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        let handlers = $handles.read().unwrap();
        for handle in handlers.iter() {
            (handle)($(&$item),+);
        }
    };
}

macro_rules! dispatch_event_async {
    ($handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        tokio::spawn(async move {
            let handlers = handles.read().unwrap().clone();
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 4096;

pub type MigrationEventHandle = Arc<dyn Fn(&Event<Message>) + Send + Sync>;
pub type MigrationEventHandleAsync = Arc<dyn Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// use the glob pattern to match the run id
    /// eg. run1*
    pub run_id: String,

    /// use the glob pattern to match the object type of the stage
    /// eg. Account*
    pub object_type: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            run_id: "*".to_string(),
            object_type: "*".to_string(),
        }
    }
}

impl ChannelOptions {
    pub fn with_run_id(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_object_type(object_type: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            ..Default::default()
        }
    }
}

/// Broadcast channel of migration progress events.
#[derive(Clone)]
pub struct Channel {
    event_queue: Arc<BroadcastQueue<Event<Message>>>,

    events: ShareLock<Vec<MigrationEventHandle>>,
    events_async: ShareLock<Vec<MigrationEventHandleAsync>>,

    listening: Arc<AtomicBool>,
    shutdown: Arc<Shutdown>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    pub fn new() -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            listening: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub(crate) fn emit(
        &self,
        message: Message,
    ) {
        self.event_queue.send(Event::new(&message));
    }

    /// Raw event stream, independent of registered handlers.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event<Message>> {
        self.event_queue.subscribe()
    }

    /// Start dispatching events to registered handlers. Must run inside a tokio runtime.
    pub(crate) fn listen(&self) {
        if self.listening.swap(true, Ordering::Relaxed) {
            return;
        }

        let mut event_queue = self.event_queue.subscribe();
        let events = self.events.clone();
        let events_async = self.events_async.clone();

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(events_async, &e);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

/// Handler registration on a [`Channel`], filtered by run id and object type.
#[derive(Clone)]
pub struct ChannelEvent {
    channel: Arc<Channel>,

    glob: (GlobMatcher, GlobMatcher),
}

impl ChannelEvent {
    pub fn channel(
        channel: Arc<Channel>,
        options: ChannelOptions,
    ) -> Result<Self> {
        Ok(Self {
            channel,
            glob: (Glob::new(&options.run_id)?.compile_matcher(), Glob::new(&options.object_type)?.compile_matcher()),
        })
    }

    /// Called once per run with its final status.
    pub fn on_finished(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let run_glob = self.glob.0.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if e.event.is_finished() && run_glob.is_match(&e.run_id) {
                f(e);
            }
        }));
    }

    /// Failed creates and failed deferred updates.
    pub fn on_failure(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if e.event.is_failure() && is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        self.channel.events_async.write().unwrap().push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e)
            } else {
                Box::pin(async {})
            }
        }));
    }
}

/// Run-level events carry no object type and pass any object type filter.
fn is_match(
    glob: &(GlobMatcher, GlobMatcher),
    e: &Event<Message>,
) -> bool {
    let (pat_run, pat_object) = glob;
    pat_run.is_match(&e.run_id) && (e.object_type.is_empty() || pat_object.is_match(&e.object_type))
}
