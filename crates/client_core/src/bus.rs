//! In-process publish/subscribe hub shared by every session component.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use shared::protocol::{Notification, PageUpdate, ProjectSwitch, TaskNotice};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Page,
    Project,
    TaskStarted,
    TaskFinished,
    Error,
    MobileError,
    KeepAlive,
    BeforeSubmit,
    AfterSubmit,
    Logout,
}

impl Topic {
    pub fn name(self) -> &'static str {
        match self {
            Topic::Page => "page",
            Topic::Project => "project",
            Topic::TaskStarted => "taskStarted",
            Topic::TaskFinished => "taskFinished",
            Topic::Error => "error",
            Topic::MobileError => "mobile.error",
            Topic::KeepAlive => "keepAlive",
            Topic::BeforeSubmit => "beforeSubmit",
            Topic::AfterSubmit => "afterSubmit",
            Topic::Logout => "logout",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Page(PageUpdate),
    Project(ProjectSwitch),
    TaskStarted(TaskNotice),
    TaskFinished(TaskNotice),
    Error(Notification),
    MobileError,
    KeepAlive,
    BeforeSubmit,
    AfterSubmit,
    Logout,
}

impl BusMessage {
    pub fn topic(&self) -> Topic {
        match self {
            BusMessage::Page(_) => Topic::Page,
            BusMessage::Project(_) => Topic::Project,
            BusMessage::TaskStarted(_) => Topic::TaskStarted,
            BusMessage::TaskFinished(_) => Topic::TaskFinished,
            BusMessage::Error(_) => Topic::Error,
            BusMessage::MobileError => Topic::MobileError,
            BusMessage::KeepAlive => Topic::KeepAlive,
            BusMessage::BeforeSubmit => Topic::BeforeSubmit,
            BusMessage::AfterSubmit => Topic::AfterSubmit,
            BusMessage::Logout => Topic::Logout,
        }
    }
}

type Callback = Arc<dyn Fn(&BusMessage) + Send + Sync>;

struct Listener {
    topic: Topic,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Listeners are invoked synchronously, in subscription order, on the
/// thread that calls [`MessageBus::notify`]. No lock is held while a
/// callback runs, so callbacks may subscribe, dispose or notify again.
#[derive(Clone, Default)]
pub struct MessageBus {
    registry: Arc<Mutex<Registry>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.insert(
            id,
            Listener {
                topic,
                callback: Arc::new(callback),
            },
        );
        trace!(topic = topic.name(), listener_id = id, "bus: subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn notify(&self, message: BusMessage) {
        let topic = message.topic();
        let targets: Vec<(u64, Callback)> = {
            let registry = self.registry.lock();
            registry
                .listeners
                .iter()
                .filter(|(_, listener)| listener.topic == topic)
                .map(|(id, listener)| (*id, Arc::clone(&listener.callback)))
                .collect()
        };
        trace!(
            topic = topic.name(),
            listeners = targets.len(),
            "bus: notify"
        );

        for (id, callback) in targets {
            // Skip listeners disposed by an earlier callback of this notify.
            if !self.registry.lock().listeners.contains_key(&id) {
                continue;
            }
            callback(&message);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

/// Handle returned by [`MessageBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes this registration. Calling it again is a no-op.
    pub fn dispose(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.lock().listeners.remove(&self.id).is_some() {
                trace!(listener_id = self.id, "bus: disposed");
            }
        }
    }
}
