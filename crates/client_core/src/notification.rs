use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use shared::protocol::Notification;
use tracing::debug;

use crate::bus::{BusMessage, MessageBus, Subscription, Topic};

#[derive(Default)]
struct NotificationState {
    current: Option<Notification>,
    queue: VecDeque<Notification>,
}

/// Shows one error notification at a time; later ones wait in FIFO order
/// until the current one is acknowledged with [`NotificationCenter::handled`].
pub struct NotificationCenter {
    state: Arc<Mutex<NotificationState>>,
    subscription: Subscription,
}

impl NotificationCenter {
    pub fn new(bus: &MessageBus) -> Self {
        let state = Arc::new(Mutex::new(NotificationState::default()));
        let sink = Arc::clone(&state);
        let subscription = bus.subscribe(Topic::Error, move |message| {
            let BusMessage::Error(notification) = message else {
                return;
            };
            let mut state = sink.lock();
            if state.current.is_some() {
                state.queue.push_back(notification.clone());
                debug!(pending = state.queue.len(), "notification queued");
            } else {
                state.current = Some(notification.clone());
            }
        });
        Self {
            state,
            subscription,
        }
    }

    pub fn current(&self) -> Option<Notification> {
        self.state.lock().current.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn handled(&self) {
        let mut state = self.state.lock();
        state.current = state.queue.pop_front();
    }

    pub fn dispose(&self) {
        self.subscription.dispose();
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shows_notifications_one_at_a_time() {
        let bus = MessageBus::new();
        let center = NotificationCenter::new(&bus);
        let first = Notification::error("First", "one", true);
        let second = Notification::error("Second", "two", false);

        bus.notify(BusMessage::Error(first.clone()));
        bus.notify(BusMessage::Error(second.clone()));

        assert_eq!(center.current(), Some(first));
        assert_eq!(center.pending(), 1);
        center.handled();
        assert_eq!(center.current(), Some(second));
        center.handled();
        assert_eq!(center.current(), None);
        center.handled();
        assert_eq!(center.current(), None);
    }

    #[test]
    fn disposed_center_ignores_errors() {
        let bus = MessageBus::new();
        let center = NotificationCenter::new(&bus);
        center.dispose();

        bus.notify(BusMessage::Error(Notification::communication_failure()));

        assert_eq!(center.current(), None);
    }
}
