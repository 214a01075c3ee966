use shared::protocol::{Notification, ServerEvent};
use tracing::{debug, warn};

use crate::{
    bus::{BusMessage, MessageBus},
    error::SessionError,
    service::Outcome,
};

/// Routes the outcome of a server call onto the message bus.
#[derive(Clone)]
pub struct EventHandler {
    bus: MessageBus,
    is_mobile: bool,
}

impl EventHandler {
    pub fn new(bus: MessageBus, is_mobile: bool) -> Self {
        Self { bus, is_mobile }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn handle_events(&self, outcome: Outcome) {
        let response = match outcome {
            Ok(response) => response,
            Err(err) => return self.report(err),
        };

        for (index, event) in response.into_events().enumerate() {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!(index, error = %err, "skipping malformed server event");
                    continue;
                }
            };
            let message = match event {
                ServerEvent::Project(switch) => BusMessage::Project(switch),
                ServerEvent::Page(update) => BusMessage::Page(update),
                ServerEvent::TaskStarted(notice) => BusMessage::TaskStarted(notice),
                ServerEvent::TaskFinished(notice) => BusMessage::TaskFinished(notice),
                ServerEvent::Unknown => {
                    debug!("ignoring server event of unknown type");
                    continue;
                }
            };
            self.bus.notify(message);
        }
    }

    fn report(&self, err: SessionError) {
        match err {
            SessionError::Server { .. } if self.is_mobile => {
                warn!(error = %err, "server reported an error");
                self.bus.notify(BusMessage::MobileError);
            }
            SessionError::Server {
                error_type,
                title,
                message,
            } => {
                warn!(%error_type, %title, "server reported an error");
                self.bus
                    .notify(BusMessage::Error(Notification::error(title, message, true)));
            }
            other => {
                warn!(error = %other, "server communication failed");
                self.bus
                    .notify(BusMessage::Error(Notification::communication_failure()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;
    use shared::protocol::EventsResponse;

    use super::*;
    use crate::bus::Topic;

    fn record_all(bus: &MessageBus) -> Arc<Mutex<Vec<BusMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for topic in [
            Topic::Page,
            Topic::Project,
            Topic::TaskStarted,
            Topic::TaskFinished,
            Topic::Error,
            Topic::MobileError,
        ] {
            let seen = Arc::clone(&seen);
            bus.subscribe(topic, move |message| seen.lock().push(message.clone()));
        }
        seen
    }

    fn response(events: serde_json::Value) -> EventsResponse {
        serde_json::from_value(json!({ "events": events })).expect("events response")
    }

    #[test]
    fn fans_out_events_in_order_and_drops_unknown_types() {
        let bus = MessageBus::new();
        let seen = record_all(&bus);
        let handler = EventHandler::new(bus, false);

        handler.handle_events(Ok(response(json!([
            {"type": "taskStarted", "sessionId": "S1"},
            {"type": "bogus", "sessionId": "S1"},
            {"type": "page", "sessionId": "S1", "changes": {"changes": []}},
            {"type": "project", "sessionId": "S1", "newSessionId": "S2", "newTab": true}
        ]))));

        let topics: Vec<_> = seen.lock().iter().map(BusMessage::topic).collect();
        assert_eq!(topics, vec![Topic::TaskStarted, Topic::Page, Topic::Project]);
    }

    #[test]
    fn malformed_event_is_skipped_without_losing_the_rest() {
        let bus = MessageBus::new();
        let seen = record_all(&bus);
        let handler = EventHandler::new(bus, false);

        handler.handle_events(Ok(response(json!([
            {"type": "project", "sessionId": "S1"},
            {"type": "page", "sessionId": "S1", "csrfToken": "T2",
             "changes": {"changes": [{"type": "delete", "key": "F1"}]}},
            {"type": "page", "sessionId": "S1",
             "changes": {"changes": [{"type": "add", "key": "F2", "model": {"key": "F2"}}]}}
        ]))));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let BusMessage::Page(update) = &seen[0] else {
            panic!("unexpected message: {:?}", seen[0]);
        };
        assert_eq!(update.csrf_token.as_deref(), Some("T2"));
    }

    #[test]
    fn empty_response_publishes_nothing() {
        let bus = MessageBus::new();
        let seen = record_all(&bus);
        EventHandler::new(bus, false).handle_events(Ok(EventsResponse::default()));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn transport_failure_publishes_generic_notification() {
        let bus = MessageBus::new();
        let seen = record_all(&bus);
        EventHandler::new(bus, false)
            .handle_events(Err(SessionError::MissingArgument("csrfToken")));

        assert_eq!(
            *seen.lock(),
            vec![BusMessage::Error(Notification::communication_failure())]
        );
    }

    #[test]
    fn server_error_uses_reported_text() {
        let bus = MessageBus::new();
        let seen = record_all(&bus);
        EventHandler::new(bus, false).handle_events(Err(SessionError::Server {
            error_type: "UNKNOWN_SESSION".to_string(),
            title: "Session expired".to_string(),
            message: "Please log in again".to_string(),
        }));

        assert_eq!(
            *seen.lock(),
            vec![BusMessage::Error(Notification::error(
                "Session expired",
                "Please log in again",
                true
            ))]
        );
    }

    #[test]
    fn server_error_on_mobile_publishes_mobile_error() {
        let bus = MessageBus::new();
        let seen = record_all(&bus);
        EventHandler::new(bus, true).handle_events(Err(SessionError::Server {
            error_type: "UNKNOWN_SESSION".to_string(),
            title: String::new(),
            message: String::new(),
        }));

        assert_eq!(*seen.lock(), vec![BusMessage::MobileError]);
    }
}
