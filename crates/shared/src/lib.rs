pub mod domain;
pub mod error;
pub mod protocol;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        domain::{ChangeType, ModelKind},
        error::ProtocolError,
        protocol::{Change, ChangeSet, EventsResponse, Model, PageEvent, ServerEvent},
    };

    #[test]
    fn decodes_known_and_unknown_server_events() {
        let raw = json!({
            "events": [
                {"type": "page", "sessionId": "s1", "csrfToken": "t2",
                 "changes": {"changes": [{"type": "delete", "key": "f1"}]}},
                {"type": "project", "sessionId": "s1", "newSessionId": "s2", "newTab": true},
                {"type": "taskStarted", "sessionId": "s1", "caseid": 4},
                {"type": "somethingNew", "sessionId": "s1"}
            ]
        });

        let response: EventsResponse = serde_json::from_value(raw).expect("decode");
        let events: Vec<ServerEvent> = response
            .into_events()
            .collect::<Result<_, _>>()
            .expect("decode events");
        assert_eq!(events.len(), 4);
        match &events[0] {
            ServerEvent::Page(update) => {
                assert_eq!(update.csrf_token.as_deref(), Some("t2"));
                let changes = update.changes.as_ref().expect("changes");
                assert_eq!(changes.changes[0].kind, ChangeType::Delete);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[1] {
            ServerEvent::Project(switch) => {
                assert_eq!(switch.new_session_id.as_str(), "s2");
                assert!(switch.new_tab);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[2] {
            ServerEvent::TaskStarted(notice) => {
                assert_eq!(notice.details.get("caseid"), Some(&json!(4)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(events[3], ServerEvent::Unknown);
    }

    #[test]
    fn malformed_event_does_not_hide_its_neighbours() {
        let response: EventsResponse = serde_json::from_value(json!({
            "events": [
                {"type": "page", "sessionId": "s1",
                 "changes": {"changes": [{"type": "delete", "key": "f1"}]}},
                {"type": "project", "sessionId": "s1"}
            ]
        }))
        .expect("decode");

        let events: Vec<_> = response.into_events().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(ServerEvent::Page(_))));
        assert!(events[1].is_err());
    }

    #[test]
    fn keeps_unknown_model_kinds_and_members() {
        let model: Model = serde_json::from_value(json!({
            "key": "w1",
            "type": "piechart",
            "name": "Chart",
            "values": ["1"]
        }))
        .expect("decode");

        assert_eq!(model.kind, ModelKind::Other("piechart".to_string()));
        assert_eq!(model.extra.get("name"), Some(&json!("Chart")));

        let encoded = serde_json::to_value(&model).expect("encode");
        assert_eq!(encoded["type"], json!("piechart"));
        assert_eq!(encoded["name"], json!("Chart"));
    }

    #[test]
    fn change_set_without_model_is_rejected() {
        let changes = ChangeSet::new(vec![
            Change::add(Model::new("p1", ModelKind::Page)),
            Change {
                kind: ChangeType::Update,
                key: "f1".to_string(),
                model: None,
            },
        ]);

        assert_eq!(
            changes.validate(),
            Err(ProtocolError::MissingModel {
                key: "f1".to_string(),
                kind: ChangeType::Update,
            })
        );
    }

    #[test]
    fn empty_page_event_serializes_to_empty_object() {
        let encoded = serde_json::to_value(PageEvent::default()).expect("encode");
        assert_eq!(encoded, json!({}));
    }
}
