use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{ChangeType, ModelKind, SessionId},
    error::ProtocolError,
};

/// Locale settings delivered with a subscription (date patterns, decimal
/// separators and so on). Kept as an open JSON object.
pub type Language = Map<String, Value>;

/// A server-defined UI element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Model {
    pub fn new(key: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            key: key.into(),
            kind,
            properties: Map::new(),
            values: None,
            extra: Map::new(),
        }
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn is_page(&self) -> bool {
        self.kind == ModelKind::Page
    }

    pub fn is_field(&self) -> bool {
        self.kind == ModelKind::Field
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Model>,
}

impl Change {
    pub fn add(model: Model) -> Self {
        Self {
            kind: ChangeType::Add,
            key: model.key.clone(),
            model: Some(model),
        }
    }

    pub fn update(model: Model) -> Self {
        Self {
            kind: ChangeType::Update,
            key: model.key.clone(),
            model: Some(model),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: ChangeType::Delete,
            key: key.into(),
            model: None,
        }
    }
}

/// Ordered model mutations pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    /// Every add/update must carry the model that replaces the old one.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for change in &self.changes {
            if change.key.is_empty() {
                return Err(ProtocolError::MissingKey);
            }
            if change.kind != ChangeType::Delete && change.model.is_none() {
                return Err(ProtocolError::MissingModel {
                    key: change.key.clone(),
                    kind: change.kind,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

/// Client-to-server payload describing a user action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    #[serde(default)]
    pub elements: Vec<Model>,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// Body of an event-producing call. Entries stay raw so one malformed event
/// cannot hide the others; decode them with [`EventsResponse::into_events`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub events: Vec<Value>,
}

impl EventsResponse {
    /// Decodes every entry on its own, in server order.
    pub fn into_events(self) -> impl Iterator<Item = Result<ServerEvent, serde_json::Error>> {
        self.events.into_iter().map(serde_json::from_value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    Project(ProjectSwitch),
    Page(PageUpdate),
    TaskStarted(TaskNotice),
    TaskFinished(TaskNotice),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdate {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSwitch {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub new_session_id: SessionId,
    #[serde(default)]
    pub new_tab: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSessionResponse {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepareOfflineResponse {
    #[serde(default)]
    pub elements: Option<Vec<Value>>,
    #[serde(default)]
    pub language: Option<Language>,
}

/// A task cached on the device for offline execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineTask {
    #[serde(default)]
    pub case_id: Option<i64>,
    #[serde(default)]
    pub persistency_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
}

impl OfflineTask {
    /// Merges the prepare-offline response into the task and stamps the
    /// creation time.
    pub fn compose(mut self, response: PrepareOfflineResponse, now: DateTime<Utc>) -> Self {
        if let Some(elements) = response.elements {
            self.elements = Some(elements);
        }
        if let Some(language) = response.language {
            self.language = Some(language);
        }
        self.created_on = Some(now);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Error,
    Warning,
    Info,
}

/// User-facing message published on the `error` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub blocking: bool,
}

impl Notification {
    pub fn error(title: impl Into<String>, message: impl Into<String>, blocking: bool) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: title.into(),
            message: message.into(),
            blocking,
        }
    }

    pub fn communication_failure() -> Self {
        Self::error("Application Exception", "Server communication failed", true)
    }
}
