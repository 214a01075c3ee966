use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(SubscriptionId);

/// Element kind carried in the `type` member of a server model.
///
/// The set is open: kinds this client has no special handling for are kept
/// verbatim in [`ModelKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelKind {
    Page,
    Field,
    Container,
    Button,
    TextItem,
    Asset,
    Link,
    Image,
    FailedElement,
    Other(String),
}

impl ModelKind {
    pub fn as_str(&self) -> &str {
        match self {
            ModelKind::Page => "page",
            ModelKind::Field => "field",
            ModelKind::Container => "container",
            ModelKind::Button => "button",
            ModelKind::TextItem => "textitem",
            ModelKind::Asset => "asset",
            ModelKind::Link => "link",
            ModelKind::Image => "image",
            ModelKind::FailedElement => "failedelement",
            ModelKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ModelKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "page" => ModelKind::Page,
            "field" => ModelKind::Field,
            "container" => ModelKind::Container,
            "button" => ModelKind::Button,
            "textitem" => ModelKind::TextItem,
            "asset" => ModelKind::Asset,
            "link" => ModelKind::Link,
            "image" => ModelKind::Image,
            "failedelement" => ModelKind::FailedElement,
            _ => ModelKind::Other(value),
        }
    }
}

impl From<ModelKind> for String {
    fn from(value: ModelKind) -> Self {
        match value {
            ModelKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

/// What the offline button of a task should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Prepare,
    Delete,
    Executed,
}

impl ButtonAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ButtonAction::Prepare => "prepare",
            ButtonAction::Delete => "delete",
            ButtonAction::Executed => "executed",
        }
    }

    /// CSS class the view uses for a button in this state.
    pub fn button_class(self) -> &'static str {
        match self {
            ButtonAction::Prepare => "offline-available-button",
            ButtonAction::Delete => "offline-delete-button",
            ButtonAction::Executed => "offline-delete-executed-button",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "prepare" => Some(ButtonAction::Prepare),
            "delete" => Some(ButtonAction::Delete),
            "executed" => Some(ButtonAction::Executed),
            _ => None,
        }
    }
}
