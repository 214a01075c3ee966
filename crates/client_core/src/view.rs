//! Root view state of a running session.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use shared::{
    domain::{ChangeType, SessionId},
    protocol::{Model, TaskNotice},
};
use tracing::{debug, error};

use crate::{
    app::AppContext,
    bus::BusMessage,
    controller::{ListenerHandle, SessionController},
    error::{Result, SessionError},
    notification::NotificationCenter,
};

pub trait ViewModel: Send + Sync {
    fn model(&self) -> &Model;

    fn key(&self) -> &str {
        &self.model().key
    }
}

pub type ViewModelRef = Arc<dyn ViewModel>;

/// View model that exposes the model as delivered by the server.
#[derive(Debug, Clone)]
pub struct PlainViewModel {
    model: Model,
}

impl PlainViewModel {
    pub fn new(model: Model) -> Self {
        Self { model }
    }
}

impl ViewModel for PlainViewModel {
    fn model(&self) -> &Model {
        &self.model
    }
}

/// Context handed to view model handlers.
#[derive(Clone)]
pub struct ViewContext {
    pub app: AppContext,
    pub session: SessionController,
}

/// Where a template is rendered; consulted by template handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingContext {
    pub parent_key: Option<String>,
    pub depth: usize,
}

pub struct SessionView {
    context: ViewContext,
    page: Arc<Mutex<Option<ViewModelRef>>>,
    changes: ListenerHandle,
}

impl SessionView {
    pub fn new(session_id: SessionId, app: &AppContext) -> Result<Self> {
        let session = SessionController::new(
            session_id,
            app.subscription_id.clone(),
            Arc::clone(&app.service),
            app.bus.clone(),
            app.event_handler.clone(),
        )?;
        let context = ViewContext {
            app: app.clone(),
            session,
        };

        let page = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&page);
        let listener_context = context.clone();
        // Updates are handled by the page view model itself.
        let changes = context.session.subscribe(move |kind, key, model| {
            let Some(model) = model.filter(|model| kind == ChangeType::Add && model.is_page())
            else {
                return;
            };
            match listener_context
                .app
                .model_factory
                .create_view_model(model, &listener_context)
            {
                Ok(view_model) => *slot.lock() = Some(view_model),
                Err(err) => error!(key, error = %err, "failed to build page view model"),
            }
        });

        Ok(Self {
            context,
            page,
            changes,
        })
    }

    /// Loads the session and builds the page view model. Announces the task
    /// when the page belongs to a persisted case.
    pub async fn init(&self) -> Result<()> {
        let session = &self.context.session;
        session.init().await?;
        let page_model = session.get_page().ok_or(SessionError::NoPage)?;
        let view_model = self
            .context
            .app
            .model_factory
            .create_view_model(&page_model, &self.context)?;
        *self.page.lock() = Some(view_model);

        if page_model.property("caseid").is_some() && page_model.property("persistencyid").is_some()
        {
            let details = match serde_json::to_value(&page_model)? {
                Value::Object(details) => details,
                _ => Default::default(),
            };
            debug!(session_id = %session.session_id(), "page belongs to a persisted task");
            self.context.app.bus.notify(BusMessage::TaskStarted(TaskNotice {
                session_id: Some(session.session_id().clone()),
                details,
            }));
        }
        Ok(())
    }

    pub fn page(&self) -> Option<ViewModelRef> {
        self.page.lock().clone()
    }

    pub fn session(&self) -> &SessionController {
        &self.context.session
    }

    pub fn dispose(&self) {
        self.context.session.dispose();
        self.changes.dispose();
    }
}

impl Drop for SessionView {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Everything the host renders: the notification center and the session.
pub struct AppModel {
    pub notifications: NotificationCenter,
    pub session: SessionView,
}

impl AppModel {
    pub fn dispose(&self) {
        self.session.dispose();
        self.notifications.dispose();
    }
}
