//! Composition root: wires the bus, services and factories for one session.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::{
    domain::{SessionId, SubscriptionId},
    protocol::OfflineTask,
};
use storage::{compose_key, Storage, OFFLINE_TASK_PREFIX};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    bus::{BusMessage, MessageBus},
    config::Configuration,
    error::{require, Result},
    factory::{ModelFactory, TemplateFactory},
    handler::EventHandler,
    navigation::Navigator,
    notification::NotificationCenter,
    service::SessionService,
    view::{AppModel, BindingContext, PlainViewModel, SessionView, ViewContext, ViewModelRef},
};

const DAY_MILLIS: f64 = 86_400_000.0;

/// Shared collaborators handed to every session component.
#[derive(Clone)]
pub struct AppContext {
    pub configuration: Arc<Configuration>,
    pub bus: MessageBus,
    pub event_handler: EventHandler,
    pub service: Arc<SessionService>,
    pub model_factory: Arc<ModelFactory<ViewModelRef, ViewContext>>,
    pub template_factory: Arc<TemplateFactory<ViewModelRef, BindingContext>>,
    pub subscription_id: SubscriptionId,
}

pub struct Application {
    session_id: SessionId,
    context: AppContext,
    app_model: Mutex<Option<Arc<AppModel>>>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl Application {
    pub fn new(
        session_id: SessionId,
        configuration: Configuration,
        storage: Arc<dyn Storage>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        require(session_id.as_str(), "sessionId")?;
        let bus = MessageBus::new();
        let service = SessionService::new(
            &configuration.base_uri,
            configuration.submit_lock,
            storage,
            navigator,
        )?;

        let model_factory: ModelFactory<ViewModelRef, ViewContext> = ModelFactory::new();
        model_factory.register(|model, _| {
            let view_model: ViewModelRef = Arc::new(PlainViewModel::new(model.clone()));
            Some(view_model)
        });

        let template_factory: TemplateFactory<ViewModelRef, BindingContext> =
            TemplateFactory::new();
        template_factory
            .register_model_handler(|view_model, _| Some(view_model.model().kind.as_str().to_string()));
        for root in &configuration.templates {
            let root = root.trim_end_matches('/').to_string();
            template_factory.register_model_handler(move |view_model, _| {
                Some(format!("{root}/{}", view_model.model().kind.as_str()))
            });
        }

        let context = AppContext {
            event_handler: EventHandler::new(bus.clone(), configuration.is_mobile),
            configuration: Arc::new(configuration),
            bus,
            service: Arc::new(service),
            model_factory: Arc::new(model_factory),
            template_factory: Arc::new(template_factory),
            // The main session doubles as the subscription.
            subscription_id: SubscriptionId::new(session_id.as_str()),
        };

        Ok(Self {
            session_id,
            context,
            app_model: Mutex::new(None),
            keep_alive: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn app_model(&self) -> Option<Arc<AppModel>> {
        self.app_model.lock().clone()
    }

    /// Creates the subscription, builds the view state and loads the session.
    /// Starts the keep-alive timer once the session is up.
    pub async fn start(&self) -> Result<Arc<AppModel>> {
        self.context
            .service
            .create_subscription(&self.context.subscription_id)
            .await?;

        let app_model = Arc::new(AppModel {
            notifications: NotificationCenter::new(&self.context.bus),
            session: SessionView::new(self.session_id.clone(), &self.context)?,
        });
        if let Err(err) = app_model.session.init().await {
            app_model.dispose();
            return Err(err);
        }

        if let Some(previous) = self.app_model.lock().replace(Arc::clone(&app_model)) {
            previous.dispose();
        }
        self.spawn_keep_alive();
        info!(session_id = %self.session_id, "application started");
        Ok(app_model)
    }

    /// Offline mode: no network traffic, only the cached task list.
    pub async fn start_offline(&self) -> Result<Vec<OfflineTask>> {
        let tasks = self.offline_tasks().await?;
        info!(session_id = %self.session_id, tasks = tasks.len(), "application started offline");
        Ok(tasks)
    }

    /// Publishes `logout` and tears down the running session.
    pub fn exit(&self) {
        self.context.bus.notify(BusMessage::Logout);
        if let Some(timer) = self.keep_alive.lock().take() {
            timer.abort();
        }
        if let Some(app_model) = self.app_model.lock().take() {
            app_model.dispose();
        }
        info!(session_id = %self.session_id, "application exited");
    }

    pub async fn still_alive(&self) -> bool {
        match self.context.service.keep_alive(&self.session_id).await {
            Ok(()) => true,
            Err(err) => {
                debug!(session_id = %self.session_id, error = %err, "session no longer alive");
                false
            }
        }
    }

    /// Removes cached offline tasks whose age, rounded up to whole days,
    /// exceeds `number_of_days`. Returns how many were removed.
    pub async fn clear_expired_tasks(&self, number_of_days: i64) -> Result<usize> {
        self.clear_tasks_older_than(number_of_days, Utc::now()).await
    }

    async fn clear_tasks_older_than(&self, number_of_days: i64, now: DateTime<Utc>) -> Result<usize> {
        let storage = self.context.service.storage();
        let mut removed = 0;
        for task in self.offline_tasks().await? {
            let Some(created_on) = task.created_on else {
                continue;
            };
            let age_days = ((now - created_on).num_milliseconds() as f64 / DAY_MILLIS).ceil() as i64;
            if age_days <= number_of_days {
                continue;
            }
            let key = compose_key(
                Some(OFFLINE_TASK_PREFIX),
                task.case_id,
                task.persistency_id.as_deref(),
            )?;
            storage.remove(&key).await?;
            debug!(%key, age_days, "expired offline task removed");
            removed += 1;
        }
        if removed > 0 {
            info!(removed, number_of_days, "expired offline tasks cleared");
        }
        Ok(removed)
    }

    async fn offline_tasks(&self) -> Result<Vec<OfflineTask>> {
        let cached = self
            .context
            .service
            .storage()
            .get_all(Some(OFFLINE_TASK_PREFIX))
            .await?;
        let tasks = cached
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<OfflineTask>(value) {
                Ok(task) => Some(task),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable offline task");
                    None
                }
            })
            .collect();
        Ok(tasks)
    }

    fn spawn_keep_alive(&self) {
        let period = Duration::from_secs(
            self.context
                .configuration
                .session_timeout_secs
                .saturating_sub(1)
                .max(1),
        );
        let bus = self.context.bus.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                debug!("keep alive tick");
                bus.notify(BusMessage::KeepAlive);
            }
        });
        if let Some(previous) = self.keep_alive.lock().replace(timer) {
            previous.abort();
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        if let Some(timer) = self.keep_alive.lock().take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/app_tests.rs"]
mod tests;
