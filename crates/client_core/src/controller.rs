//! Per-session model store and orchestration of server round trips.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Weak},
};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use shared::{
    domain::{ButtonAction, ChangeType, SessionId, SubscriptionId},
    protocol::{ChangeSet, FieldValue, Language, Model, OfflineTask, PageEvent},
};
use tracing::{debug, error, info, warn};

use crate::{
    bus::{BusMessage, MessageBus, Subscription, Topic},
    error::{require, Result, SessionError},
    handler::EventHandler,
    service::{Outcome, SessionService, Submission},
};

/// Called for every applied change: `(kind, key, model)`. `model` is `None`
/// for deletions.
pub type ChangeListener = Arc<dyn Fn(ChangeType, &str, Option<&Model>) + Send + Sync>;
/// Called for changes to a single model key.
pub type ModelListener = Arc<dyn Fn(ChangeType, Option<&Model>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Active,
    Disposed,
}

impl SessionStatus {
    fn describe(self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "already initialized",
            SessionStatus::Disposed => "disposed",
        }
    }
}

struct ControllerState {
    status: SessionStatus,
    models: IndexMap<String, Model>,
    csrf_token: Option<String>,
    language: Language,
    keep_alive: bool,
    next_listener_id: u64,
    listeners: BTreeMap<u64, ChangeListener>,
    model_listeners: HashMap<String, BTreeMap<u64, ModelListener>>,
    bus_subscriptions: Vec<Subscription>,
    applying: bool,
    deferred: VecDeque<ChangeSet>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            models: IndexMap::new(),
            csrf_token: None,
            language: Language::new(),
            keep_alive: true,
            next_listener_id: 0,
            listeners: BTreeMap::new(),
            model_listeners: HashMap::new(),
            bus_subscriptions: Vec::new(),
            applying: false,
            deferred: VecDeque::new(),
        }
    }
}

struct ControllerInner {
    session_id: SessionId,
    subscription_id: SubscriptionId,
    service: Arc<SessionService>,
    bus: MessageBus,
    event_handler: EventHandler,
    state: Mutex<ControllerState>,
}

impl ControllerInner {
    fn is_disposed(&self) -> bool {
        self.state.lock().status == SessionStatus::Disposed
    }
}

/// Owns the model snapshot of one server session. Cloning yields another
/// handle to the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(
        session_id: SessionId,
        subscription_id: SubscriptionId,
        service: Arc<SessionService>,
        bus: MessageBus,
        event_handler: EventHandler,
    ) -> Result<Self> {
        require(session_id.as_str(), "sessionId")?;
        require(subscription_id.as_str(), "subscriptionId")?;
        Ok(Self {
            inner: Arc::new(ControllerInner {
                session_id,
                subscription_id,
                service,
                bus,
                event_handler,
                state: Mutex::new(ControllerState::default()),
            }),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.inner.subscription_id
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.inner.state.lock().csrf_token.clone()
    }

    pub fn language(&self) -> Language {
        self.inner.state.lock().language.clone()
    }

    pub fn keep_alive_enabled(&self) -> bool {
        self.inner.state.lock().keep_alive
    }

    /// Registers on the bus and loads the initial model snapshot.
    pub async fn init(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.status != SessionStatus::Uninitialized {
                return Err(SessionError::InvalidState(state.status.describe()));
            }
            state.status = SessionStatus::Initializing;
        }
        let subscriptions = self.register_bus_listeners();
        {
            let mut state = self.inner.state.lock();
            if state.status == SessionStatus::Disposed {
                drop(state);
                subscriptions.iter().for_each(Subscription::dispose);
                return Ok(());
            }
            state.bus_subscriptions = subscriptions;
        }

        let snapshot = match self
            .inner
            .service
            .subscribe(&self.inner.subscription_id, &self.inner.session_id)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let subscriptions = {
                    let mut state = self.inner.state.lock();
                    if state.status == SessionStatus::Initializing {
                        state.status = SessionStatus::Uninitialized;
                    }
                    std::mem::take(&mut state.bus_subscriptions)
                };
                subscriptions.iter().for_each(Subscription::dispose);
                return Err(err);
            }
        };

        let mut state = self.inner.state.lock();
        if state.status == SessionStatus::Disposed {
            debug!(session_id = %self.inner.session_id, "discarding snapshot of disposed session");
            return Ok(());
        }
        state.language = snapshot.language;
        state.csrf_token = snapshot.csrf_token;
        for model in snapshot.elements {
            state.models.insert(model.key.clone(), model);
        }
        state.status = SessionStatus::Active;
        info!(
            session_id = %self.inner.session_id,
            models = state.models.len(),
            "session initialized"
        );
        Ok(())
    }

    /// Releases every bus registration and listener. Safe to call repeatedly
    /// and before `init`.
    pub fn dispose(&self) {
        let subscriptions = {
            let mut state = self.inner.state.lock();
            if state.status == SessionStatus::Disposed {
                return;
            }
            state.status = SessionStatus::Disposed;
            state.listeners.clear();
            state.model_listeners.clear();
            state.deferred.clear();
            std::mem::take(&mut state.bus_subscriptions)
        };
        subscriptions.iter().for_each(Subscription::dispose);
        info!(session_id = %self.inner.session_id, "session disposed");
    }

    pub fn get_model(&self, key: &str) -> Result<Option<Model>> {
        require(key, "key")?;
        Ok(self.inner.state.lock().models.get(key).cloned())
    }

    /// First page model in server order.
    pub fn get_page(&self) -> Option<Model> {
        self.inner
            .state
            .lock()
            .models
            .values()
            .find(|model| model.is_page())
            .cloned()
    }

    pub fn models(&self) -> Vec<Model> {
        self.inner.state.lock().models.values().cloned().collect()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(ChangeType, &str, Option<&Model>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        state.next_listener_id += 1;
        let id = state.next_listener_id;
        state.listeners.insert(id, Arc::new(listener));
        ListenerHandle {
            id,
            key: None,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Listens for changes of one model. The registration is dropped
    /// automatically once that model is deleted.
    pub fn subscribe_model<F>(&self, key: &str, listener: F) -> Result<ListenerHandle>
    where
        F: Fn(ChangeType, Option<&Model>) + Send + Sync + 'static,
    {
        require(key, "key")?;
        let mut state = self.inner.state.lock();
        state.next_listener_id += 1;
        let id = state.next_listener_id;
        state
            .model_listeners
            .entry(key.to_string())
            .or_default()
            .insert(id, Arc::new(listener));
        Ok(ListenerHandle {
            id,
            key: Some(key.to_string()),
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Applies a change set to the model store, then notifies global
    /// listeners followed by the listeners of the changed key. A change set
    /// arriving from inside a listener is applied after the current one.
    pub fn handle_changes(&self, changes: ChangeSet) -> Result<()> {
        changes.validate()?;
        {
            let mut state = self.inner.state.lock();
            if state.status == SessionStatus::Disposed {
                debug!(session_id = %self.inner.session_id, "ignoring changes for disposed session");
                return Ok(());
            }
            if state.applying {
                debug!(
                    session_id = %self.inner.session_id,
                    changes = changes.changes.len(),
                    "deferring nested change set"
                );
                state.deferred.push_back(changes);
                return Ok(());
            }
            state.applying = true;
        }

        let _reset = ApplyingReset {
            inner: &self.inner,
        };
        let mut next = Some(changes);
        while let Some(changes) = next {
            self.apply(changes);
            next = {
                let mut state = self.inner.state.lock();
                let deferred = state.deferred.pop_front();
                if deferred.is_none() {
                    state.applying = false;
                }
                deferred
            };
        }
        Ok(())
    }

    fn apply(&self, changes: ChangeSet) {
        {
            let mut state = self.inner.state.lock();
            for change in &changes.changes {
                match (change.kind, &change.model) {
                    (ChangeType::Delete, _) => {
                        state.models.shift_remove(&change.key);
                    }
                    (_, Some(model)) => {
                        state.models.insert(change.key.clone(), model.clone());
                    }
                    (_, None) => {}
                }
            }
        }
        debug!(
            session_id = %self.inner.session_id,
            changes = changes.changes.len(),
            "applied change set"
        );

        for change in &changes.changes {
            let (listeners, model_listeners) = {
                let mut state = self.inner.state.lock();
                let listeners: Vec<ChangeListener> = state.listeners.values().cloned().collect();
                let model_listeners: Vec<ModelListener> = if change.kind == ChangeType::Delete {
                    state
                        .model_listeners
                        .remove(&change.key)
                        .map(|registered| registered.into_values().collect())
                        .unwrap_or_default()
                } else {
                    state
                        .model_listeners
                        .get(&change.key)
                        .map(|registered| registered.values().cloned().collect())
                        .unwrap_or_default()
                };
                (listeners, model_listeners)
            };

            let model = change.model.as_ref();
            for listener in listeners {
                listener(change.kind, &change.key, model);
            }
            for listener in model_listeners {
                listener(change.kind, model);
            }
        }
    }

    /// Page event carrying the current value of every field model.
    pub fn create_page_event(&self, element_key: Option<&str>, parameters: Option<Value>) -> PageEvent {
        let fields = self
            .inner
            .state
            .lock()
            .models
            .values()
            .filter(|model| model.is_field())
            .map(|model| FieldValue {
                key: model.key.clone(),
                values: model.values.clone(),
            })
            .collect();
        PageEvent {
            element_key: element_key.map(str::to_string),
            parameters,
            fields,
        }
    }

    /// Submits the field values together with the triggering element.
    /// `callback` receives whether the round trip succeeded.
    pub fn submit<F>(
        &self,
        element_key: Option<&str>,
        parameters: Option<Value>,
        callback: F,
    ) -> Result<Submission>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let page_event = self.create_page_event(element_key, parameters);
        self.dispatch(page_event, callback)
    }

    /// Asks the server to re-send the current page state.
    pub fn recompose<F>(&self, callback: F) -> Result<Submission>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.dispatch(PageEvent::default(), callback)
    }

    fn dispatch<F>(&self, page_event: PageEvent, callback: F) -> Result<Submission>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let csrf_token = self.csrf_token();
        let inner = Arc::downgrade(&self.inner);
        let event_handler = self.inner.event_handler.clone();
        let on_complete = move |outcome: Outcome| {
            let success = outcome.is_ok();
            match inner.upgrade() {
                Some(inner) if !inner.is_disposed() => event_handler.handle_events(outcome),
                _ => debug!("discarding response for disposed session"),
            }
            callback(success);
        };
        self.inner.service.submit(
            &self.inner.session_id,
            &self.inner.subscription_id,
            csrf_token.as_deref(),
            page_event,
            on_complete,
        )
    }

    /// Starts a flow immediately, outside the submission queue. Returns
    /// whether the server accepted it; argument errors are returned as `Err`.
    pub async fn start_flow(&self, flow_name: &str) -> Result<bool> {
        require(flow_name, "flowName")?;
        let csrf_token = self.csrf_token();
        let outcome = self
            .inner
            .service
            .start_flow(
                &self.inner.session_id,
                &self.inner.subscription_id,
                csrf_token.as_deref(),
                flow_name,
            )
            .await;
        let outcome = match outcome {
            Err(err) if err.is_precondition() => return Err(err),
            other => other,
        };

        let success = outcome.is_ok();
        if self.inner.is_disposed() {
            debug!(session_id = %self.inner.session_id, "discarding flow response for disposed session");
        } else {
            self.inner.event_handler.handle_events(outcome);
        }
        Ok(success)
    }

    /// Runs an offline task button action and returns the class of the
    /// button state that follows it.
    pub async fn execute_offline_task_action(
        &self,
        action: ButtonAction,
        task: OfflineTask,
    ) -> Result<&'static str> {
        let next = match action {
            ButtonAction::Prepare => {
                self.inner
                    .service
                    .prepare_offline_task(&self.inner.session_id, task)
                    .await?
            }
            ButtonAction::Delete | ButtonAction::Executed => {
                self.inner
                    .service
                    .delete_offline_task(task.case_id, task.persistency_id.as_deref())
                    .await?
            }
        };
        Ok(next.button_class())
    }

    pub async fn get_button_action(&self, key: &str) -> Result<ButtonAction> {
        self.inner.service.get_button_action(key).await
    }

    /// CSS class for a button action name; empty for unknown actions.
    pub fn get_button_class(action: &str) -> &'static str {
        ButtonAction::parse(action).map_or("", ButtonAction::button_class)
    }

    fn register_bus_listeners(&self) -> Vec<Subscription> {
        vec![
            self.listen(Topic::Page, SessionController::on_page),
            self.listen(Topic::Project, SessionController::on_project),
            self.listen(Topic::KeepAlive, SessionController::on_keep_alive),
            self.listen(Topic::BeforeSubmit, |controller, _| controller.set_keep_alive(false)),
            self.listen(Topic::AfterSubmit, |controller, _| controller.set_keep_alive(true)),
            self.listen(Topic::Logout, |controller, _| controller.dispose()),
        ]
    }

    fn listen(&self, topic: Topic, handler: fn(&SessionController, &BusMessage)) -> Subscription {
        let inner = Arc::downgrade(&self.inner);
        self.inner.bus.subscribe(topic, move |message| {
            if let Some(inner) = inner.upgrade() {
                handler(&SessionController { inner }, message);
            }
        })
    }

    fn set_keep_alive(&self, enabled: bool) {
        self.inner.state.lock().keep_alive = enabled;
    }

    fn on_page(&self, message: &BusMessage) {
        let BusMessage::Page(update) = message else {
            return;
        };
        if update.session_id.as_ref() != Some(&self.inner.session_id) {
            return;
        }
        if let Some(token) = &update.csrf_token {
            self.inner.state.lock().csrf_token = Some(token.clone());
        }
        match &update.changes {
            Some(changes) => {
                if let Err(err) = self.handle_changes(changes.clone()) {
                    error!(session_id = %self.inner.session_id, error = %err, "rejected page changes");
                }
            }
            None => error!(session_id = %self.inner.session_id, "page event without changes"),
        }
    }

    fn on_project(&self, message: &BusMessage) {
        let BusMessage::Project(switch) = message else {
            return;
        };
        if switch.session_id.as_ref() != Some(&self.inner.session_id) {
            return;
        }
        let service = Arc::clone(&self.inner.service);
        let new_session_id = switch.new_session_id.clone();
        let new_tab = switch.new_tab;
        tokio::spawn(async move {
            if let Err(err) = service.start_new_session(&new_session_id, new_tab).await {
                warn!(%new_session_id, error = %err, "failed to open new session");
            }
        });
    }

    fn on_keep_alive(&self, _message: &BusMessage) {
        if !self.keep_alive_enabled() {
            debug!(session_id = %self.inner.session_id, "keep alive skipped during submit");
            return;
        }
        let service = Arc::clone(&self.inner.service);
        let session_id = self.inner.session_id.clone();
        tokio::spawn(async move {
            if let Err(err) = service.keep_alive(&session_id).await {
                warn!(%session_id, error = %err, "keep alive failed");
            }
        });
    }
}

/// Releases the change-application flag when a listener panics, so later
/// change sets are applied instead of deferred forever. Sets deferred by
/// the failed round are dropped.
struct ApplyingReset<'a> {
    inner: &'a ControllerInner,
}

impl Drop for ApplyingReset<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut state = self.inner.state.lock();
        state.applying = false;
        let dropped = state.deferred.len();
        state.deferred.clear();
        warn!(
            session_id = %self.inner.session_id,
            dropped,
            "change listener panicked, nested change sets dropped"
        );
    }
}

/// Handle for a change listener registered on a [`SessionController`].
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    key: Option<String>,
    inner: Weak<ControllerInner>,
}

impl ListenerHandle {
    pub fn dispose(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        match &self.key {
            None => {
                state.listeners.remove(&self.id);
            }
            Some(key) => {
                if let Some(registered) = state.model_listeners.get_mut(key) {
                    registered.remove(&self.id);
                    if registered.is_empty() {
                        state.model_listeners.remove(key);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
