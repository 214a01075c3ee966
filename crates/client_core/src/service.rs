//! HTTP access to the session API.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::Utc;
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    Client, RequestBuilder,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{ButtonAction, SessionId, SubscriptionId},
    error::ServerErrorBody,
    protocol::{
        EventsResponse, NewSessionResponse, OfflineTask, PageEvent, PrepareOfflineResponse,
        SubscribeResponse,
    },
};
use storage::{compose_key, Storage, OFFLINE_TASK_PREFIX};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{require, Result, SessionError},
    navigation::{NavigationTarget, Navigator},
    queue::EventQueue,
};

pub const CSRF_HEADER: &str = "X-CSRF-Token";
const ACCEPT_JSON: &str = "application/json; charset=UTF-8";
const CONTENT_JSON: &str = "application/json";

/// Result of a queued submission, handed to the completion callback.
pub type Outcome = Result<EventsResponse>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Submit lock engaged and a submission was already in flight; the
    /// callback will never run.
    Dropped,
}

pub struct SessionService {
    http: Client,
    base_uri: Url,
    submit_lock: bool,
    submitting: Arc<AtomicBool>,
    queue: EventQueue,
    storage: Arc<dyn Storage>,
    navigator: Arc<dyn Navigator>,
}

impl SessionService {
    pub fn new(
        base_uri: &str,
        submit_lock: bool,
        storage: Arc<dyn Storage>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        require(base_uri, "baseUri")?;
        let normalized = if base_uri.ends_with('/') {
            base_uri.to_string()
        } else {
            format!("{base_uri}/")
        };
        let base_uri = Url::parse(&normalized).map_err(|source| SessionError::InvalidUrl {
            url: normalized.clone(),
            source,
        })?;

        Ok(Self {
            http: Client::new(),
            base_uri,
            submit_lock,
            submitting: Arc::new(AtomicBool::new(false)),
            queue: EventQueue::new(),
            storage,
            navigator,
        })
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    pub fn submit_lock(&self) -> bool {
        self.submit_lock
    }

    /// Whether a locked submission is in flight. Always `false` without the
    /// submit lock; use [`EventQueue::is_requesting`] for queue activity.
    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Queues a page event. `on_complete` runs exactly once for a queued
    /// submission, after the response was received or the call failed.
    pub fn submit<F>(
        &self,
        session_id: &SessionId,
        subscription_id: &SubscriptionId,
        csrf_token: Option<&str>,
        page_event: PageEvent,
        on_complete: F,
    ) -> Result<Submission>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        if self.submit_lock && self.is_submitting() {
            debug!(%session_id, "submit dropped, previous submission still in flight");
            return Ok(Submission::Dropped);
        }
        require(session_id.as_str(), "sessionId")?;
        require(subscription_id.as_str(), "subscriptionId")?;
        let csrf_token = require(csrf_token.unwrap_or_default(), "csrfToken")?;

        let url = self.endpoint(&format!(
            "{session_id}/api/subscription/{subscription_id}/handleEvent"
        ))?;
        if self.submit_lock && self.submitting.swap(true, Ordering::SeqCst) {
            debug!(%session_id, "submit dropped, previous submission still in flight");
            return Ok(Submission::Dropped);
        }

        let request = self
            .http
            .post(url.clone())
            .header(ACCEPT, ACCEPT_JSON)
            .header(CSRF_HEADER, csrf_token)
            .json(&page_event);
        let submitting = self.submit_lock.then(|| Arc::clone(&self.submitting));
        self.queue.add(async move {
            let outcome = match execute(request, &url).await {
                Ok(body) => decode::<EventsResponse>(&url, &body),
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                warn!(%url, error = %err, "submit failed");
            }
            if let Some(submitting) = submitting {
                submitting.store(false, Ordering::SeqCst);
            }
            on_complete(outcome);
        });
        Ok(Submission::Queued)
    }

    /// Starts a flow directly, bypassing the event queue.
    pub async fn start_flow(
        &self,
        session_id: &SessionId,
        subscription_id: &SubscriptionId,
        csrf_token: Option<&str>,
        flow_name: &str,
    ) -> Result<EventsResponse> {
        require(session_id.as_str(), "sessionId")?;
        require(subscription_id.as_str(), "subscriptionId")?;
        require(flow_name, "flowName")?;
        let csrf_token = require(csrf_token.unwrap_or_default(), "csrfToken")?;

        let url = self.endpoint(&format!(
            "{session_id}/api/subscription/{subscription_id}/startFlow/{flow_name}"
        ))?;
        let request = self
            .json_post(url.clone())
            .header(CSRF_HEADER, csrf_token);
        let body = execute(request, &url).await?;
        decode(&url, &body)
    }

    pub async fn create_subscription(&self, subscription_id: &SubscriptionId) -> Result<()> {
        require(subscription_id.as_str(), "subscriptionId")?;
        let url = self.endpoint(&format!("{subscription_id}/api/subscribe/"))?;
        execute(self.json_post(url.clone()), &url).await?;
        debug!(%subscription_id, "subscription created");
        Ok(())
    }

    pub async fn subscribe(
        &self,
        subscription_id: &SubscriptionId,
        session_id: &SessionId,
    ) -> Result<SubscribeResponse> {
        require(subscription_id.as_str(), "subscriptionId")?;
        require(session_id.as_str(), "sessionId")?;
        let url = self.endpoint(&format!("{session_id}/api/subscribe/{subscription_id}"))?;
        let body = execute(self.json_post(url.clone()), &url).await?;
        decode(&url, &body)
    }

    /// Asks the server for the location of a freshly created session and
    /// hands it to the navigator. Returns the opened location, if any.
    pub async fn start_new_session(
        &self,
        new_session_id: &SessionId,
        new_tab: bool,
    ) -> Result<Option<Url>> {
        require(new_session_id.as_str(), "newSessionId")?;
        let url = self.endpoint(&format!("{new_session_id}/api/startnewsession/"))?;
        let body = execute(self.json_post(url.clone()), &url).await?;
        let response: NewSessionResponse = decode(&url, &body)?;

        let Some(path) = response.url.filter(|path| !path.is_empty()) else {
            debug!(%new_session_id, "new session response carried no url");
            return Ok(None);
        };
        let location = self.endpoint(&format!("../{path}"))?;
        info!(%new_session_id, %location, new_tab, "opening new session");
        self.navigator
            .open(&location, NavigationTarget::from_new_tab(new_tab));
        Ok(Some(location))
    }

    pub async fn keep_alive(&self, session_id: &SessionId) -> Result<()> {
        require(session_id.as_str(), "sessionId")?;
        let url = self.endpoint(&format!("{session_id}/api/utility/keepAlive"))?;
        let request = self.http.get(url.clone()).header(ACCEPT, ACCEPT_JSON);
        execute(request, &url).await?;
        debug!(%session_id, "keep alive acknowledged");
        Ok(())
    }

    /// Fetches the offline payload of a task and caches the composed task.
    /// Returns the action now available for the task's button.
    pub async fn prepare_offline_task(
        &self,
        session_id: &SessionId,
        task: OfflineTask,
    ) -> Result<ButtonAction> {
        require(session_id.as_str(), "sessionId")?;
        let task_id = require(task.task_id.as_deref().unwrap_or_default(), "taskId")?;
        require(task.task_name.as_deref().unwrap_or_default(), "taskName")?;

        let url = self.endpoint(&format!("{session_id}/api/prepare_offline/{task_id}"))?;
        let body = execute(self.json_post(url.clone()), &url).await?;
        let response: PrepareOfflineResponse = decode(&url, &body)?;

        let key = compose_key(
            Some(OFFLINE_TASK_PREFIX),
            task.case_id,
            task.persistency_id.as_deref(),
        )?;
        let task = task.compose(response, Utc::now());
        self.storage.insert(&key, serde_json::to_value(&task)?).await?;
        info!(%key, "offline task prepared");

        Ok(if self.storage.contains(&key).await? {
            ButtonAction::Delete
        } else {
            ButtonAction::Prepare
        })
    }

    pub async fn delete_offline_task(
        &self,
        case_id: Option<i64>,
        persistency_id: Option<&str>,
    ) -> Result<ButtonAction> {
        let key = compose_key(Some(OFFLINE_TASK_PREFIX), case_id, persistency_id)?;
        self.storage.remove(&key).await?;
        info!(%key, "offline task removed");

        Ok(if self.storage.contains(&key).await? {
            ButtonAction::Delete
        } else {
            ButtonAction::Prepare
        })
    }

    pub async fn get_button_action(&self, key: &str) -> Result<ButtonAction> {
        require(key, "key")?;
        let action = match self.storage.get(key).await? {
            None => ButtonAction::Prepare,
            Some(task) => match task.get("values") {
                Some(values) if !is_blank(values) => ButtonAction::Executed,
                _ => ButtonAction::Delete,
            },
        };
        Ok(action)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_uri
            .join(path)
            .map_err(|source| SessionError::InvalidUrl {
                url: format!("{}{path}", self.base_uri),
                source,
            })
    }

    fn json_post(&self, url: Url) -> RequestBuilder {
        self.http
            .post(url)
            .header(ACCEPT, ACCEPT_JSON)
            .header(CONTENT_TYPE, CONTENT_JSON)
    }
}

async fn execute(request: RequestBuilder, url: &Url) -> Result<Vec<u8>> {
    let response = request
        .send()
        .await
        .map_err(|source| SessionError::Transport {
            url: url.to_string(),
            source,
        })?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|source| SessionError::Transport {
            url: url.to_string(),
            source,
        })?;

    if status.is_success() {
        return Ok(body.to_vec());
    }
    match serde_json::from_slice::<ServerErrorBody>(&body) {
        Ok(reported) => Err(SessionError::Server {
            error_type: reported.error_type,
            title: reported.title.unwrap_or_default(),
            message: reported.message.unwrap_or_default(),
        }),
        Err(_) => Err(SessionError::Status {
            url: url.to_string(),
            status,
        }),
    }
}

/// `null`, `false`, zero and the empty string carry no recorded values.
/// Empty objects and arrays still count as recorded.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn decode<T: DeserializeOwned>(url: &Url, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| SessionError::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
