use std::{collections::VecDeque, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::ACCEPT, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};
use url::Url;

use crate::navigation::{NavigationTarget, Navigator};

pub(crate) struct Script {
    pub subscribe: Value,
    pub handle_event: VecDeque<(StatusCode, Value)>,
    pub handle_event_delay: Duration,
    pub start_flow: (StatusCode, Value),
    pub new_session: Value,
    pub prepare_offline: Value,
    pub keep_alive_status: StatusCode,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            subscribe: json!({
                "elements": [
                    {"key": "P1", "type": "page", "properties": {"name": "Intake"}},
                    {"key": "F1", "type": "field", "values": ["a"]},
                    {"key": "F2", "type": "field", "values": []},
                    {"key": "B1", "type": "button"}
                ],
                "language": {"patternName": "nl-NL"},
                "csrfToken": "T1"
            }),
            handle_event: VecDeque::new(),
            handle_event_delay: Duration::ZERO,
            start_flow: (StatusCode::OK, json!({"events": []})),
            new_session: json!({"url": "session/2"}),
            prepare_offline: json!({"elements": [{"key": "P9"}], "language": {"patternName": "en"}}),
            keep_alive_status: StatusCode::OK,
        }
    }
}

#[derive(Default)]
pub(crate) struct Recorded {
    pub handle_event_bodies: Vec<Value>,
    pub handle_event_paths: Vec<(String, String)>,
    pub csrf_tokens: Vec<String>,
    pub accept_headers: Vec<String>,
    pub flows: Vec<String>,
    pub subscriptions_created: Vec<String>,
    pub subscribes: Vec<(String, String)>,
    pub new_sessions: Vec<String>,
    pub prepared_tasks: Vec<String>,
    pub keep_alive_hits: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

#[derive(Clone)]
pub(crate) struct TestServer {
    pub base_uri: String,
    pub recorded: Arc<Mutex<Recorded>>,
    pub script: Arc<Mutex<Script>>,
}

pub(crate) async fn spawn_session_server(script: Script) -> TestServer {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = TestServer {
        base_uri: format!("http://{addr}/server/"),
        recorded: Arc::new(Mutex::new(Recorded::default())),
        script: Arc::new(Mutex::new(script)),
    };

    let app = Router::new()
        .route("/server/:id/api/subscribe/", post(create_subscription))
        .route("/server/:id/api/subscribe/:subscription", post(subscribe))
        .route(
            "/server/:id/api/subscription/:subscription/handleEvent",
            post(handle_event),
        )
        .route(
            "/server/:id/api/subscription/:subscription/startFlow/:flow",
            post(start_flow),
        )
        .route("/server/:id/api/startnewsession/", post(start_new_session))
        .route("/server/:id/api/utility/keepAlive", get(keep_alive))
        .route("/server/:id/api/prepare_offline/:task", post(prepare_offline))
        .with_state(server.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    server
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn create_subscription(
    State(server): State<TestServer>,
    Path(subscription): Path<String>,
) -> StatusCode {
    server
        .recorded
        .lock()
        .await
        .subscriptions_created
        .push(subscription);
    StatusCode::OK
}

async fn subscribe(
    State(server): State<TestServer>,
    Path((session, subscription)): Path<(String, String)>,
) -> Json<Value> {
    server
        .recorded
        .lock()
        .await
        .subscribes
        .push((session, subscription));
    Json(server.script.lock().await.subscribe.clone())
}

async fn handle_event(
    State(server): State<TestServer>,
    Path((session, subscription)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let delay = {
        let mut recorded = server.recorded.lock().await;
        recorded.in_flight += 1;
        recorded.max_in_flight = recorded.max_in_flight.max(recorded.in_flight);
        recorded
            .handle_event_bodies
            .push(serde_json::from_slice(&body).unwrap_or(Value::Null));
        recorded.handle_event_paths.push((session, subscription));
        recorded.csrf_tokens.push(header(&headers, "x-csrf-token"));
        recorded
            .accept_headers
            .push(header(&headers, ACCEPT.as_str()));
        server.script.lock().await.handle_event_delay
    };
    tokio::time::sleep(delay).await;

    server.recorded.lock().await.in_flight -= 1;
    let (status, reply) = server
        .script
        .lock()
        .await
        .handle_event
        .pop_front()
        .unwrap_or((StatusCode::OK, json!({"events": []})));
    (status, Json(reply))
}

async fn start_flow(
    State(server): State<TestServer>,
    Path((_session, _subscription, flow)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    {
        let mut recorded = server.recorded.lock().await;
        recorded.flows.push(flow);
        recorded.csrf_tokens.push(header(&headers, "x-csrf-token"));
    }
    let (status, reply) = server.script.lock().await.start_flow.clone();
    (status, Json(reply))
}

async fn start_new_session(
    State(server): State<TestServer>,
    Path(session): Path<String>,
) -> Json<Value> {
    server.recorded.lock().await.new_sessions.push(session);
    Json(server.script.lock().await.new_session.clone())
}

async fn keep_alive(State(server): State<TestServer>, Path(_session): Path<String>) -> StatusCode {
    server.recorded.lock().await.keep_alive_hits += 1;
    server.script.lock().await.keep_alive_status
}

async fn prepare_offline(
    State(server): State<TestServer>,
    Path((_session, task)): Path<(String, String)>,
) -> Json<Value> {
    server.recorded.lock().await.prepared_tasks.push(task);
    Json(server.script.lock().await.prepare_offline.clone())
}

#[derive(Default)]
pub(crate) struct RecordingNavigator {
    pub opened: std::sync::Mutex<Vec<(Url, NavigationTarget)>>,
}

impl Navigator for RecordingNavigator {
    fn open(&self, location: &Url, target: NavigationTarget) {
        self.opened
            .lock()
            .expect("navigator lock")
            .push((location.clone(), target));
    }
}

/// Polls `check` until it holds or a second has passed.
pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
