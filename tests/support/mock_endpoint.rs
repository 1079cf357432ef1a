use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const PROCESS_PATH: &str = "/api/import-jobs/process";
pub const SETTINGS_PATH: &str = "/api/settings";

#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: String,
    pub content_type: &'static str,
}

impl MockReply {
    pub fn no_work() -> Self {
        Self::json(StatusCode::OK, json!({ "message": "No queued jobs" }))
    }

    pub fn processed(job_id: &str) -> Self {
        Self::json(
            StatusCode::OK,
            json!({
                "message": "Job processed",
                "job": { "id": job_id, "status": "success" }
            }),
        )
    }

    pub fn server_error() -> Self {
        Self::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "database unavailable" }),
        )
    }

    pub fn html_login_page() -> Self {
        Self {
            status: StatusCode::OK,
            body: "<!DOCTYPE html><html><body>Sign in</body></html>".to_owned(),
            content_type: "text/html",
        }
    }

    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json",
        }
    }
}

/// Shared state behind the mock processing and settings endpoints.
///
/// Process replies are served round-robin from the script. Every process call
/// records the `x-api-key` header it carried and how many calls were in
/// flight when it arrived.
#[derive(Clone)]
pub struct MockState {
    script: Arc<Mutex<Vec<MockReply>>>,
    settings: Arc<Mutex<Value>>,
    process_calls: Arc<AtomicUsize>,
    settings_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    reply_delay: Arc<Mutex<Duration>>,
    api_keys: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockState {
    pub fn new(script: Vec<MockReply>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            settings: Arc::new(Mutex::new(json!([]))),
            process_calls: Arc::new(AtomicUsize::new(0)),
            settings_calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            reply_delay: Arc::new(Mutex::new(Duration::ZERO)),
            api_keys: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_script(&self, script: Vec<MockReply>) {
        *self.script.lock().expect("script poisoned") = script;
    }

    pub fn set_settings(&self, settings: Value) {
        *self.settings.lock().expect("settings poisoned") = settings;
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        *self.reply_delay.lock().expect("delay poisoned") = delay;
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn settings_calls(&self) -> usize {
        self.settings_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn api_keys(&self) -> Vec<Option<String>> {
        self.api_keys.lock().expect("api keys poisoned").clone()
    }

    fn next_reply(&self, call: usize) -> MockReply {
        let script = self.script.lock().expect("script poisoned");
        if script.is_empty() {
            return MockReply::no_work();
        }
        script[call % script.len()].clone()
    }
}

pub struct MockEndpoint {
    url: String,
    state: MockState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockEndpoint {
    pub async fn start(script: Vec<MockReply>) -> Result<Self> {
        let state = MockState::new(script);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock endpoint listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let service_state = state.clone();
        let make_service = make_service_fn(move |_| {
            let state = service_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(state.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock endpoint stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(state: MockState, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    drop(req);

    let response = match (&method, path.as_str()) {
        (&Method::POST, PROCESS_PATH) => serve_process(&state, api_key).await,
        (&Method::GET, SETTINGS_PATH) => {
            state.settings_calls.fetch_add(1, Ordering::SeqCst);
            let settings = state.settings.lock().expect("settings poisoned").clone();
            reply(StatusCode::OK, "application/json", settings.to_string())
        }
        _ => reply(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_owned()),
    };
    Ok(response)
}

async fn serve_process(state: &MockState, api_key: Option<String>) -> Response<Body> {
    let call = state.process_calls.fetch_add(1, Ordering::SeqCst);
    state.api_keys.lock().expect("api keys poisoned").push(api_key);

    let now_in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state
        .peak_in_flight
        .fetch_max(now_in_flight, Ordering::SeqCst);

    let delay = *state.reply_delay.lock().expect("delay poisoned");
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let scripted = state.next_reply(call);
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    reply(scripted.status, scripted.content_type, scripted.body)
}

fn reply(status: StatusCode, content_type: &'static str, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}
