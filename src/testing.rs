//! In-memory doubles for the network and the clock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::services::clock::Sleeper;
use crate::services::error::TransportError;
use crate::services::http::{ApiRequest, ApiResponse, HttpTransport, Method};
use crate::services::protocol::{Endpoints, UploadProtocol};
use crate::services::twitter::XClient;

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

/// Transport answering from a closure and recording every request.
pub struct FakeTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: Route) -> usize {
        self.requests()
            .iter()
            .filter(|req| route(req) == wanted)
            .count()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let result = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Initialize,
    Append,
    Finalize,
    Status,
    Post,
    Me,
    Other,
}

/// Classifies a v2 or legacy request by URL and command.
pub fn route(req: &ApiRequest) -> Route {
    let url = req.url.as_str();
    if url.contains("command=STATUS") {
        return Route::Status;
    }
    if url.ends_with("/initialize") {
        return Route::Initialize;
    }
    if url.ends_with("/append") {
        return Route::Append;
    }
    if url.ends_with("/finalize") {
        return Route::Finalize;
    }
    if url.ends_with("/2/tweets") {
        return Route::Post;
    }
    if url.contains("/2/users/me") {
        return Route::Me;
    }
    if url.ends_with("upload.json") && req.method == Method::Post {
        return match req.body.field("command") {
            Some("INIT") => Route::Initialize,
            Some("APPEND") => Route::Append,
            Some("FINALIZE") => Route::Finalize,
            _ => Route::Other,
        };
    }
    Route::Other
}

pub fn respond(status: u16, body: &str) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse {
        status,
        body: body.to_string(),
    })
}

pub fn json_response(status: u16, body: serde_json::Value) -> Result<ApiResponse, TransportError> {
    respond(status, &body.to_string())
}

pub fn client_for(transport: Arc<FakeTransport>) -> XClient {
    XClient::new(transport, Endpoints::new("https://api.test", "https://upload.test"), UploadProtocol::V2)
}

/// Sleeper that returns immediately and remembers what it was asked.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Writes `len` bytes of a repeating pattern to `dir/name`.
pub fn write_media(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}
