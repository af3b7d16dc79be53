//! HTTP seam between the X client and the network.
//!
//! Requests are described as plain data so the client logic can be driven by a
//! scripted transport in tests and by reqwest everywhere else.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, multipart};
use serde::de::DeserializeOwned;

use crate::services::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub enum Part {
    Text {
        name: &'static str,
        value: String,
    },
    Bytes {
        name: &'static str,
        data: Bytes,
        mime: &'static str,
        file_name: Option<String>,
    },
}

impl Part {
    pub fn name(&self) -> &str {
        match self {
            Part::Text { name, .. } | Part::Bytes { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(&'static str, String)>),
    Multipart(Vec<Part>),
}

impl RequestBody {
    /// Text value of a form field or multipart text part.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.as_str()),
            RequestBody::Multipart(parts) => parts.iter().find_map(|part| match part {
                Part::Text { name: key, value } if *key == name => Some(value.as_str()),
                _ => None,
            }),
            RequestBody::Json(value) => value.get(name).and_then(|v| v.as_str()),
            RequestBody::Empty => None,
        }
    }

    /// Whether any field, part or top-level JSON key carries `name`.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            RequestBody::Form(fields) => fields.iter().any(|(key, _)| *key == name),
            RequestBody::Multipart(parts) => parts.iter().any(|part| part.name() == name),
            RequestBody::Json(value) => value.get(name).is_some(),
            RequestBody::Empty => false,
        }
    }

    /// Bytes of the first binary multipart part.
    pub fn binary(&self) -> Option<&Bytes> {
        match self {
            RequestBody::Multipart(parts) => parts.iter().find_map(|part| match part {
                Part::Bytes { data, .. } => Some(data),
                Part::Text { .. } => None,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            bearer: None,
            body: RequestBody::Empty,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            bearer: None,
            body: RequestBody::Empty,
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, fields: Vec<(&'static str, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }
}

/// Status line and body text of a completed exchange.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs one exchange. Non-2xx statuses are returned as responses;
    /// only failures below the status line are errors.
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };

        if let Some(token) = &request.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!("[http] {:?} {} -> {}", request.method, request.url, status);

        Ok(ApiResponse { status, body })
    }
}

fn build_form(parts: Vec<Part>) -> Result<multipart::Form, TransportError> {
    let mut form = multipart::Form::new();
    for part in parts {
        form = match part {
            Part::Text { name, value } => form.text(name, value),
            Part::Bytes {
                name,
                data,
                mime,
                file_name,
            } => {
                let len = data.len() as u64;
                let mut part = multipart::Part::stream_with_length(data, len).mime_str(mime)?;
                if let Some(file_name) = file_name {
                    part = part.file_name(file_name);
                }
                form.part(name, part)
            }
        };
    }
    Ok(form)
}
