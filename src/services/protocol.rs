//! Per-phase request builders and response parsers for the two media upload
//! protocols.
//!
//! v2 addresses the media id in the URL path for APPEND and FINALIZE and
//! nests responses under `data`. The legacy v1.1 endpoint is a single
//! `upload.json` that takes a `command` and the media id as form fields and
//! answers with top-level fields.

use bytes::Bytes;
use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{DEFAULT_API_BASE, DEFAULT_LEGACY_UPLOAD_BASE};
use crate::domain::{MediaCategory, MediaId, ProcessingInfo, ProcessingState};
use crate::services::error::{StatusError, TransportError, UploadError, UploadPhase};
use crate::services::http::{ApiRequest, ApiResponse, Part};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadProtocol {
    #[default]
    V2,
    Legacy,
}

/// Base URLs for the API and the legacy upload host, without trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api_base: String,
    legacy_upload_base: String,
}

impl Endpoints {
    pub fn new(api_base: &str, legacy_upload_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            legacy_upload_base: legacy_upload_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn posts(&self) -> String {
        format!("{}/2/tweets", self.api_base)
    }

    pub fn me(&self) -> String {
        format!("{}/2/users/me?user.fields=verified_type", self.api_base)
    }

    fn v2_upload(&self) -> String {
        format!("{}/2/media/upload", self.api_base)
    }

    fn legacy_upload(&self) -> String {
        format!("{}/1.1/media/upload.json", self.legacy_upload_base)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE, DEFAULT_LEGACY_UPLOAD_BASE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InitializeRequest<'a> {
    pub total_bytes: u64,
    pub media_type: &'a str,
    pub category: MediaCategory,
}

#[derive(Debug, Clone)]
pub struct AppendRequest<'a> {
    pub media_id: &'a MediaId,
    pub segment_index: u32,
    pub chunk: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct FinalizeRequest<'a> {
    pub media_id: &'a MediaId,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusRequest<'a> {
    pub media_id: &'a MediaId,
}

impl UploadProtocol {
    pub fn initialize(&self, endpoints: &Endpoints, req: InitializeRequest<'_>) -> ApiRequest {
        match self {
            UploadProtocol::V2 => ApiRequest::post(format!("{}/initialize", endpoints.v2_upload()))
                .json(serde_json::json!({
                    "media_type": req.media_type,
                    "total_bytes": req.total_bytes,
                    "media_category": req.category.as_str(),
                })),
            UploadProtocol::Legacy => ApiRequest::post(endpoints.legacy_upload()).form(vec![
                ("command", "INIT".to_string()),
                ("total_bytes", req.total_bytes.to_string()),
                ("media_type", req.media_type.to_string()),
                ("media_category", req.category.as_str().to_string()),
            ]),
        }
    }

    pub fn append(&self, endpoints: &Endpoints, req: AppendRequest<'_>) -> ApiRequest {
        let media = Part::Bytes {
            name: "media",
            data: req.chunk,
            mime: "application/octet-stream",
            file_name: None,
        };
        let segment_index = Part::Text {
            name: "segment_index",
            value: req.segment_index.to_string(),
        };

        match self {
            UploadProtocol::V2 => ApiRequest::post(format!(
                "{}/{}/append",
                endpoints.v2_upload(),
                req.media_id.in_path().segment()
            ))
            .multipart(vec![segment_index, media]),
            UploadProtocol::Legacy => ApiRequest::post(endpoints.legacy_upload()).multipart(vec![
                Part::Text {
                    name: "command",
                    value: "APPEND".to_string(),
                },
                Part::Text {
                    name: "media_id",
                    value: req.media_id.in_body().value().to_string(),
                },
                segment_index,
                media,
            ]),
        }
    }

    pub fn finalize(&self, endpoints: &Endpoints, req: FinalizeRequest<'_>) -> ApiRequest {
        match self {
            UploadProtocol::V2 => ApiRequest::post(format!(
                "{}/{}/finalize",
                endpoints.v2_upload(),
                req.media_id.in_path().segment()
            ))
            .json(serde_json::json!({ "media_id": req.media_id.in_body().value() })),
            UploadProtocol::Legacy => ApiRequest::post(endpoints.legacy_upload()).form(vec![
                ("command", "FINALIZE".to_string()),
                ("media_id", req.media_id.in_body().value().to_string()),
            ]),
        }
    }

    pub fn status(
        &self,
        endpoints: &Endpoints,
        req: StatusRequest<'_>,
    ) -> Result<ApiRequest, TransportError> {
        let base = match self {
            UploadProtocol::V2 => endpoints.v2_upload(),
            UploadProtocol::Legacy => endpoints.legacy_upload(),
        };
        let url = Url::parse_with_params(
            &base,
            &[
                ("command", "STATUS"),
                ("media_id", req.media_id.in_body().value()),
            ],
        )
        .map_err(|e| TransportError::InvalidRequest(format!("{base}: {e}")))?;

        Ok(ApiRequest::get(url.to_string()))
    }

    /// Extracts the media id from a successful initialize response.
    pub fn parse_initialize(&self, resp: &ApiResponse) -> Result<MediaId, UploadError> {
        self.payload(&resp.body)
            .and_then(|payload| payload.id)
            .and_then(MediaId::new)
            .ok_or_else(|| UploadError::MalformedResponse {
                phase: UploadPhase::Initialize,
                field: "media_id",
                body: resp.body.clone(),
            })
    }

    /// Processing report from a successful finalize response. An empty or
    /// unreadable body is read as "nothing to wait for".
    pub fn parse_finalize(&self, resp: &ApiResponse) -> Option<ProcessingInfo> {
        if resp.body.trim().is_empty() {
            return None;
        }
        match self.payload(&resp.body) {
            Some(payload) => payload.processing_info.map(ProcessingInfo::from),
            None => {
                warn!(
                    "[upload] FINALIZE body unreadable, assuming no processing: {}",
                    resp.body
                );
                None
            }
        }
    }

    /// Processing report from a status response. `Ok(None)` means the
    /// service no longer reports processing for this media.
    pub fn parse_status(&self, resp: &ApiResponse) -> Result<Option<ProcessingInfo>, StatusError> {
        if !resp.is_success() {
            return Err(StatusError::Unavailable {
                status: resp.status,
                body: resp.body.clone(),
            });
        }
        self.payload(&resp.body)
            .map(|payload| payload.processing_info.map(ProcessingInfo::from))
            .ok_or_else(|| StatusError::Unparseable(resp.body.clone()))
    }

    fn payload(&self, body: &str) -> Option<MediaPayload> {
        match self {
            UploadProtocol::V2 => serde_json::from_str::<Envelope>(body).ok()?.data,
            UploadProtocol::Legacy => serde_json::from_str::<MediaPayload>(body).ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<MediaPayload>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    #[serde(alias = "media_id_string")]
    id: Option<String>,
    processing_info: Option<WireProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct WireProcessingInfo {
    state: String,
    check_after_secs: Option<u32>,
    progress_percent: Option<u8>,
    error: Option<WireProcessingError>,
}

#[derive(Debug, Deserialize)]
struct WireProcessingError {
    name: Option<String>,
    message: Option<String>,
}

impl From<WireProcessingInfo> for ProcessingInfo {
    fn from(wire: WireProcessingInfo) -> Self {
        ProcessingInfo {
            state: ProcessingState::from_wire(&wire.state),
            check_after_secs: wire.check_after_secs.unwrap_or(0),
            progress_percent: wire.progress_percent,
            error: wire.error.and_then(|e| e.message.or(e.name)),
        }
    }
}
