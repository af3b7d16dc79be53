use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::domain::{AccountTier, MediaId, ProcessingInfo};
use crate::services::composer::PostRequest;
use crate::services::error::{
    ApiError, PostError, StatusError, TransportError, UploadError, UploadPhase,
};
use crate::services::http::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
use crate::services::protocol::{
    AppendRequest, Endpoints, FinalizeRequest, InitializeRequest, StatusRequest, UploadProtocol,
};

/// X API client shared by one job. Each call takes the bearer token of the
/// account it acts for.
#[derive(Clone)]
pub struct XClient {
    transport: Arc<dyn HttpTransport>,
    endpoints: Endpoints,
    protocol: UploadProtocol,
}

impl XClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoints: Endpoints,
        protocol: UploadProtocol,
    ) -> Self {
        Self {
            transport,
            endpoints,
            protocol,
        }
    }

    /// reqwest-backed client configured from `config`.
    pub fn open(config: &Config) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(
            Arc::new(transport),
            config.endpoints(),
            config.protocol,
        ))
    }

    pub fn protocol(&self) -> UploadProtocol {
        self.protocol
    }

    async fn send(
        &self,
        access_token: &str,
        request: ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        self.transport.execute(request.bearer(access_token)).await
    }

    /// INIT: declares the upload and returns the assigned media id.
    pub async fn initialize_upload(
        &self,
        access_token: &str,
        req: InitializeRequest<'_>,
    ) -> Result<MediaId, UploadError> {
        debug!(
            "[upload] INIT media_type={} total_bytes={} media_category={}",
            req.media_type,
            req.total_bytes,
            req.category.as_str()
        );
        let resp = self
            .send(access_token, self.protocol.initialize(&self.endpoints, req))
            .await
            .map_err(|source| UploadError::Transport {
                phase: UploadPhase::Initialize,
                source,
            })?;

        if !resp.is_success() {
            return Err(UploadError::Init {
                status: resp.status,
                body: resp.body,
            });
        }

        self.protocol.parse_initialize(&resp)
    }

    pub async fn append_chunk(
        &self,
        access_token: &str,
        req: AppendRequest<'_>,
    ) -> Result<(), UploadError> {
        let segment_index = req.segment_index;
        let resp = self
            .send(access_token, self.protocol.append(&self.endpoints, req))
            .await
            .map_err(|source| UploadError::AppendTransport {
                segment_index,
                source,
            })?;

        if !resp.is_success() {
            return Err(UploadError::Append {
                segment_index,
                status: resp.status,
                body: resp.body,
            });
        }
        Ok(())
    }

    /// FINALIZE: returns the processing report, if the service sent one.
    pub async fn finalize_upload(
        &self,
        access_token: &str,
        media_id: &MediaId,
    ) -> Result<Option<ProcessingInfo>, UploadError> {
        let request = self
            .protocol
            .finalize(&self.endpoints, FinalizeRequest { media_id });
        let resp = self
            .send(access_token, request)
            .await
            .map_err(|source| UploadError::Transport {
                phase: UploadPhase::Finalize,
                source,
            })?;

        if !resp.is_success() {
            return Err(UploadError::Finalize {
                status: resp.status,
                body: resp.body,
            });
        }

        Ok(self.protocol.parse_finalize(&resp))
    }

    pub async fn check_status(
        &self,
        access_token: &str,
        media_id: &MediaId,
    ) -> Result<Option<ProcessingInfo>, StatusError> {
        let request = self
            .protocol
            .status(&self.endpoints, StatusRequest { media_id })?;
        let resp = self.send(access_token, request).await?;
        self.protocol.parse_status(&resp)
    }

    /// Creates one post and returns its id.
    pub async fn post_tweet(
        &self,
        access_token: &str,
        request: &PostRequest,
    ) -> Result<String, PostError> {
        let body = serde_json::to_value(request)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let resp = self
            .send(access_token, ApiRequest::post(self.endpoints.posts()).json(body))
            .await?;

        if !resp.is_success() {
            return Err(PostError::Api {
                status: resp.status,
                body: resp.body,
            });
        }

        match resp.json::<PostResponse>() {
            Ok(PostResponse {
                data: Some(PostData { id }),
            }) if !id.trim().is_empty() => Ok(id),
            _ => {
                warn!("[post] success status without data.id: {}", resp.body);
                Err(PostError::MalformedResponse { body: resp.body })
            }
        }
    }

    /// The authenticated account, with the verification type that decides
    /// its duration ceiling.
    pub async fn get_me(&self, access_token: &str) -> Result<XUser, ApiError> {
        let resp = self
            .send(access_token, ApiRequest::get(self.endpoints.me()))
            .await?;

        if !resp.is_success() {
            return Err(ApiError::UnexpectedStatus {
                status: resp.status,
                body: resp.body,
            });
        }

        let wrapper: UserResponse = resp.json()?;
        Ok(wrapper.data)
    }
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    data: Option<PostData>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    data: XUser,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct XUser {
    pub id: String,
    pub name: String,
    pub username: String,
    pub verified_type: Option<String>,
}

impl XUser {
    pub fn tier(&self) -> AccountTier {
        AccountTier::from_verified_type(self.verified_type.as_deref())
    }
}
