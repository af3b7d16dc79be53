use std::path::Path;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::constants::{CHUNK_SIZE, MAX_UPLOAD_BYTES};
use crate::domain::{
    MediaCategory, MediaUpload, MediaUploadSession, UploadState, media_type_for_path,
};
use crate::services::cancel::CancelFlag;
use crate::services::error::{UploadError, UploadPhase};
use crate::services::protocol::{AppendRequest, InitializeRequest};
use crate::services::twitter::XClient;

/// Three-phase upload of one local file. A failed upload is not resumable;
/// callers start again from initialize.
#[derive(Clone)]
pub struct ChunkedUploader {
    client: XClient,
    cancel: CancelFlag,
    chunk_size: usize,
}

impl ChunkedUploader {
    pub fn new(client: XClient) -> Self {
        Self {
            client,
            cancel: CancelFlag::default(),
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn upload(&self, file: &Path, access_token: &str) -> Result<MediaUpload, UploadError> {
        self.upload_with_progress(file, access_token, |_, _, _| {})
            .await
    }

    /// Upload with a callback receiving `(segment_index, bytes_sent,
    /// total_bytes)` after each acknowledged APPEND.
    pub async fn upload_with_progress<F>(
        &self,
        file: &Path,
        access_token: &str,
        on_chunk: F,
    ) -> Result<MediaUpload, UploadError>
    where
        F: Fn(u32, u64, u64),
    {
        let io_err = |phase: UploadPhase| {
            move |source: std::io::Error| UploadError::Io {
                path: file.to_path_buf(),
                phase,
                source,
            }
        };

        let total_bytes = tokio::fs::metadata(file)
            .await
            .map_err(io_err(UploadPhase::Initialize))?
            .len();
        if total_bytes > MAX_UPLOAD_BYTES {
            return Err(UploadError::FileTooLarge {
                path: file.to_path_buf(),
                size: total_bytes,
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let media_type = media_type_for_path(file);
        let init = InitializeRequest {
            total_bytes,
            media_type,
            category: MediaCategory::for_media_type(media_type),
        };
        let media_id = self
            .guarded(UploadPhase::Initialize, self.client.initialize_upload(access_token, init))
            .await?;
        info!("[upload] {} -> media_id {media_id} ({total_bytes} bytes)", file.display());

        let mut session = MediaUploadSession::new(media_id.clone(), total_bytes);
        let mut reader = File::open(file)
            .await
            .map_err(io_err(UploadPhase::Append))?;

        loop {
            let chunk = read_chunk(&mut reader, self.chunk_size)
                .await
                .map_err(io_err(UploadPhase::Append))?;
            if chunk.is_empty() {
                break;
            }

            let len = chunk.len();
            let segment_index = session.next_segment();
            let append = AppendRequest {
                media_id: &media_id,
                segment_index,
                chunk,
            };
            let outcome = match self
                .cancel
                .run(self.client.append_chunk(access_token, append))
                .await
            {
                Some(outcome) => outcome,
                None => {
                    info!("[upload] cancelled during APPEND of segment {segment_index}");
                    Err(UploadError::AppendCancelled { segment_index })
                }
            };
            if let Err(err) = outcome {
                session.fail();
                return Err(err);
            }

            session.record_chunk(len);
            debug!(
                "[upload] APPEND segment {segment_index} ({len} bytes, {}/{total_bytes})",
                session.bytes_sent()
            );
            on_chunk(segment_index, session.bytes_sent(), total_bytes);
        }

        if session.bytes_sent() != total_bytes {
            warn!(
                "[upload] {} changed during upload: declared {total_bytes} bytes, sent {}",
                file.display(),
                session.bytes_sent()
            );
        }

        let processing = self
            .guarded(
                UploadPhase::Finalize,
                self.client.finalize_upload(access_token, &media_id),
            )
            .await?;
        session.mark_finalized();
        session.resolve_processing(processing.as_ref());

        if session.state() == UploadState::Failed {
            let reason = processing
                .as_ref()
                .and_then(|p| p.error.clone())
                .unwrap_or_else(|| "processing failed".to_string());
            return Err(UploadError::ProcessingFailed { media_id, reason });
        }

        Ok(MediaUpload {
            media_id,
            total_bytes,
            bytes_sent: session.bytes_sent(),
            segments: session.next_segment(),
            processing,
        })
    }

    async fn guarded<T>(
        &self,
        phase: UploadPhase,
        fut: impl Future<Output = Result<T, UploadError>>,
    ) -> Result<T, UploadError> {
        match self.cancel.run(fut).await {
            Some(result) => result,
            None => {
                info!("[upload] cancelled during {phase}");
                Err(UploadError::Cancelled { phase })
            }
        }
    }
}

/// Fills up to `size` bytes, stopping early only at EOF.
async fn read_chunk(file: &mut File, size: usize) -> std::io::Result<Bytes> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::domain::ProcessingState;
    use crate::services::error::TransportError;
    use crate::services::http::{ApiRequest, ApiResponse};
    use crate::services::protocol::{Endpoints, UploadProtocol};
    use crate::testing::{FakeTransport, Route, client_for, json_response, respond, route, write_media};

    fn happy_path(req: &ApiRequest) -> Result<ApiResponse, TransportError> {
        match route(req) {
            Route::Initialize => json_response(
                200,
                serde_json::json!({ "data": { "id": "1880028106020515840", "expires_after_secs": 86400 } }),
            ),
            Route::Append => respond(204, ""),
            Route::Finalize => json_response(
                200,
                serde_json::json!({ "data": { "id": "1880028106020515840" } }),
            ),
            _ => respond(404, "unexpected route"),
        }
    }

    #[tokio::test]
    async fn appends_cover_the_file_once_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 10);
        let transport = FakeTransport::new(happy_path);
        let uploader = ChunkedUploader::new(client_for(transport.clone())).with_chunk_size(4);

        let ticks = Mutex::new(Vec::new());
        let upload = uploader
            .upload_with_progress(&path, "token", |segment, sent, total| {
                ticks.lock().unwrap().push((segment, sent, total));
            })
            .await
            .unwrap();

        assert_eq!(upload.segments, 3);
        assert_eq!(upload.bytes_sent, 10);
        assert_eq!(upload.media_id.to_string(), "1880028106020515840");
        assert!(upload.processing.is_none());

        let appends: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| route(r) == Route::Append)
            .collect();
        let indices: Vec<_> = appends
            .iter()
            .map(|r| r.body.field("segment_index").unwrap().to_string())
            .collect();
        assert_eq!(indices, ["0", "1", "2"]);

        let sent: Vec<u8> = appends
            .iter()
            .flat_map(|r| r.body.binary().unwrap().to_vec())
            .collect();
        assert_eq!(sent, std::fs::read(&path).unwrap());
        assert_eq!(
            *ticks.lock().unwrap(),
            vec![(0, 4, 10), (1, 8, 10), (2, 10, 10)]
        );
    }

    #[tokio::test]
    async fn megabyte_chunks_leave_a_short_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 2 * CHUNK_SIZE + 1);
        let transport = FakeTransport::new(happy_path);

        let upload = ChunkedUploader::new(client_for(transport.clone()))
            .upload(&path, "token")
            .await
            .unwrap();

        assert_eq!(transport.count(Route::Append), 3);
        assert_eq!(upload.segments, 3);
        let last = transport
            .requests()
            .into_iter()
            .filter(|r| route(r) == Route::Append)
            .last()
            .unwrap();
        assert_eq!(last.body.binary().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.mp4");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_UPLOAD_BYTES + 1).unwrap();

        let transport = FakeTransport::new(happy_path);
        let err = ChunkedUploader::new(client_for(transport.clone()))
            .upload(&path, "token")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::FileTooLarge { size, .. } if size == MAX_UPLOAD_BYTES + 1));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_append_stops_before_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 12);
        let transport = FakeTransport::new(|req| {
            if route(req) == Route::Append && req.body.field("segment_index") == Some("1") {
                return respond(413, r#"{"errors":[{"message":"Payload too large"}]}"#);
            }
            happy_path(req)
        });

        let err = ChunkedUploader::new(client_for(transport.clone()))
            .with_chunk_size(4)
            .upload(&path, "token")
            .await
            .unwrap_err();

        match err {
            UploadError::Append {
                segment_index,
                status,
                body,
            } => {
                assert_eq!(segment_index, 1);
                assert_eq!(status, 413);
                assert!(body.contains("Payload too large"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.count(Route::Append), 2);
        assert_eq!(transport.count(Route::Finalize), 0);
    }

    #[tokio::test]
    async fn failed_processing_at_finalize_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 3);
        let transport = FakeTransport::new(|req| match route(req) {
            Route::Finalize => json_response(
                200,
                serde_json::json!({
                    "data": {
                        "id": "1880028106020515840",
                        "processing_info": { "state": "failed", "error": { "message": "Unsupported codec" } }
                    }
                }),
            ),
            _ => happy_path(req),
        });

        let err = ChunkedUploader::new(client_for(transport.clone()))
            .upload(&path, "token")
            .await
            .unwrap_err();

        match err {
            UploadError::ProcessingFailed { reason, .. } => assert_eq!(reason, "Unsupported codec"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.count(Route::Status), 0);
    }

    #[tokio::test]
    async fn pending_processing_is_handed_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 3);
        let transport = FakeTransport::new(|req| match route(req) {
            Route::Finalize => json_response(
                200,
                serde_json::json!({
                    "data": { "id": "1", "processing_info": { "state": "pending", "check_after_secs": 1 } }
                }),
            ),
            _ => happy_path(req),
        });

        let upload = ChunkedUploader::new(client_for(transport))
            .upload(&path, "token")
            .await
            .unwrap();
        assert_eq!(
            upload.processing.map(|p| p.state),
            Some(ProcessingState::Pending)
        );
    }

    #[tokio::test]
    async fn empty_file_sends_no_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "empty.mp4", 0);
        let transport = FakeTransport::new(happy_path);

        let upload = ChunkedUploader::new(client_for(transport.clone()))
            .upload(&path, "token")
            .await
            .unwrap();

        assert_eq!(upload.segments, 0);
        assert_eq!(transport.count(Route::Append), 0);
        assert_eq!(transport.count(Route::Finalize), 1);
    }

    #[tokio::test]
    async fn cancelled_upload_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 3);
        let transport = FakeTransport::new(happy_path);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = ChunkedUploader::new(client_for(transport.clone()))
            .with_cancel(cancel)
            .upload(&path, "token")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Cancelled {
                phase: UploadPhase::Initialize
            }
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_file_fails_before_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(happy_path);

        let err = ChunkedUploader::new(client_for(transport.clone()))
            .upload(&dir.path().join("nope.mp4"), "token")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Io {
                phase: UploadPhase::Initialize,
                ..
            }
        ));
        assert_eq!(err.phase(), UploadPhase::Initialize);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_empty_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 8);
        let transport = FakeTransport::new(happy_path);

        let upload = ChunkedUploader::new(client_for(transport.clone()))
            .with_chunk_size(4)
            .upload(&path, "token")
            .await
            .unwrap();

        assert_eq!(upload.segments, 2);
        assert_eq!(upload.bytes_sent, 8);
        let appends: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| route(r) == Route::Append)
            .collect();
        let indices: Vec<_> = appends
            .iter()
            .map(|r| r.body.field("segment_index").unwrap().to_string())
            .collect();
        assert_eq!(indices, ["0", "1"]);
        assert!(appends.iter().all(|r| r.body.binary().unwrap().len() == 4));
        assert_eq!(transport.count(Route::Finalize), 1);
    }

    #[tokio::test]
    async fn append_timeout_names_the_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 12);
        let transport = FakeTransport::new(|req| {
            if route(req) == Route::Append && req.body.field("segment_index") == Some("2") {
                return Err(TransportError::InvalidRequest("operation timed out".into()));
            }
            happy_path(req)
        });

        let err = ChunkedUploader::new(client_for(transport.clone()))
            .with_chunk_size(4)
            .upload(&path, "token")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::AppendTransport { segment_index: 2, .. }));
        assert_eq!(err.phase(), UploadPhase::Append);
        assert!(err.to_string().contains("segment 2"));
        assert_eq!(transport.count(Route::Append), 3);
        assert_eq!(transport.count(Route::Finalize), 0);
    }

    #[tokio::test]
    async fn cancel_between_appends_names_the_next_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 12);
        let cancel = CancelFlag::new();
        let trip = cancel.clone();
        let transport = FakeTransport::new(move |req| {
            if route(req) == Route::Append && req.body.field("segment_index") == Some("1") {
                trip.cancel();
            }
            happy_path(req)
        });

        let err = ChunkedUploader::new(client_for(transport.clone()))
            .with_chunk_size(4)
            .with_cancel(cancel)
            .upload(&path, "token")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::AppendCancelled { segment_index: 2 }));
        assert!(err.to_string().contains("segment 2"));
        assert_eq!(transport.count(Route::Append), 2);
        assert_eq!(transport.count(Route::Finalize), 0);
    }

    #[tokio::test]
    async fn legacy_upload_runs_all_phases_against_upload_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_media(dir.path(), "clip.mp4", 6);
        let transport = FakeTransport::new(|req| match route(req) {
            Route::Initialize => respond(
                202,
                r#"{"media_id":710511363345354753,"media_id_string":"710511363345354753","expires_after_secs":86400}"#,
            ),
            Route::Append => respond(204, ""),
            Route::Finalize => respond(
                201,
                r#"{"media_id":710511363345354753,"media_id_string":"710511363345354753","size":6}"#,
            ),
            _ => respond(404, "unexpected route"),
        });
        let client = XClient::new(
            transport.clone(),
            Endpoints::new("https://api.test", "https://upload.test"),
            UploadProtocol::Legacy,
        );

        let upload = ChunkedUploader::new(client)
            .with_chunk_size(4)
            .upload(&path, "token")
            .await
            .unwrap();

        assert_eq!(upload.media_id.to_string(), "710511363345354753");
        assert_eq!(upload.segments, 2);
        assert!(upload.processing.is_none());

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert!(
            requests
                .iter()
                .all(|r| r.url == "https://upload.test/1.1/media/upload.json")
        );
        let appends: Vec<_> = requests
            .iter()
            .filter(|r| route(r) == Route::Append)
            .collect();
        assert_eq!(appends.len(), 2);
        assert!(
            appends
                .iter()
                .all(|r| r.body.field("media_id") == Some("710511363345354753"))
        );
    }
}
