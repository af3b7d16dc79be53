//! Waiting out server-side transcoding after FINALIZE.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::domain::{MediaId, ProcessingInfo, ProcessingState};
use crate::services::cancel::CancelFlag;
use crate::services::clock::Sleeper;
use crate::services::error::ProcessingError;
use crate::services::twitter::XClient;

/// How processing is tracked once FINALIZE reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusStrategy {
    /// Re-poll the status endpoint until a terminal state.
    #[default]
    Poll,
    /// Wait once for the suggested delay and assume the media is ready.
    FinalizeOnly,
}

#[derive(Clone)]
pub struct ProcessingMonitor {
    client: XClient,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancelFlag,
    strategy: StatusStrategy,
}

impl ProcessingMonitor {
    pub fn new(client: XClient, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            client,
            sleeper,
            cancel: CancelFlag::default(),
            strategy: StatusStrategy::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_strategy(mut self, strategy: StatusStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub async fn await_ready(
        &self,
        media_id: &MediaId,
        initial: Option<ProcessingInfo>,
        access_token: &str,
    ) -> Result<(), ProcessingError> {
        self.await_ready_with_progress(media_id, initial, access_token, |_| {})
            .await
    }

    /// Blocks until the media is consumable. No processing report means it
    /// already is. There is no poll limit; cancellation is the only way out
    /// of a media that stays in progress.
    ///
    /// The status endpoint is advisory: when it errors, the media is assumed
    /// ready and post creation retries absorb any remaining lag.
    pub async fn await_ready_with_progress<F>(
        &self,
        media_id: &MediaId,
        initial: Option<ProcessingInfo>,
        access_token: &str,
        on_wait: F,
    ) -> Result<(), ProcessingError>
    where
        F: Fn(&ProcessingInfo),
    {
        let Some(mut info) = initial else {
            debug!("[processing] {media_id} reported no processing, ready");
            return Ok(());
        };

        loop {
            match info.state {
                ProcessingState::Succeeded => {
                    info!("[processing] {media_id} ready");
                    return Ok(());
                }
                ProcessingState::Failed => {
                    return Err(ProcessingError::Failed {
                        media_id: media_id.clone(),
                        reason: info
                            .error
                            .unwrap_or_else(|| "processing failed".to_string()),
                    });
                }
                ProcessingState::Pending | ProcessingState::InProgress => {}
            }

            on_wait(&info);
            let delay = info.poll_delay();
            debug!(
                "[processing] {media_id} {:?} ({}%), next check in {:?}",
                info.state,
                info.progress_percent.unwrap_or(0),
                delay
            );
            if self.cancel.sleep(self.sleeper.as_ref(), delay).await {
                return Err(ProcessingError::Cancelled {
                    media_id: media_id.clone(),
                });
            }

            if self.strategy == StatusStrategy::FinalizeOnly {
                debug!("[processing] {media_id} waited once, assuming ready");
                return Ok(());
            }

            match self
                .cancel
                .run(self.client.check_status(access_token, media_id))
                .await
            {
                None => {
                    return Err(ProcessingError::Cancelled {
                        media_id: media_id.clone(),
                    });
                }
                Some(Ok(Some(next))) => info = next,
                Some(Ok(None)) => {
                    debug!("[processing] {media_id} status has no processing_info, ready");
                    return Ok(());
                }
                Some(Err(err)) => {
                    warn!("[processing] status check for {media_id} unusable, assuming ready: {err}");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::testing::{FakeTransport, RecordingSleeper, Route, client_for, json_response, respond, route};

    fn media() -> MediaId {
        MediaId::new("1880028106020515840").unwrap()
    }

    fn status_body(state: &str, check_after_secs: u32) -> serde_json::Value {
        serde_json::json!({
            "data": {
                "id": "1880028106020515840",
                "processing_info": { "state": state, "check_after_secs": check_after_secs }
            }
        })
    }

    #[tokio::test]
    async fn no_processing_info_is_ready_without_polling() {
        let transport = FakeTransport::new(|_| respond(500, "should not be called"));
        let sleeper = RecordingSleeper::new();
        let monitor = ProcessingMonitor::new(client_for(transport.clone()), sleeper.clone());

        monitor.await_ready(&media(), None, "token").await.unwrap();

        assert!(transport.requests().is_empty());
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn failed_at_finalize_is_not_polled() {
        let transport = FakeTransport::new(|_| respond(500, "should not be called"));
        let sleeper = RecordingSleeper::new();
        let monitor = ProcessingMonitor::new(client_for(transport.clone()), sleeper.clone());
        let mut info = ProcessingInfo::new(ProcessingState::Failed, 0);
        info.error = Some("InvalidMedia".into());

        let err = monitor.await_ready(&media(), Some(info), "token").await.unwrap_err();

        assert!(matches!(err, ProcessingError::Failed { ref reason, .. } if reason == "InvalidMedia"));
        assert!(transport.requests().is_empty());
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn polls_until_succeeded_with_floored_waits() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let transport = FakeTransport::new(move |req| {
            assert_eq!(route(req), Route::Status);
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => json_response(200, status_body("in_progress", 5)),
                _ => json_response(200, status_body("succeeded", 0)),
            }
        });
        let sleeper = RecordingSleeper::new();
        let monitor = ProcessingMonitor::new(client_for(transport.clone()), sleeper.clone());

        monitor
            .await_ready(
                &media(),
                Some(ProcessingInfo::new(ProcessingState::Pending, 0)),
                "token",
            )
            .await
            .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(
            sleeper.slept(),
            vec![Duration::from_secs(2), Duration::from_secs(5)]
        );
    }

    #[tokio::test]
    async fn failed_status_is_reported() {
        let transport = FakeTransport::new(|_| json_response(200, status_body("failed", 0)));
        let monitor = ProcessingMonitor::new(client_for(transport), RecordingSleeper::new());

        let err = monitor
            .await_ready(
                &media(),
                Some(ProcessingInfo::new(ProcessingState::InProgress, 1)),
                "token",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Failed { .. }));
    }

    #[tokio::test]
    async fn broken_status_endpoint_means_ready() {
        let transport = FakeTransport::new(|_| respond(404, r#"{"errors":[{"code":34}]}"#));
        let sleeper = RecordingSleeper::new();
        let monitor = ProcessingMonitor::new(client_for(transport.clone()), sleeper.clone());

        monitor
            .await_ready(
                &media(),
                Some(ProcessingInfo::new(ProcessingState::Pending, 3)),
                "token",
            )
            .await
            .unwrap();

        assert_eq!(transport.count(Route::Status), 1);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(3)]);
    }

    #[tokio::test]
    async fn finalize_only_waits_once_without_status_calls() {
        let transport = FakeTransport::new(|_| respond(500, "should not be called"));
        let sleeper = RecordingSleeper::new();
        let monitor = ProcessingMonitor::new(client_for(transport.clone()), sleeper.clone())
            .with_strategy(StatusStrategy::FinalizeOnly);

        monitor
            .await_ready(
                &media(),
                Some(ProcessingInfo::new(ProcessingState::InProgress, 7)),
                "token",
            )
            .await
            .unwrap();

        assert!(transport.requests().is_empty());
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(7)]);
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let transport = FakeTransport::new(|_| json_response(200, status_body("in_progress", 1)));
        let cancel = CancelFlag::new();
        cancel.cancel();
        let monitor = ProcessingMonitor::new(client_for(transport.clone()), RecordingSleeper::new())
            .with_cancel(cancel);

        let err = monitor
            .await_ready(
                &media(),
                Some(ProcessingInfo::new(ProcessingState::Pending, 1)),
                "token",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessingError::Cancelled { .. }));
        assert!(transport.requests().is_empty());
    }
}
