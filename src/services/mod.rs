pub mod auth;
pub mod cancel;
pub mod clock;
pub mod composer;
pub mod error;
pub mod http;
pub mod processing;
pub mod progress;
pub mod protocol;
pub mod publisher;
pub mod twitter;
pub mod uploader;

pub use auth::{StaticTokenProvider, StoredTokenProvider, TokenProvider};
pub use cancel::CancelFlag;
pub use clock::{Sleeper, TokioSleeper};
pub use composer::{PostComposer, PostRequest};
pub use error::{
    ApiError, PhaseError, PostError, ProcessingError, PublishFailure, PublishPhase, UploadError,
};
pub use http::{HttpTransport, ReqwestTransport};
pub use processing::{ProcessingMonitor, StatusStrategy};
pub use progress::{NoProgress, ProgressEvent, ProgressSink};
pub use protocol::{Endpoints, UploadProtocol};
pub use publisher::{RetryPolicy, ShareJob, SharePart, ThreadPublisher};
pub use twitter::{XClient, XUser};
pub use uploader::ChunkedUploader;
