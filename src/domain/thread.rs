//! Thread model definitions

use serde::{Deserialize, Serialize};

use super::media::MediaId;

/// Outcome of publishing a thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Posted,
    PartialFailed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Posted => "posted",
            ThreadStatus::PartialFailed => "partial_failed",
        }
    }
}

/// A post created on the platform as part of a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadPost {
    pub post_id: String,
    pub media_id: Option<MediaId>,
    pub text: String,
    pub reply_to_post_id: Option<String>,
}

/// Posts created by a successful publish, in thread order, plus the progress
/// messages emitted along the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishedThread {
    pub posts: Vec<ThreadPost>,
    pub trail: Vec<String>,
}

impl PublishedThread {
    pub fn first_post_id(&self) -> Option<&str> {
        self.posts.first().map(|p| p.post_id.as_str())
    }

    /// True when every post after the first replies to its predecessor.
    pub fn is_chained(&self) -> bool {
        is_reply_chain(&self.posts)
    }
}

/// Checks the reply invariant over an ordered slice of posts.
pub fn is_reply_chain(posts: &[ThreadPost]) -> bool {
    posts.first().is_none_or(|p| p.reply_to_post_id.is_none())
        && posts
            .windows(2)
            .all(|w| w[1].reply_to_post_id.as_deref() == Some(w[0].post_id.as_str()))
}
