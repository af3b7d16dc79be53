use log::info;
use serde::Serialize;

use crate::domain::{MediaId, ThreadPost};
use crate::services::error::PostError;
use crate::services::twitter::XClient;

/// Body of `POST /2/tweets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<PostMedia>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<PostReply>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostMedia {
    pub media_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostReply {
    pub in_reply_to_tweet_id: String,
}

impl PostRequest {
    pub fn new(text: &str, media_id: Option<&MediaId>, reply_to: Option<&str>) -> Self {
        Self {
            text: text.to_string(),
            media: media_id.map(|id| PostMedia {
                media_ids: vec![id.in_body().value().to_string()],
            }),
            reply: reply_to.map(|parent| PostReply {
                in_reply_to_tweet_id: parent.to_string(),
            }),
        }
    }
}

/// Creates single posts. One call, no retry.
#[derive(Clone)]
pub struct PostComposer {
    client: XClient,
}

impl PostComposer {
    pub fn new(client: XClient) -> Self {
        Self { client }
    }

    pub async fn create_post(
        &self,
        text: &str,
        media_id: Option<&MediaId>,
        reply_to_post_id: Option<&str>,
        access_token: &str,
    ) -> Result<ThreadPost, PostError> {
        let request = PostRequest::new(text, media_id, reply_to_post_id);
        let post_id = self.client.post_tweet(access_token, &request).await?;
        info!(
            "[post] created {post_id}{}",
            reply_to_post_id
                .map(|parent| format!(" in reply to {parent}"))
                .unwrap_or_default()
        );

        Ok(ThreadPost {
            post_id,
            media_id: media_id.cloned(),
            text: request.text,
            reply_to_post_id: reply_to_post_id.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::http::RequestBody;
    use crate::testing::{FakeTransport, client_for, json_response, respond};

    #[test]
    fn optional_sections_are_omitted() {
        let plain = serde_json::to_value(PostRequest::new("hello", None, None)).unwrap();
        assert_eq!(plain, serde_json::json!({ "text": "hello" }));

        let id = MediaId::new("555").unwrap();
        let reply = serde_json::to_value(PostRequest::new("part 2", Some(&id), Some("100"))).unwrap();
        assert_eq!(
            reply,
            serde_json::json!({
                "text": "part 2",
                "media": { "media_ids": ["555"] },
                "reply": { "in_reply_to_tweet_id": "100" }
            })
        );
    }

    #[tokio::test]
    async fn created_post_records_its_parent() {
        let transport = FakeTransport::new(|_| {
            json_response(201, serde_json::json!({ "data": { "id": "2001", "text": "hi" } }))
        });
        let composer = PostComposer::new(client_for(transport.clone()));
        let id = MediaId::new("m-1").unwrap();

        let post = composer
            .create_post("hi", Some(&id), Some("2000"), "token")
            .await
            .unwrap();

        assert_eq!(post.post_id, "2001");
        assert_eq!(post.reply_to_post_id.as_deref(), Some("2000"));
        assert_eq!(post.media_id, Some(id));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bearer.as_deref(), Some("token"));
        assert!(matches!(sent[0].body, RequestBody::Json(_)));
    }

    #[tokio::test]
    async fn success_without_id_is_malformed() {
        let transport = FakeTransport::new(|_| respond(200, r#"{"errors":[{"message":"media not found"}]}"#));
        let composer = PostComposer::new(client_for(transport));

        let err = composer.create_post("hi", None, None, "token").await.unwrap_err();
        assert!(matches!(err, PostError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn rejected_post_keeps_status_and_body() {
        let transport = FakeTransport::new(|_| respond(403, "forbidden"));
        let composer = PostComposer::new(client_for(transport));

        match composer.create_post("hi", None, None, "token").await {
            Err(PostError::Api { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
