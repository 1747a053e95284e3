//! Graph API implementation of the messaging platform contract.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

use shared::config::server::PlatformConfig;
use shared::models::Timestamp;

use super::{
    MessagingPlatform, OutboundAttachmentKind, PlatformConversation, PlatformError,
    PlatformMessage,
};

/// Thin reqwest client over the platform's Graph API.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GraphConversation {
    #[serde(default)]
    participants: Option<GraphList<GraphParticipant>>,
    #[serde(default)]
    updated_time: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct GraphParticipant {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(default)]
    from: Option<GraphParticipant>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    attachments: Option<GraphList<GraphMessageAttachment>>,
    #[serde(default)]
    created_time: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
struct GraphMessageAttachment {
    #[serde(default)]
    image_data: Option<GraphMediaRef>,
    #[serde(default)]
    video_data: Option<GraphMediaRef>,
    #[serde(default)]
    file_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMediaRef {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphProfile {
    #[serde(default)]
    profile_pic: Option<String>,
}

impl GraphClient {
    /// Builds a client from platform configuration.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Maps non-success responses into the platform error taxonomy. Rate
    /// limiting is reported both as HTTP 429 and as Graph error code 4.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
        if response.status().is_success() {
            return Ok(response);
        }

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(PlatformError::RateLimited);
        }

        let status = response.status();
        match response.json::<GraphErrorBody>().await {
            Ok(body) if body.error.code == 4 || body.error.code == 17 => {
                Err(PlatformError::RateLimited)
            }
            Ok(body) => Err(PlatformError::Api {
                code: body.error.code,
                message: body.error.message,
            }),
            Err(_) => Err(PlatformError::Malformed(format!(
                "status {status} with unreadable error body"
            ))),
        }
    }

    async fn send_payload(
        &self,
        account_id: &str,
        body: serde_json::Value,
    ) -> Result<(), PlatformError> {
        let response = self
            .http
            .post(self.url(&format!("{account_id}/messages")))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingPlatform for GraphClient {
    #[instrument(name = "platform.send_text", skip(self, text), err)]
    async fn send_text(
        &self,
        account_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.send_payload(
            account_id,
            json!({
                "recipient": { "id": recipient_id },
                "message": { "text": text },
            }),
        )
        .await
    }

    #[instrument(name = "platform.send_attachment", skip(self, url), err)]
    async fn send_attachment(
        &self,
        account_id: &str,
        recipient_id: &str,
        kind: OutboundAttachmentKind,
        url: &str,
    ) -> Result<(), PlatformError> {
        self.send_payload(
            account_id,
            json!({
                "recipient": { "id": recipient_id },
                "message": {
                    "attachment": {
                        "type": kind.as_str(),
                        "payload": { "url": url },
                    }
                },
            }),
        )
        .await
    }

    #[instrument(name = "platform.recent_messages", skip(self), err)]
    async fn recent_messages(
        &self,
        account_id: &str,
        participant_id: &str,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, PlatformError> {
        let fields =
            format!("messages.limit({limit}){{id,from,message,attachments,created_time}}");
        let response = self
            .http
            .get(self.url(&format!("{account_id}/conversations")))
            .bearer_auth(&self.access_token)
            .query(&[
                ("user_id", participant_id),
                ("fields", fields.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await?;

        #[derive(Debug, Deserialize)]
        struct ConversationWithMessages {
            #[serde(default)]
            messages: Option<GraphList<GraphMessage>>,
        }

        let body: GraphList<ConversationWithMessages> = Self::check(response).await?.json().await?;
        let messages = body
            .data
            .into_iter()
            .next()
            .and_then(|conversation| conversation.messages)
            .map(|list| list.data)
            .unwrap_or_default();

        debug!(count = messages.len(), "fetched recent platform messages");

        Ok(messages
            .into_iter()
            .map(|message| {
                let attachment_url = message.attachments.as_ref().and_then(|list| {
                    list.data.iter().find_map(|attachment| {
                        attachment
                            .image_data
                            .as_ref()
                            .and_then(|media| media.url.clone())
                            .or_else(|| {
                                attachment
                                    .video_data
                                    .as_ref()
                                    .and_then(|media| media.url.clone())
                            })
                            .or_else(|| attachment.file_url.clone())
                    })
                });

                PlatformMessage {
                    external_id: message.id,
                    from_id: message.from.map(|from| from.id).unwrap_or_default(),
                    text: message.message.filter(|text| !text.is_empty()),
                    attachment_url,
                    created_at: message.created_time.unwrap_or_else(Timestamp::now),
                }
            })
            .collect())
    }

    #[instrument(name = "platform.list_conversations", skip(self), err)]
    async fn list_conversations(
        &self,
        account_id: &str,
    ) -> Result<Vec<PlatformConversation>, PlatformError> {
        let response = self
            .http
            .get(self.url(&format!("{account_id}/conversations")))
            .bearer_auth(&self.access_token)
            .query(&[("fields", "participants,updated_time")])
            .send()
            .await?;

        let body: GraphList<GraphConversation> = Self::check(response).await?.json().await?;

        Ok(body
            .data
            .into_iter()
            .filter_map(|conversation| {
                // The listing includes our own account among participants;
                // the counterpart is the one that is not us.
                let counterpart = conversation
                    .participants?
                    .data
                    .into_iter()
                    .find(|participant| participant.id != account_id)?;

                Some(PlatformConversation {
                    participant_id: counterpart.id,
                    participant_name: counterpart.username,
                    updated_at: conversation.updated_time.unwrap_or_else(Timestamp::now),
                })
            })
            .collect())
    }

    #[instrument(name = "platform.profile_picture", skip(self), err)]
    async fn profile_picture(
        &self,
        participant_id: &str,
    ) -> Result<Option<String>, PlatformError> {
        let response = self
            .http
            .get(self.url(participant_id))
            .bearer_auth(&self.access_token)
            .query(&[("fields", "profile_pic")])
            .send()
            .await?;

        let profile: GraphProfile = Self::check(response).await?.json().await?;
        Ok(profile.profile_pic)
    }
}
