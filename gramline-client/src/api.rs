//! HTTP client for the Gramline server API.

use anyhow::{Context, Result};
use reqwest::Client;
use url::Url;
use uuid::Uuid;

use shared::models::{
    ConversationListResponse, MessageContent, MessagePage, SendMessageRequest, SendMessageResponse,
};

/// Bearer-token client over the server's dashboard API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    api_base: Url,
    token: String,
}

impl ApiClient {
    /// Builds a client against a server base URL.
    ///
    /// # Errors
    /// Returns an error when the server URL is not parseable.
    pub fn new(server: &str, token: String) -> Result<Self> {
        let server_url = Url::parse(server).context("invalid server URL")?;
        let api_base = server_url.join("api/").context("invalid API base")?;

        Ok(Self {
            http: Client::new(),
            api_base,
            token,
        })
    }

    /// Lists the workspace's conversations, newest activity first.
    pub async fn conversations(&self) -> Result<ConversationListResponse> {
        let endpoint = self
            .api_base
            .join("conversations")
            .context("invalid conversations endpoint")?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to fetch conversations")?
            .error_for_status()
            .context("conversation listing rejected")?;

        Ok(response.json().await?)
    }

    /// Fetches one history page for a conversation.
    pub async fn message_page(
        &self,
        conversation: Uuid,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<MessagePage> {
        let endpoint = self
            .api_base
            .join(&format!("conversations/{conversation}/messages"))
            .context("invalid messages endpoint")?;

        let mut request = self
            .http
            .get(endpoint)
            .bearer_auth(&self.token)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request
            .send()
            .await
            .context("failed to fetch messages")?
            .error_for_status()
            .context("message page rejected")?;

        Ok(response.json().await?)
    }

    /// Fetches the newest messages, asking the server to refresh from the
    /// platform first. Used by the post-send fallback.
    pub async fn latest_messages(&self, conversation: Uuid, limit: usize) -> Result<MessagePage> {
        let endpoint = self
            .api_base
            .join(&format!("conversations/{conversation}/messages/latest"))
            .context("invalid latest endpoint")?;

        let response = self
            .http
            .get(endpoint)
            .bearer_auth(&self.token)
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .context("failed to fetch latest messages")?
            .error_for_status()
            .context("latest messages rejected")?;

        Ok(response.json().await?)
    }

    /// Issues an outbound send. The confirmed message is not returned;
    /// confirmation arrives over the stream or the fallback fetch.
    pub async fn send_message(
        &self,
        conversation: Uuid,
        content: MessageContent,
    ) -> Result<SendMessageResponse> {
        let endpoint = self
            .api_base
            .join(&format!("conversations/{conversation}/messages"))
            .context("invalid send endpoint")?;

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.token)
            .json(&SendMessageRequest { content })
            .send()
            .await
            .context("send request failed")?
            .error_for_status()
            .context("send rejected")?;

        Ok(response.json().await?)
    }

    /// Opens the live event stream. The response body is an SSE byte stream.
    pub async fn open_stream(&self) -> Result<reqwest::Response> {
        let endpoint = self.api_base.join("stream").context("invalid stream endpoint")?;

        self.http
            .get(endpoint)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("stream connection failed")?
            .error_for_status()
            .context("stream rejected")
    }
}
