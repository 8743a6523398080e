use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::MessagingProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Instagram Graph API messaging client. Sends only work for users who
/// have already messaged the business account.
pub struct InstagramProvider {
    access_token: String,
    api_url: String,
    client: reqwest::Client,
}

impl InstagramProvider {
    pub fn new(access_token: String) -> Self {
        Self::with_api_url(
            access_token,
            "https://graph.instagram.com/v22.0/me/messages".to_string(),
        )
    }

    pub fn with_api_url(access_token: String, api_url: String) -> Self {
        Self {
            access_token,
            api_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessagingProvider for InstagramProvider {
    async fn send_message(&self, recipient_id: &str, text: &str) -> anyhow::Result<()> {
        let payload = json!({
            "recipient": {"id": recipient_id},
            "message": {"text": text},
        });

        self.client
            .post(&self.api_url)
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .context("failed to call Instagram send API")?
            .error_for_status()
            .context("Instagram send API returned error")?;

        Ok(())
    }

    async fn fetch_media(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .context("failed to fetch media attachment")?
            .error_for_status()
            .context("media URL returned error")?;

        let bytes = resp
            .bytes()
            .await
            .context("failed to read media attachment body")?;
        Ok(bytes.to_vec())
    }
}
