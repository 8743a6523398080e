pub mod instagram;

use async_trait::async_trait;

/// Longest message the platform accepts before we split.
pub const MESSAGE_MAX_LENGTH: usize = 800;

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_message(&self, recipient_id: &str, text: &str) -> anyhow::Result<()>;

    /// Fetch a media attachment (tattoo reference photo) by URL.
    async fn fetch_media(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// Split a long message at natural break points: the last newline before
/// the limit, else the last space, else a hard cutoff. Splits are
/// char-boundary safe so Greek text never panics the sender.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = vec![];
    let mut rest = text;
    while rest.chars().count() > max_len {
        let cut = rest
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..cut];

        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(cut);

        let chunk = rest[..split_at].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = rest[split_at..].trim_start();
    }
    if !rest.is_empty() {
        chunks.push(rest.trim().to_string());
    }
    chunks
}

/// Send `text` to a recipient, as multiple ordered messages when it
/// exceeds the platform limit.
pub async fn send_in_chunks(
    provider: &dyn MessagingProvider,
    recipient_id: &str,
    text: &str,
) -> anyhow::Result<()> {
    let chunks = split_message(text, MESSAGE_MAX_LENGTH);
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        if total > 1 {
            tracing::info!(recipient_id, chunk = i + 1, total, "sending message chunk");
        }
        provider.send_message(recipient_id, chunk).await?;
    }
    Ok(())
}
