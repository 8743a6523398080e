use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::queries;
use crate::models::InboundMessage;
use crate::services::ai::prompts;
use crate::services::assistant;
use crate::state::AppState;

const IMAGE_PENDING_TTL_SECS: i64 = 60 * 60;
const IMAGE_NOTE_TTL_SECS: i64 = 60 * 10;

// ── Subscription verification (GET) ──

#[derive(Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    if let Some(challenge) = params.challenge {
        // token check is skipped when unconfigured (dev mode)
        let token_ok = state.config.ig_verify_token.is_empty()
            || params.verify_token.as_deref() == Some(state.config.ig_verify_token.as_str());
        if token_ok {
            return challenge.into_response();
        }
        tracing::warn!(mode = ?params.mode, "webhook verification with wrong token");
        return (StatusCode::FORBIDDEN, "Verification token mismatch").into_response();
    }
    "This is the webhook endpoint.".into_response()
}

// ── Event delivery (POST) ──

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Deserialize)]
pub struct MessagingEvent {
    pub sender: Actor,
    pub recipient: Actor,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(default)]
    pub reaction: Option<Reaction>,
}

#[derive(Debug, Deserialize)]
pub struct Actor {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: AttachmentPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttachmentPayload {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Reaction {
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

fn ack() -> Response {
    (StatusCode::OK, "EVENT_RECEIVED").into_response()
}

fn valid_signature(app_secret: &str, signature: &str, body: &[u8]) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    expected.eq_ignore_ascii_case(hex_digest)
}

/// Inbound message events. Acknowledges fast and defers all real work: the
/// message is queued and a processing run is scheduled after the grace
/// window; image attachments fan out to vision analysis in the background.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // signature check is skipped when no app secret is configured (dev mode)
    if !state.config.ig_app_secret.is_empty() {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !valid_signature(&state.config.ig_app_secret, signature, &body) {
            tracing::warn!("webhook delivery with missing or invalid signature");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable webhook payload");
            return (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD").into_response();
        }
    };

    let Some(event) = payload.entry.first().and_then(|e| e.messaging.first()) else {
        tracing::warn!("webhook payload without entry/messaging");
        return (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD").into_response();
    };

    let sender_id = event.sender.id.clone();
    tracing::info!(sender_id = %sender_id, "incoming webhook event");

    // test-mode allowlist: when configured, everyone else is acknowledged
    // and dropped
    if !state.config.allowed_sender_ids.is_empty()
        && !state.config.allowed_sender_ids.contains(&sender_id)
    {
        tracing::info!(sender_id = %sender_id, "sender not allowlisted, dropping event");
        return ack();
    }

    // heart reaction from the studio's own account = human takeover
    if let Some(reaction) = &event.reaction {
        if sender_id == state.config.reaction_bot_sender_id
            && reaction.emoji.as_deref().is_some_and(|e| e.contains('\u{2764}'))
        {
            let customer_id = event.recipient.id.clone();
            tracing::info!(customer_id = %customer_id, action = ?reaction.action, "heart reaction, muting customer");
            assistant::mute_user(&state, &customer_id);
            assistant::clear_pending(&state, &customer_id);
        }
        return ack();
    }

    // human takeover active: nothing gets queued for this user
    if assistant::is_muted(&state, &sender_id) {
        tracing::info!(sender_id = %sender_id, "user muted, dropping event");
        return ack();
    }

    let Some(message) = &event.message else {
        return ack();
    };

    let image_urls: Vec<String> = message
        .attachments
        .iter()
        .filter(|a| a.kind == "image")
        .filter_map(|a| a.payload.url.clone())
        .collect();

    let text = message.text.as_deref().map(|t| t.trim().to_string());
    if text.as_deref().map_or(true, |t| t.is_empty()) && image_urls.is_empty() {
        return ack();
    }

    let now = Utc::now().naive_utc();

    if !image_urls.is_empty() {
        let bumped = {
            let db = state.db.lock().unwrap();
            queries::bump_counter(
                &db,
                &assistant::pending_images_key(&sender_id),
                image_urls.len() as i64,
                &(now + Duration::seconds(IMAGE_PENDING_TTL_SECS)),
                &now,
            )
        };
        if let Err(e) = bumped {
            tracing::error!(error = %e, "failed to track pending images");
            return (StatusCode::SERVICE_UNAVAILABLE, "STORE_ERROR").into_response();
        }
        for (i, url) in image_urls.iter().enumerate() {
            tokio::spawn(analyze_image_task(
                Arc::clone(&state),
                sender_id.clone(),
                url.clone(),
                i + 1,
            ));
        }
    }

    let inbound = InboundMessage {
        text: text.filter(|t| !t.is_empty()),
        image_count: image_urls.len() as u32,
    };
    let queued = {
        let db = state.db.lock().unwrap();
        queries::enqueue_message(
            &db,
            &sender_id,
            &inbound,
            &now,
            &(now + Duration::seconds(state.config.queue_ttl_secs)),
        )
    };
    if let Err(e) = queued {
        tracing::error!(error = %e, "failed to queue inbound message");
        return (StatusCode::SERVICE_UNAVAILABLE, "STORE_ERROR").into_response();
    }

    assistant::schedule_processing(&state, &sender_id);

    // housekeeping piggybacks on live traffic
    {
        let db = state.db.lock().unwrap();
        let _ = queries::purge_expired(&db, &now);
    }

    ack()
}

/// Fetch one attachment and run vision analysis on it. The pending counter
/// is decremented on success and failure alike so a broken image can never
/// stall the conversation for the counter's whole TTL.
async fn analyze_image_task(state: Arc<AppState>, user_id: String, url: String, index: usize) {
    let analysis = async {
        let bytes = state.messaging.fetch_media(&url).await?;
        let text = state
            .llm
            .analyze_image(&bytes, prompts::VISION_ANALYSIS, prompts::VISION_USER_PROMPT)
            .await?;
        anyhow::Ok(text)
    }
    .await;

    let now = Utc::now().naive_utc();
    let db = state.db.lock().unwrap();
    match analysis {
        Ok(text) => {
            if let Err(e) = queries::push_image_note(
                &db,
                &user_id,
                &format!("Image {index}: {text}"),
                &now,
                &(now + Duration::seconds(IMAGE_NOTE_TTL_SECS)),
            ) {
                tracing::error!(error = %e, user_id = %user_id, "failed to store image analysis");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, user_id = %user_id, index, "image analysis failed");
        }
    }
    let _ = queries::bump_counter(
        &db,
        &assistant::pending_images_key(&user_id),
        -1,
        &(now + Duration::seconds(IMAGE_PENDING_TTL_SECS)),
        &now,
    );
}
