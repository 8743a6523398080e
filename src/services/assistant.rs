//! The deferred conversation worker.
//!
//! The webhook only queues inbound messages; after a short grace window
//! (so rapid-fire DMs become one turn) this module drains the queue,
//! classifies the intent, retrieves similar past exchanges, runs the chat
//! with calendar tools, and sends the reply.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{NaiveDate, NaiveTime, Utc};
use rand::Rng;
use serde_json::{json, Value};

use crate::db::queries;
use crate::errors::Error;
use crate::models::{
    BookingDetails, Conversation, ConversationMessage, IntentCategory, IntentSignal,
    IntentSubcategory,
};
use crate::services::ai::{
    intent, prompts, tools, ChatMessage, ChatOutcome, ChatRequest, ToolInvocation,
};
use crate::services::booking::format_available_slots_message;
use crate::services::messaging;
use crate::services::pricing;
use crate::services::retrieval::{self, ExampleCollection};
use crate::state::AppState;
use crate::validation::{self, MAX_TEXT_LENGTH};

const PROCESSING_LOCK_TTL_SECS: i64 = 30;
const IMAGE_RETRY_DELAY_SECS: u64 = 3;
const MAX_TOOL_ROUNDS: u32 = 3;

fn mute_key(user_id: &str) -> String {
    format!("mute:{user_id}")
}

fn lock_key(user_id: &str) -> String {
    format!("lock:{user_id}")
}

fn scheduled_key(user_id: &str) -> String {
    format!("scheduled:{user_id}")
}

pub fn pending_images_key(user_id: &str) -> String {
    format!("images_pending:{user_id}")
}

/// Human takeover: silence the bot for this user.
pub fn mute_user(state: &AppState, user_id: &str) {
    let now = Utc::now().naive_utc();
    let until = now + chrono::Duration::seconds(state.config.mute_secs);
    let db = state.db.lock().unwrap();
    if let Err(e) = queries::set_flag(&db, &mute_key(user_id), "1", &until) {
        tracing::error!(error = %e, user_id, "failed to set mute flag");
    }
}

pub fn is_muted(state: &AppState, user_id: &str) -> bool {
    let now = Utc::now().naive_utc();
    let db = state.db.lock().unwrap();
    queries::get_flag(&db, &mute_key(user_id), &now)
        .unwrap_or(None)
        .is_some()
}

/// Drop everything queued for a user (used on human takeover).
pub fn clear_pending(state: &AppState, user_id: &str) {
    let db = state.db.lock().unwrap();
    let _ = queries::clear_queue(&db, user_id);
    let _ = queries::delete_flag(&db, &scheduled_key(user_id));
}

/// Arrange a processing run after the grace window (plus jitter, so the
/// bot does not answer suspiciously instantly). The scheduled marker
/// ensures only one run is pending per user.
pub fn schedule_processing(state: &Arc<AppState>, user_id: &str) {
    let now = Utc::now().naive_utc();
    let grace = state.config.grace_window_secs + rand::thread_rng().gen_range(1..=10);

    let acquired = {
        let db = state.db.lock().unwrap();
        queries::try_set_flag(
            &db,
            &scheduled_key(user_id),
            "1",
            &(now + chrono::Duration::seconds(grace as i64 + 5)),
            &now,
        )
        .unwrap_or(false)
    };
    if !acquired {
        return;
    }

    spawn_processing(
        Arc::clone(state),
        user_id.to_string(),
        StdDuration::from_secs(grace),
    );
}

pub fn spawn_processing(state: Arc<AppState>, user_id: String, delay: StdDuration) {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        process_user_messages(state, user_id).await;
    });
}

/// Drain and answer everything queued for one user. Serialized per user by
/// a test-and-set lock with a short TTL so a crashed worker cannot wedge
/// the conversation.
pub async fn process_user_messages(state: Arc<AppState>, user_id: String) {
    let now = Utc::now().naive_utc();
    let acquired = {
        let db = state.db.lock().unwrap();
        queries::try_set_flag(
            &db,
            &lock_key(&user_id),
            "1",
            &(now + chrono::Duration::seconds(PROCESSING_LOCK_TTL_SECS)),
            &now,
        )
        .unwrap_or(false)
    };
    if !acquired {
        tracing::debug!(user_id = %user_id, "another worker holds the processing lock");
        return;
    }

    if let Err(e) = run_batch(&state, &user_id).await {
        tracing::error!(error = %e, user_id = %user_id, "message processing failed");
        if let Err(send_err) =
            messaging::send_in_chunks(state.messaging.as_ref(), &user_id, prompts::FALLBACK_REPLY)
                .await
        {
            tracing::error!(error = %send_err, user_id = %user_id, "failed to send fallback reply");
        }
    }

    let db = state.db.lock().unwrap();
    let _ = queries::delete_flag(&db, &lock_key(&user_id));
}

async fn run_batch(state: &Arc<AppState>, user_id: &str) -> anyhow::Result<()> {
    let now = Utc::now().naive_utc();

    if is_muted(state, user_id) {
        tracing::info!(user_id, "user muted, skipping automated reply");
        return Ok(());
    }

    {
        let db = state.db.lock().unwrap();
        queries::delete_flag(&db, &scheduled_key(user_id))?;
    }

    let pending = {
        let db = state.db.lock().unwrap();
        queries::get_flag(&db, &pending_images_key(user_id), &now)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
    };
    if pending > 0 {
        tracing::debug!(user_id, pending, "image analysis still running, retrying shortly");
        spawn_processing(
            Arc::clone(state),
            user_id.to_string(),
            StdDuration::from_secs(IMAGE_RETRY_DELAY_SECS),
        );
        return Ok(());
    }

    let (queued, image_notes) = {
        let db = state.db.lock().unwrap();
        (
            queries::queued_messages(&db, user_id, &now)?,
            queries::image_notes(&db, user_id, &now)?,
        )
    };
    if queued.is_empty() && image_notes.is_empty() {
        return Ok(());
    }

    // One combined turn for the model; a text-only variant feeds retrieval
    // so photo placeholders do not pollute the embedding.
    let mut combined = String::new();
    let mut retrieval_text = String::new();
    for msg in &queued {
        if let Some(text) = msg.text.as_deref().filter(|t| !t.trim().is_empty()) {
            combined.push_str(text.trim());
            combined.push('\n');
            retrieval_text.push_str(text.trim());
            retrieval_text.push('\n');
        }
        for _ in 0..msg.image_count {
            retrieval_text.push_str("The customer sent a photo\n");
        }
    }
    for note in &image_notes {
        combined.push_str(note);
        combined.push('\n');
    }
    let combined = combined.trim().to_string();
    let retrieval_text = retrieval_text.trim().to_string();

    if combined.is_empty() {
        let db = state.db.lock().unwrap();
        queries::clear_queue(&db, user_id)?;
        return Ok(());
    }

    let conv_ttl = chrono::Duration::seconds(state.config.conversation_ttl_secs);
    let mut conv = {
        let db = state.db.lock().unwrap();
        queries::get_conversation(&db, user_id, &now)?
    }
    .unwrap_or_else(|| Conversation::new(user_id, now, conv_ttl));

    conv.push(
        ConversationMessage::user(combined.as_str()),
        state.config.max_history_length,
    );
    conv.touch(now, conv_ttl);
    {
        let db = state.db.lock().unwrap();
        queries::save_conversation(&db, &conv)?;
    }

    let reply = generate_reply(state, user_id, &conv, &retrieval_text, &image_notes).await;

    if let Err(e) = messaging::send_in_chunks(state.messaging.as_ref(), user_id, &reply).await {
        tracing::error!(error = %e, user_id, "failed to send reply");
    }

    conv.push(
        ConversationMessage::assistant(reply.as_str()),
        state.config.max_history_length,
    );
    conv.touch(now, conv_ttl);
    {
        let db = state.db.lock().unwrap();
        queries::save_conversation(&db, &conv)?;
        queries::clear_queue(&db, user_id)?;
        queries::clear_image_notes(&db, user_id)?;
    }

    Ok(())
}

/// Classification, retrieval, prompt assembly and the bounded tool loop.
/// Always returns something sendable; failures degrade to the fallback.
async fn generate_reply(
    state: &Arc<AppState>,
    user_id: &str,
    conv: &Conversation,
    retrieval_text: &str,
    image_notes: &[String],
) -> String {
    let today = state.arbiter.today_local();
    let latest = conv
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or_default();

    let report = intent::classify_intents(
        state.llm.as_ref(),
        latest,
        conv.last_assistant_message(),
        today,
        &state.config.model_classify,
    )
    .await;
    let primary = report.primary();
    let secondary = report.secondary_categories(&primary);

    tracing::info!(
        user_id,
        intent = primary.primary.as_str(),
        subcategory = ?primary.subcategory,
        "handling message"
    );

    let collection = if primary.primary == IntentCategory::Pricing {
        ExampleCollection::Pricing
    } else {
        ExampleCollection::Conversations
    };
    let examples = retrieval::retrieve_similar(
        state.embedder.as_ref(),
        state.index.as_ref(),
        retrieval_text,
        collection,
        Some(primary.primary.as_str()),
    )
    .await;

    let (mut system, temperature, tool_schemas) =
        build_system_prompt(&primary, &secondary, image_notes, today);

    if !examples.is_empty() {
        system.push_str("\n\n## Similar past conversations:\n");
        for (i, example) in examples.iter().enumerate() {
            system.push_str(&format!(
                "\nExample {}:\nCustomer: {}\nReply: {}\n",
                i + 1,
                example.query,
                example.response
            ));
        }
        system.push_str("\nMatch the way the team replied in these examples.");
    }

    let mut messages = vec![ChatMessage::system(system)];
    for m in &conv.messages {
        messages.push(match m.role.as_str() {
            "assistant" => ChatMessage::assistant(m.content.as_str()),
            _ => ChatMessage::user(m.content.as_str()),
        });
    }

    let mut request = ChatRequest {
        messages,
        temperature,
        tools: tool_schemas,
        json_response: false,
        model: None,
    };

    let mut outcome = match state.llm.chat(&request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, user_id, "chat completion failed");
            return prompts::FALLBACK_REPLY.to_string();
        }
    };

    let mut rounds = 0;
    while let ChatOutcome::ToolCalls(calls) = outcome {
        rounds += 1;
        if rounds > MAX_TOOL_ROUNDS {
            tracing::warn!(user_id, "tool round limit reached");
            return prompts::FALLBACK_REPLY.to_string();
        }

        request.messages.push(ChatMessage::assistant_tool_calls(&calls));
        for call in &calls {
            tracing::info!(user_id, tool = %call.name, "executing calendar tool");
            let result = execute_tool(state, user_id, call).await;
            request
                .messages
                .push(ChatMessage::tool(call.id.clone(), result.to_string()));
        }

        request.messages[0] = ChatMessage::system(prompts::TOOL_FOLLOWUP);
        outcome = match state.llm.chat(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, user_id, "tool follow-up completion failed");
                return prompts::FALLBACK_REPLY.to_string();
            }
        };
    }

    outcome.text_or(prompts::FALLBACK_REPLY)
}

fn build_system_prompt(
    primary: &IntentSignal,
    secondary: &[IntentCategory],
    image_notes: &[String],
    today: NaiveDate,
) -> (String, f32, Option<Vec<Value>>) {
    let mut temperature = 1.0f32;
    let mut tool_schemas = None;
    let mut system = match primary.primary {
        IntentCategory::Pricing => prompts::PRICING.to_string(),
        IntentCategory::BookingRequest => prompts::BOOKING.to_string(),
        IntentCategory::StudioInformation => prompts::INFORMATION.to_string(),
        IntentCategory::FollowUp => prompts::FOLLOW_UP.to_string(),
        IntentCategory::Other => prompts::PERSONA.to_string(),
    };

    match primary.primary {
        IntentCategory::Pricing => {
            if image_notes.is_empty() {
                system.push_str(
                    "\n\nThe customer has not sent a usable photo: politely ask for a photo or a clear description of the tattoo they want.",
                );
            } else {
                temperature = 0.3;
                system.push_str("\n\n# Photo analyses:\n");
                for note in image_notes {
                    system.push_str(note);
                    system.push('\n');
                }

                let prices: Vec<f64> = image_notes
                    .iter()
                    .filter_map(|note| pricing::parse_estimate(note))
                    .map(|estimate| pricing::base_price(&estimate))
                    .collect();
                match prices.len() {
                    0 => {}
                    1 => {
                        let (smaller, larger) = pricing::quote_single(prices[0]);
                        system.push_str(&format!(
                            "\n# Computed quote:\nOffer the two print sizes at {smaller}\u{20ac} and {larger}\u{20ac}."
                        ));
                    }
                    n => {
                        let total = pricing::quote_total(&prices);
                        system.push_str(&format!(
                            "\n# Computed quote:\nThe discounted total for the {n} tattoos is {total}\u{20ac}. Give only this total."
                        ));
                    }
                }
            }

            if secondary.contains(&IntentCategory::BookingRequest) {
                system.push_str(
                    "\n\nThe customer also asked about booking: answer ONLY the price question, and say that once you agree on the tattoo and price you will arrange the appointment.",
                );
            }
        }

        IntentCategory::BookingRequest => {
            tool_schemas = Some(tools::calendar_tools());
            system.push_str(&format!("\n\nToday's date: {}", today.format("%Y-%m-%d")));

            match primary.subcategory {
                Some(IntentSubcategory::AvailableSlots) => {
                    system.push_str(
                        "\n- Use check_calendar_availability to look up free times.\n- Always include the full date in your reply, e.g. \"On Wednesday 5/6 we have ...\".",
                    );
                    match (primary.iso_start_date(), primary.iso_end_date()) {
                        (Some(start), Some(end)) => system.push_str(&format!(
                            "\n- The customer asked about {start} to {end}: use start_date {start} and end_date {end}."
                        )),
                        (Some(start), None) => system.push_str(&format!(
                            "\n- The customer asked about {start}: use it as start_date."
                        )),
                        _ => system.push_str(
                            "\n- No date was given: use today as start_date and seven days later as end_date, and offer the earliest free time.",
                        ),
                    }
                }
                Some(IntentSubcategory::RescheduleAppointment) => system.push_str(
                    "\n- First find the existing booking with find_customer_booking, then ask for the new date and time and use reschedule_tattoo_booking.",
                ),
                Some(IntentSubcategory::CancelAppointment) => system.push_str(
                    "\n- Cancelling needs the customer's phone number: find their booking with find_customer_booking, cancel the most recent one with cancel_tattoo_booking, and confirm politely. Ask for the number if it has not come up yet.",
                ),
                _ => {}
            }
        }

        _ => {}
    }

    if !secondary.is_empty() && primary.primary != IntentCategory::Pricing {
        system.push_str(
            "\n\nThe customer asked several things at once: focus on the main request and say you will come back to the rest.",
        );
    }

    (system, temperature, tool_schemas)
}

/// Execute one calendar tool call. Validation failures and arbitration
/// conflicts come back as structured tool results for the model to relay;
/// they are never retried.
async fn execute_tool(state: &Arc<AppState>, user_id: &str, call: &ToolInvocation) -> Value {
    match run_tool(state, user_id, call).await {
        Ok(result) => result,
        Err(Error::Validation(e)) => json!({
            "status": "invalid",
            "message": e.to_string(),
        }),
        Err(Error::SlotUnavailable(key)) => json!({
            "status": "unavailable",
            "message": format!("The slot {key} is no longer available. Please offer a different time."),
        }),
        Err(Error::HoldExpired) => json!({
            "status": "hold_expired",
            "message": "The temporary reservation expired. Check availability again and re-agree on a time.",
        }),
        Err(Error::RescheduleIncomplete { event_id, reason }) => {
            tracing::error!(event_id = %event_id, reason = %reason, "reschedule left the calendar inconsistent");
            json!({
                "status": "incomplete",
                "message": "The old booking was cancelled but the new one could not be created. Apologize and tell the customer the team will fix the booking manually.",
            })
        }
        Err(e) => {
            tracing::error!(error = %e, tool = %call.name, "calendar tool failed");
            json!({
                "status": "error",
                "message": "The calendar service is unavailable right now.",
            })
        }
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn arg_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(|v| v.as_f64())
}

async fn run_tool(
    state: &Arc<AppState>,
    user_id: &str,
    call: &ToolInvocation,
) -> Result<Value, Error> {
    let args = &call.arguments;
    let today = state.arbiter.today_local();

    match call.name.as_str() {
        tools::CHECK_AVAILABILITY => {
            let start = validation::validate_date(arg_str(args, "start_date").unwrap_or(""), today)?;
            let end = match arg_str(args, "end_date") {
                Some(raw) => validation::validate_date(raw, today)?,
                None => start,
            };
            let hours = validation::validate_duration(
                arg_f64(args, "duration_hours"),
                arg_f64(args, "tattoo_price"),
            )?;
            let duration_minutes = (hours * 60.0).round() as i64;
            let preferred = arg_str(args, "preferred_time")
                .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M").ok());

            let slots = state
                .arbiter
                .suggest_slots(start, end, duration_minutes, user_id, preferred)
                .await?;
            Ok(json!({
                "status": "success",
                "slots": slots,
                "message": format_available_slots_message(&slots),
            }))
        }

        tools::CREATE_BOOKING => {
            let name =
                validation::validate_customer_name(arg_str(args, "customer_name").unwrap_or(""))?;
            let phone =
                validation::validate_phone_number(arg_str(args, "customer_phone").unwrap_or(""))?;
            let date = validation::validate_date(arg_str(args, "date").unwrap_or(""), today)?;
            let time = validation::validate_time(arg_str(args, "time").unwrap_or(""))?;
            let hours = validation::validate_duration(
                arg_f64(args, "duration_hours"),
                arg_f64(args, "tattoo_price"),
            )?;
            let description = validation::sanitize_text(
                arg_str(args, "tattoo_description").unwrap_or(""),
                MAX_TEXT_LENGTH,
            )?;

            let start = date.and_time(time);
            let details = BookingDetails {
                customer_name: name,
                customer_phone: phone,
                start,
                duration_minutes: (hours * 60.0).round() as i64,
                description: Some(description).filter(|s| !s.is_empty()),
                price: arg_f64(args, "tattoo_price"),
            };

            // hold-then-confirm so two conversations cannot both win the
            // slot, even when the model calls create directly
            let hold = state
                .arbiter
                .request_hold(&start, user_id, state.arbiter.hold_ttl())?;
            let booking = match state.arbiter.confirm(&hold.token, user_id, &details).await {
                Ok(booking) => booking,
                Err(e) => {
                    state.arbiter.release(&hold.token);
                    return Err(e);
                }
            };

            Ok(json!({
                "status": "success",
                "event_id": booking.event_id,
                "message": "The booking was created successfully.",
            }))
        }

        tools::FIND_BOOKING => {
            let phone =
                validation::validate_phone_number(arg_str(args, "phone_number").unwrap_or(""))?;
            let bookings = state.arbiter.find_bookings_by_phone(&phone).await?;
            if bookings.is_empty() {
                return Ok(json!({
                    "status": "not_found",
                    "message": "No upcoming bookings found for that phone number.",
                }));
            }
            let events: Vec<Value> = bookings
                .iter()
                .map(|b| {
                    json!({
                        "event_id": b.event_id,
                        "start": b.start.format("%Y-%m-%d %H:%M").to_string(),
                        "summary": b.summary,
                        "status": b.status.as_str(),
                    })
                })
                .collect();
            Ok(json!({
                "status": "success",
                "count": events.len(),
                "events": events,
            }))
        }

        tools::CANCEL_BOOKING => {
            let event_id = validation::validate_event_id(arg_str(args, "event_id").unwrap_or(""))?;
            state.arbiter.cancel_booking(&event_id).await?;
            Ok(json!({
                "status": "success",
                "message": "The booking was cancelled successfully.",
            }))
        }

        tools::RESCHEDULE_BOOKING => {
            let event_id = validation::validate_event_id(arg_str(args, "event_id").unwrap_or(""))?;
            let date = validation::validate_date(arg_str(args, "new_date").unwrap_or(""), today)?;
            let time = validation::validate_time(arg_str(args, "new_time").unwrap_or(""))?;
            let duration_minutes = match arg_f64(args, "duration_hours") {
                Some(hours) => {
                    Some((validation::validate_duration(Some(hours), None)? * 60.0).round() as i64)
                }
                None => None,
            };

            let booking = state
                .arbiter
                .reschedule(
                    &event_id,
                    date.and_time(time),
                    duration_minutes,
                    arg_f64(args, "tattoo_price"),
                )
                .await?;
            Ok(json!({
                "status": "success",
                "event_id": booking.event_id,
                "message": "The booking was moved successfully.",
            }))
        }

        other => {
            tracing::warn!(tool = other, "model requested an unknown tool");
            Ok(json!({
                "status": "error",
                "message": format!("Unknown tool: {other}"),
            }))
        }
    }
}
