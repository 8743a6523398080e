use chrono::NaiveDate;

use super::{prompts, ChatMessage, ChatOutcome, ChatRequest, LlmProvider};
use crate::models::IntentReport;

/// Classify one inbound message. Any failure (transport, malformed output,
/// unparseable JSON) degrades to an empty report, which resolves to the
/// `other` intent, so the reply path is never blocked.
pub async fn classify_intents(
    llm: &dyn LlmProvider,
    message: &str,
    previous_assistant: Option<&str>,
    today: NaiveDate,
    classify_model: &str,
) -> IntentReport {
    let mut content = String::new();
    if let Some(prev) = previous_assistant {
        content.push_str(&format!("[PREVIOUS_ASSISTANT]: {prev}\n"));
    }
    content.push_str(&format!("[CURRENT_DATE: {}]\n", today.format("%d/%m/%Y")));
    content.push_str(message);

    let request = ChatRequest {
        messages: vec![
            ChatMessage::system(prompts::CLASSIFICATION),
            ChatMessage::user(content),
        ],
        temperature: 0.0,
        tools: None,
        json_response: true,
        model: Some(classify_model.to_string()),
    };

    match llm.chat(&request).await {
        Ok(ChatOutcome::Text(text)) => parse_intent_report(&text),
        Ok(other) => {
            tracing::warn!(outcome = ?other, "unexpected classification outcome");
            IntentReport::default()
        }
        Err(e) => {
            tracing::error!(error = %e, "intent classification failed");
            IntentReport::default()
        }
    }
}

/// Parse the classifier's JSON, tolerating markdown fences and stray prose
/// around the object. Falls back to an empty report.
pub fn parse_intent_report(response: &str) -> IntentReport {
    if let Ok(report) = serde_json::from_str::<IntentReport>(response) {
        return report;
    }

    // Strip markdown code fences
    let cleaned = response.trim();
    let cleaned = cleaned
        .strip_prefix("```json")
        .or_else(|| cleaned.strip_prefix("```"))
        .unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    if let Ok(report) = serde_json::from_str::<IntentReport>(cleaned) {
        return report;
    }

    // Last resort: find the outermost JSON object in the response
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(report) = serde_json::from_str::<IntentReport>(&cleaned[start..=end]) {
                return report;
            }
        }
    }

    tracing::warn!("failed to parse classification response, treating as 'other'");
    IntentReport::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntentCategory, IntentSubcategory};

    #[test]
    fn test_parse_valid_report() {
        let json = r#"{"intents":[{"primary":"booking_request","subcategory":"available_slots","confidence":0.92,"start_date":"16/06/2025","end_date":null}]}"#;
        let report = parse_intent_report(json);
        assert_eq!(report.intents.len(), 1);
        assert_eq!(report.intents[0].primary, IntentCategory::BookingRequest);
        assert_eq!(
            report.intents[0].subcategory,
            Some(IntentSubcategory::AvailableSlots)
        );
    }

    #[test]
    fn test_parse_fenced_report() {
        let fenced = "```json\n{\"intents\":[{\"primary\":\"pricing\",\"confidence\":0.8}]}\n```";
        let report = parse_intent_report(fenced);
        assert_eq!(report.intents[0].primary, IntentCategory::Pricing);
    }

    #[test]
    fn test_parse_report_with_surrounding_prose() {
        let noisy = "Here is the classification:\n{\"intents\":[{\"primary\":\"studio_information\",\"confidence\":0.7}]}\nLet me know!";
        let report = parse_intent_report(noisy);
        assert_eq!(
            report.intents[0].primary,
            IntentCategory::StudioInformation
        );
    }

    #[test]
    fn test_parse_garbage_falls_back() {
        let report = parse_intent_report("I cannot classify this message");
        assert!(report.intents.is_empty());
        assert_eq!(report.primary().primary, IntentCategory::Other);
    }
}
