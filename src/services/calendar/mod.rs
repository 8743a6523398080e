pub mod google;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::errors::ServiceError;
use crate::models::BookingDetails;
use crate::services::pricing;

/// An event on the studio calendar, times in studio-local naive datetimes.
#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CalendarEvent {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Overlap test against a half-open interval.
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start < end && self.end > start
    }
}

/// A new event to be created.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub summary: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl EventDraft {
    /// Build the studio's standard event for a booking. The description
    /// embeds the customer's phone number, which is what makes
    /// find-by-phone work later.
    pub fn for_booking(details: &BookingDetails) -> Self {
        let mut description = format!(
            "Customer: {}\nPhone: {}",
            details.customer_name, details.customer_phone
        );
        if let Some(tattoo) = details.description.as_deref().filter(|s| !s.is_empty()) {
            description.push_str(&format!("\nTattoo: {tattoo}"));
        }
        if let Some(price) = details.price {
            description.push_str(&format!("\nEstimated price: {price}\u{20ac}"));
            description.push_str(&format!(
                "\nDuration: {}",
                pricing::format_duration(details.duration_minutes as f64 / 60.0)
            ));
        }

        Self {
            summary: format!("Tattoo - {}", details.customer_name),
            description,
            start: details.start,
            end: details.start + chrono::Duration::minutes(details.duration_minutes),
        }
    }
}

/// CRUD against the external calendar service, scoped to one calendar
/// resource in the studio timezone.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn list_events(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, ServiceError>;

    async fn get_event(&self, event_id: &str) -> Result<CalendarEvent, ServiceError>;

    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, ServiceError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), ServiceError>;
}
