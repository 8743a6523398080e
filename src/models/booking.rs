use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Everything needed to create a calendar event for an appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDetails {
    pub customer_name: String,
    pub customer_phone: String,
    pub start: NaiveDateTime,
    pub duration_minutes: i64,
    pub description: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Held,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Held => "held",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// A booking as seen through the calendar (the system of record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub event_id: String,
    pub start: NaiveDateTime,
    pub duration_minutes: i64,
    pub summary: String,
    pub status: BookingStatus,
}

/// A short-lived reservation of a slot, stored only in the shared store.
/// At most one unexpired hold exists per slot key.
#[derive(Debug, Clone)]
pub struct Hold {
    pub slot_key: String,
    pub holder: String,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

/// A free slot offered to a customer.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedSlot {
    pub date: String,
    pub start_time: String,
    pub start: NaiveDateTime,
}
