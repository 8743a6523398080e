use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum IntentCategory {
    Pricing,
    BookingRequest,
    StudioInformation,
    FollowUp,
    Other,
}

// Unrecognized classifier output must not fail the turn, so anything
// unknown maps to Other.
impl From<String> for IntentCategory {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pricing" => IntentCategory::Pricing,
            "booking_request" => IntentCategory::BookingRequest,
            "studio_information" => IntentCategory::StudioInformation,
            "follow_up" => IntentCategory::FollowUp,
            _ => IntentCategory::Other,
        }
    }
}

impl IntentCategory {
    /// Lower number wins when several intents are detected in one message.
    /// Pricing outranks booking: the studio agrees on the tattoo and price
    /// before talking appointments.
    pub fn priority(&self) -> u8 {
        match self {
            IntentCategory::Pricing => 1,
            IntentCategory::BookingRequest => 2,
            IntentCategory::StudioInformation => 3,
            IntentCategory::FollowUp => 4,
            IntentCategory::Other => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Pricing => "pricing",
            IntentCategory::BookingRequest => "booking_request",
            IntentCategory::StudioInformation => "studio_information",
            IntentCategory::FollowUp => "follow_up",
            IntentCategory::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum IntentSubcategory {
    NewQuoteImage,
    NewQuoteNoImage,
    NewAppointment,
    ProvideDetails,
    RescheduleAppointment,
    CancelAppointment,
    AvailableSlots,
    Unspecified,
}

impl From<String> for IntentSubcategory {
    fn from(s: String) -> Self {
        match s.as_str() {
            "new_quote_image" => IntentSubcategory::NewQuoteImage,
            "new_quote_no_image" => IntentSubcategory::NewQuoteNoImage,
            "new_appointment" => IntentSubcategory::NewAppointment,
            "provide_details" => IntentSubcategory::ProvideDetails,
            "reschedule_appointment" => IntentSubcategory::RescheduleAppointment,
            "cancel_appointment" => IntentSubcategory::CancelAppointment,
            "available_slots" => IntentSubcategory::AvailableSlots,
            _ => IntentSubcategory::Unspecified,
        }
    }
}

/// One detected intent, as produced by the classification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSignal {
    pub primary: IntentCategory,
    #[serde(default)]
    pub subcategory: Option<IntentSubcategory>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl IntentSignal {
    pub fn fallback() -> Self {
        Self {
            primary: IntentCategory::Other,
            subcategory: None,
            confidence: 0.0,
            start_date: None,
            end_date: None,
        }
    }

    /// Dates arrive as DD/MM/YYYY from the classifier; calendar calls want
    /// ISO. Already-ISO strings pass through.
    pub fn iso_start_date(&self) -> Option<String> {
        self.start_date.as_deref().and_then(to_iso_date)
    }

    pub fn iso_end_date(&self) -> Option<String> {
        self.end_date.as_deref().and_then(to_iso_date)
    }
}

fn to_iso_date(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() == 3 {
            let day: u32 = parts[0].parse().ok()?;
            let month: u32 = parts[1].parse().ok()?;
            let year: i32 = parts[2].parse().ok()?;
            return Some(format!("{year:04}-{month:02}-{day:02}"));
        }
        return None;
    }
    Some(s.to_string())
}

/// The full classification result for one inbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentReport {
    #[serde(default)]
    pub intents: Vec<IntentSignal>,
}

impl IntentReport {
    /// Pick the intent to act on: sort by priority then confidence, and
    /// within booking intents promote `available_slots` because it carries
    /// the date range the customer actually asked about.
    pub fn primary(&self) -> IntentSignal {
        let mut sorted: Vec<&IntentSignal> = self.intents.iter().collect();
        sorted.sort_by(|a, b| {
            a.primary
                .priority()
                .cmp(&b.primary.priority())
                .then(b.confidence.total_cmp(&a.confidence))
        });

        let Some(first) = sorted.first() else {
            return IntentSignal::fallback();
        };

        if first.primary == IntentCategory::BookingRequest {
            if let Some(slots) = sorted.iter().find(|s| {
                s.primary == IntentCategory::BookingRequest
                    && s.subcategory == Some(IntentSubcategory::AvailableSlots)
            }) {
                return (*slots).clone();
            }
        }

        (*first).clone()
    }

    /// Categories detected besides the primary one, deduplicated.
    pub fn secondary_categories(&self, primary: &IntentSignal) -> Vec<IntentCategory> {
        let mut seen = vec![];
        for signal in &self.intents {
            if signal.primary != primary.primary && !seen.contains(&signal.primary) {
                seen.push(signal.primary);
            }
        }
        seen
    }
}
