use chrono::{NaiveDate, NaiveTime};

use crate::services::pricing;

/// Opening hours of the studio, 24h clock. Bookings must start at or after
/// the opening hour and strictly before the closing hour.
pub const BUSINESS_OPEN_HOUR: u32 = 11;
pub const BUSINESS_CLOSE_HOUR: u32 = 20;

pub const MAX_TATTOO_PRICE: f64 = 5000.0;
pub const MAX_DURATION_HOURS: f64 = 10.0;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_TEXT_LENGTH: usize = 1000;
pub const MAX_EVENT_ID_LENGTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError(message.into())
}

/// Validate and normalize a Greek phone number.
///
/// Accepts spaces, dashes, parentheses and the +30 / 0030 / 30 country
/// prefixes; returns the bare 10-digit number.
pub fn validate_phone_number(phone: &str) -> Result<String, ValidationError> {
    if phone.trim().is_empty() {
        return Err(invalid("Phone number cannot be empty"));
    }

    let cleaned: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    let cleaned = if let Some(rest) = cleaned.strip_prefix("+30") {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix("0030") {
        rest.to_string()
    } else if cleaned.len() == 12 && cleaned.starts_with("30") {
        cleaned[2..].to_string()
    } else {
        cleaned
    };

    if cleaned.len() != 10 {
        return Err(invalid(format!(
            "Invalid phone number length: {} (expected 10 digits)",
            cleaned.len()
        )));
    }

    if !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("Phone number must contain only digits"));
    }

    // Greek mobiles start with 69/68, landlines with 2
    if !(cleaned.starts_with("69") || cleaned.starts_with("68") || cleaned.starts_with('2')) {
        return Err(invalid(format!(
            "Invalid Greek phone number pattern: {}",
            &cleaned[..2]
        )));
    }

    Ok(cleaned)
}

/// Parse a `YYYY-MM-DD` date and reject dates before `today`.
pub fn validate_date(date: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    if date.trim().is_empty() {
        return Err(invalid("Date cannot be empty"));
    }

    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| invalid(format!("Invalid date format: {date} (expected YYYY-MM-DD)")))?;

    if parsed < today {
        return Err(invalid(format!("Date cannot be in the past: {date}")));
    }

    Ok(parsed)
}

/// Parse an `HH:MM` time and require it to fall within business hours.
pub fn validate_time(time: &str) -> Result<NaiveTime, ValidationError> {
    if time.trim().is_empty() {
        return Err(invalid("Time cannot be empty"));
    }

    let parsed = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|_| invalid(format!("Invalid time format: {time} (expected HH:MM)")))?;

    let hour = chrono::Timelike::hour(&parsed);
    if hour < BUSINESS_OPEN_HOUR || hour >= BUSINESS_CLOSE_HOUR {
        return Err(invalid(format!(
            "Time must be within business hours ({BUSINESS_OPEN_HOUR}:00-{BUSINESS_CLOSE_HOUR}:00): {time}"
        )));
    }

    Ok(parsed)
}

/// Resolve an appointment duration in hours.
///
/// An explicit duration wins; otherwise it is derived from the quoted price
/// (price/100 hours, rounded up to 5 minutes); with neither, one hour.
pub fn validate_duration(
    duration_hours: Option<f64>,
    price: Option<f64>,
) -> Result<f64, ValidationError> {
    if let Some(hours) = duration_hours {
        if hours <= 0.0 {
            return Err(invalid(format!("Duration must be positive: {hours}")));
        }
        if hours > MAX_DURATION_HOURS {
            return Err(invalid(format!(
                "Duration too long (max {MAX_DURATION_HOURS} hours): {hours}"
            )));
        }
        return Ok(hours);
    }

    let Some(price) = price else {
        return Ok(1.0);
    };

    if price <= 0.0 {
        return Err(invalid(format!("Price must be positive: {price}")));
    }
    if price > MAX_TATTOO_PRICE {
        return Err(invalid(format!(
            "Price too high (max {MAX_TATTOO_PRICE}\u{20ac}): {price}"
        )));
    }

    Ok(pricing::duration_hours_from_price(price))
}

/// Validate a customer name: 2-100 characters, letters (Latin or Greek),
/// spaces, dashes and dots.
pub fn validate_customer_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();

    if name.is_empty() {
        return Err(invalid("Customer name cannot be empty"));
    }
    if name.chars().count() < 2 {
        return Err(invalid(format!("Customer name too short: {name}")));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(invalid(format!(
            "Customer name too long (max {MAX_NAME_LENGTH} chars)"
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_alphabetic() || matches!(c, ' ' | '-' | '.'))
    {
        return Err(invalid(format!(
            "Customer name contains invalid characters: {name}"
        )));
    }

    Ok(name.to_string())
}

/// Validate a calendar event id: alphanumeric plus underscores.
pub fn validate_event_id(event_id: &str) -> Result<String, ValidationError> {
    if event_id.is_empty() {
        return Err(invalid("Event ID cannot be empty"));
    }
    if event_id.len() > MAX_EVENT_ID_LENGTH {
        return Err(invalid("Event ID too long"));
    }
    if !event_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid(format!("Invalid event ID format: {event_id}")));
    }

    Ok(event_id.to_string())
}

/// Strip control characters and reject over-long free text.
///
/// Keeps letters, digits, whitespace and common punctuation so Greek
/// descriptions survive unharmed.
pub fn sanitize_text(text: &str, max_length: usize) -> Result<String, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(String::new());
    }

    if text.chars().count() > max_length {
        return Err(invalid(format!(
            "Text too long (max {max_length} chars): {} chars",
            text.chars().count()
        )));
    }

    let sanitized: String = text
        .chars()
        .filter(|c| {
            c.is_alphanumeric()
                || c.is_whitespace()
                || matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '-' | '(' | ')' | '/' | '"' | '\'' | '_')
        })
        .collect();

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_phone_with_country_code_and_spaces() {
        assert_eq!(
            validate_phone_number("+30 691 234 5678").unwrap(),
            "6912345678"
        );
    }

    #[test]
    fn test_phone_plain_mobile() {
        assert_eq!(validate_phone_number("6912345678").unwrap(), "6912345678");
    }

    #[test]
    fn test_phone_0030_prefix() {
        assert_eq!(
            validate_phone_number("00306912345678").unwrap(),
            "6912345678"
        );
    }

    #[test]
    fn test_phone_landline() {
        assert_eq!(validate_phone_number("210-123-4567").unwrap(), "2101234567");
    }

    #[test]
    fn test_phone_rejects_bad_input() {
        assert!(validate_phone_number("").is_err());
        assert!(validate_phone_number("12345").is_err());
        assert!(validate_phone_number("69123456ab").is_err());
        assert!(validate_phone_number("5912345678").is_err());
    }

    #[test]
    fn test_date_valid_and_past() {
        let today = date("2025-06-10");
        assert_eq!(
            validate_date("2025-06-15", today).unwrap(),
            date("2025-06-15")
        );
        assert_eq!(validate_date("2025-06-10", today).unwrap(), today);
        assert!(validate_date("2025-06-09", today).is_err());
        assert!(validate_date("15/06/2025", today).is_err());
        assert!(validate_date("", today).is_err());
    }

    #[test]
    fn test_time_within_business_hours() {
        assert!(validate_time("11:00").is_ok());
        assert!(validate_time("19:30").is_ok());
        assert!(validate_time("10:59").is_err());
        assert!(validate_time("20:00").is_err());
        assert!(validate_time("2pm").is_err());
    }

    #[test]
    fn test_duration_explicit() {
        assert_eq!(validate_duration(Some(2.0), None).unwrap(), 2.0);
        assert!(validate_duration(Some(0.0), None).is_err());
        assert!(validate_duration(Some(11.0), None).is_err());
    }

    #[test]
    fn test_duration_from_price() {
        // 150 eur -> 1.5 h, already on a 5-minute boundary
        assert_eq!(validate_duration(None, Some(150.0)).unwrap(), 1.5);
        assert!(validate_duration(None, Some(-5.0)).is_err());
        assert!(validate_duration(None, Some(6000.0)).is_err());
    }

    #[test]
    fn test_duration_default() {
        assert_eq!(validate_duration(None, None).unwrap(), 1.0);
    }

    #[test]
    fn test_customer_name() {
        assert_eq!(validate_customer_name("  Maria P. ").unwrap(), "Maria P.");
        assert_eq!(
            validate_customer_name("Γιώργος Παπαδόπουλος").unwrap(),
            "Γιώργος Παπαδόπουλος"
        );
        assert!(validate_customer_name("").is_err());
        assert!(validate_customer_name("A").is_err());
        assert!(validate_customer_name("Bobby; DROP TABLE").is_err());
    }

    #[test]
    fn test_event_id() {
        assert!(validate_event_id("abc123_XYZ").is_ok());
        assert!(validate_event_id("").is_err());
        assert!(validate_event_id("has space").is_err());
        assert!(validate_event_id(&"x".repeat(2000)).is_err());
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("", 100).unwrap(), "");
        assert_eq!(
            sanitize_text("fine line rose, 5x5cm", 100).unwrap(),
            "fine line rose, 5x5cm"
        );
        assert_eq!(sanitize_text("a\u{0}b<c>", 100).unwrap(), "abc");
        assert!(sanitize_text(&"x".repeat(101), 100).is_err());
    }
}
