//! Quote calculation from tattoo photo analyses.
//!
//! The vision model reports height, width, ink coverage and a difficulty
//! factor for each photo; prices derive from those figures so quoted
//! amounts never depend on the chat model doing arithmetic.

pub const MIN_PRICE: f64 = 45.0;
pub const PRICE_STEP: f64 = 5.0;
pub const INK_MULTIPLIER: f64 = 0.3;
pub const MULTI_TATTOO_DISCOUNT: f64 = 0.10;
/// price / 100 = appointment hours
pub const PRICE_PER_HOUR: f64 = 100.0;

/// Measurements extracted from one analyzed photo.
#[derive(Debug, Clone, PartialEq)]
pub struct TattooEstimate {
    pub height_cm: f64,
    pub width_cm: f64,
    pub ink_coverage: f64,
    pub difficulty: f64,
}

/// Parse the `h=.. | w=.. | ink=.. | D=..` tail of a vision analysis line.
pub fn parse_estimate(analysis: &str) -> Option<TattooEstimate> {
    let mut height = None;
    let mut width = None;
    let mut ink = None;
    let mut difficulty = None;

    for part in analysis.split('|') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("h=") {
            height = v.trim().parse().ok();
        } else if let Some(v) = part.strip_prefix("w=") {
            width = v.trim().parse().ok();
        } else if let Some(v) = part.strip_prefix("ink=") {
            ink = v.trim().parse().ok();
        } else if let Some(v) = part.strip_prefix("D=") {
            difficulty = v.trim().parse().ok();
        }
    }

    Some(TattooEstimate {
        height_cm: height?,
        width_cm: width?,
        ink_coverage: ink?,
        difficulty: difficulty?,
    })
}

fn floor_to_step(value: f64) -> f64 {
    (value / PRICE_STEP).floor() * PRICE_STEP
}

/// P = max(45, floor((h * w * D * (1 + 0.3 * ink)) / 5) * 5)
pub fn base_price(estimate: &TattooEstimate) -> f64 {
    let raw = estimate.height_cm
        * estimate.width_cm
        * estimate.difficulty
        * (1.0 + INK_MULTIPLIER * estimate.ink_coverage);
    floor_to_step(raw).max(MIN_PRICE)
}

/// The studio always quotes two print sizes for a single tattoo: the
/// computed price and a slightly larger option.
pub fn quote_single(price: f64) -> (f64, f64) {
    if price < 90.0 {
        (price, price + PRICE_STEP)
    } else {
        (price, price + 2.0 * PRICE_STEP)
    }
}

/// Total for several tattoos: sum with a 10% discount, floored to a
/// multiple of 5. A single price passes through unchanged.
pub fn quote_total(prices: &[f64]) -> f64 {
    let sum: f64 = prices.iter().sum();
    if prices.len() < 2 {
        return sum;
    }
    floor_to_step(sum * (1.0 - MULTI_TATTOO_DISCOUNT))
}

/// Round a duration up to the next 5-minute mark.
pub fn round_up_to_five_minutes(hours: f64) -> f64 {
    let minutes = hours * 60.0;
    let rounded = (minutes / 5.0).ceil() * 5.0;
    rounded / 60.0
}

/// Appointment length implied by a price: price/100 hours, on a 5-minute
/// grid.
pub fn duration_hours_from_price(price: f64) -> f64 {
    round_up_to_five_minutes(price / PRICE_PER_HOUR)
}

/// "2 hours and 30 minutes" style display, used in event descriptions.
pub fn format_duration(hours: f64) -> String {
    let total_minutes = (hours * 60.0).round() as i64;
    let h = total_minutes / 60;
    let m = total_minutes % 60;

    match (h, m) {
        (0, m) => format!("{m} minutes"),
        (1, 0) => "1 hour".to_string(),
        (h, 0) => format!("{h} hours"),
        (1, m) => format!("1 hour and {m} minutes"),
        (h, m) => format!("{h} hours and {m} minutes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_estimate() {
        let line = "Fine line minimal house outline on the wrist | h=5 | w=5 | ink=0.10 | D=1.14";
        let est = parse_estimate(line).unwrap();
        assert_eq!(est.height_cm, 5.0);
        assert_eq!(est.width_cm, 5.0);
        assert_eq!(est.ink_coverage, 0.10);
        assert_eq!(est.difficulty, 1.14);
    }

    #[test]
    fn test_parse_estimate_missing_fields() {
        assert!(parse_estimate("just a description, no measurements").is_none());
        assert!(parse_estimate("h=5 | w=5 | ink=0.1").is_none());
    }

    #[test]
    fn test_base_price_minimum() {
        // tiny piece: 5*5*1.14*1.03 = 29.36 -> floors below the 45 minimum
        let est = TattooEstimate {
            height_cm: 5.0,
            width_cm: 5.0,
            ink_coverage: 0.10,
            difficulty: 1.14,
        };
        assert_eq!(base_price(&est), 45.0);
    }

    #[test]
    fn test_base_price_multiple_of_five() {
        // 10*12*1.45*1.09 = 189.66 -> 185
        let est = TattooEstimate {
            height_cm: 10.0,
            width_cm: 12.0,
            ink_coverage: 0.30,
            difficulty: 1.45,
        };
        assert_eq!(base_price(&est), 185.0);
    }

    #[test]
    fn test_quote_single_spread() {
        assert_eq!(quote_single(45.0), (45.0, 50.0));
        assert_eq!(quote_single(85.0), (85.0, 90.0));
        assert_eq!(quote_single(90.0), (90.0, 100.0));
        assert_eq!(quote_single(185.0), (185.0, 195.0));
    }

    #[test]
    fn test_quote_total_discount() {
        assert_eq!(quote_total(&[100.0]), 100.0);
        // (100 + 60) * 0.9 = 144 -> 140
        assert_eq!(quote_total(&[100.0, 60.0]), 140.0);
        // (45 + 45 + 45) * 0.9 = 121.5 -> 120
        assert_eq!(quote_total(&[45.0, 45.0, 45.0]), 120.0);
    }

    #[test]
    fn test_duration_from_price() {
        assert_eq!(duration_hours_from_price(100.0), 1.0);
        assert_eq!(duration_hours_from_price(150.0), 1.5);
        // 130/100 = 1.3h = 78min -> 80min
        assert!((duration_hours_from_price(130.0) - 80.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.5), "30 minutes");
        assert_eq!(format_duration(1.0), "1 hour");
        assert_eq!(format_duration(2.0), "2 hours");
        assert_eq!(format_duration(1.5), "1 hour and 30 minutes");
        assert_eq!(format_duration(2.25), "2 hours and 15 minutes");
    }
}
