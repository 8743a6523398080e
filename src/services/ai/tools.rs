//! Calendar tool schemas exposed to the chat model.

use serde_json::{json, Value};

pub const CHECK_AVAILABILITY: &str = "check_calendar_availability";
pub const CREATE_BOOKING: &str = "create_tattoo_booking";
pub const FIND_BOOKING: &str = "find_customer_booking";
pub const CANCEL_BOOKING: &str = "cancel_tattoo_booking";
pub const RESCHEDULE_BOOKING: &str = "reschedule_tattoo_booking";

pub fn calendar_tools() -> Vec<Value> {
    vec![
        function(
            CHECK_AVAILABILITY,
            "Check available time slots in the calendar for tattoo appointments",
            json!({
                "type": "object",
                "properties": {
                    "start_date": {
                        "type": "string",
                        "description": "Start date to check availability (format: YYYY-MM-DD)"
                    },
                    "end_date": {
                        "type": "string",
                        "description": "End date to check availability (format: YYYY-MM-DD). Optional, defaults to start_date"
                    },
                    "duration_hours": {
                        "type": "number",
                        "description": "Duration of the appointment in hours (if not provided, calculated from tattoo_price)"
                    },
                    "tattoo_price": {
                        "type": "number",
                        "description": "Agreed tattoo price in euros (used to calculate duration: price/100 = hours)"
                    },
                    "preferred_time": {
                        "type": "string",
                        "description": "Preferred appointment time (format: HH:MM). Suggestions on the first day start no earlier than this"
                    }
                },
                "required": ["start_date"]
            }),
        ),
        function(
            CREATE_BOOKING,
            "Create a new tattoo appointment booking",
            json!({
                "type": "object",
                "properties": {
                    "customer_name": {"type": "string", "description": "Customer's full name"},
                    "customer_phone": {"type": "string", "description": "Customer's phone number"},
                    "date": {"type": "string", "description": "Appointment date (format: YYYY-MM-DD)"},
                    "time": {"type": "string", "description": "Appointment time (format: HH:MM)"},
                    "duration_hours": {
                        "type": "number",
                        "description": "Duration of the appointment in hours (if not provided, calculated from tattoo_price)"
                    },
                    "tattoo_price": {
                        "type": "number",
                        "description": "Agreed tattoo price in euros (used to calculate duration: price/100 = hours)"
                    },
                    "tattoo_description": {"type": "string", "description": "Description of the tattoo design/style"}
                },
                "required": ["customer_name", "customer_phone", "date", "time"]
            }),
        ),
        function(
            FIND_BOOKING,
            "Find existing bookings by customer phone number",
            json!({
                "type": "object",
                "properties": {
                    "phone_number": {"type": "string", "description": "Customer's phone number to search for"}
                },
                "required": ["phone_number"]
            }),
        ),
        function(
            CANCEL_BOOKING,
            "Cancel an existing tattoo appointment",
            json!({
                "type": "object",
                "properties": {
                    "event_id": {"type": "string", "description": "Calendar event ID of the booking to cancel"}
                },
                "required": ["event_id"]
            }),
        ),
        function(
            RESCHEDULE_BOOKING,
            "Reschedule an existing tattoo appointment",
            json!({
                "type": "object",
                "properties": {
                    "event_id": {"type": "string", "description": "Calendar event ID of the booking to reschedule"},
                    "new_date": {"type": "string", "description": "New appointment date (format: YYYY-MM-DD)"},
                    "new_time": {"type": "string", "description": "New appointment time (format: HH:MM)"},
                    "duration_hours": {
                        "type": "number",
                        "description": "Duration of the appointment in hours (if not provided, calculated from tattoo_price or the existing event)"
                    },
                    "tattoo_price": {
                        "type": "number",
                        "description": "Agreed tattoo price in euros (used to calculate duration: price/100 = hours)"
                    }
                },
                "required": ["event_id", "new_date", "new_time"]
            }),
        ),
    ]
}

fn function(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}
