pub mod booking;
pub mod conversation;
pub mod intent;

pub use booking::{Booking, BookingDetails, BookingStatus, Hold, SuggestedSlot};
pub use conversation::{Conversation, ConversationMessage, InboundMessage};
pub use intent::{IntentCategory, IntentReport, IntentSignal, IntentSubcategory};
