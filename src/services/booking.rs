//! Slot arbitration: guarantees that two concurrent booking attempts for
//! the same slot cannot both succeed.
//!
//! Availability comes from the calendar (the system of record); holds are
//! short-lived rows in the shared store. The two are checked separately: a
//! slot can be free on the calendar and still be unavailable because
//! another conversation holds it.

use std::sync::{Arc, Mutex};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::Error;
use crate::models::{Booking, BookingDetails, BookingStatus, Hold, SuggestedSlot};
use crate::services::calendar::{CalendarProvider, EventDraft};
use crate::services::pricing;
use crate::validation::{BUSINESS_CLOSE_HOUR, BUSINESS_OPEN_HOUR};

/// The studio runs two stations, so up to two appointments may overlap.
pub const MAX_PARALLEL_BOOKINGS: usize = 2;
/// How many free slots are offered (and held) per availability check.
pub const SUGGESTED_SLOT_COUNT: usize = 3;
/// How far ahead find-by-phone searches.
pub const BOOKING_SEARCH_DAYS: i64 = 90;

/// Key a slot by its start minute, studio-local.
pub fn slot_key(start: &NaiveDateTime) -> String {
    start.format("%Y-%m-%dT%H:%M").to_string()
}

fn hour(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub struct SlotArbiter {
    db: Arc<Mutex<Connection>>,
    calendar: Arc<dyn CalendarProvider>,
    tz: Tz,
    hold_ttl: Duration,
}

impl SlotArbiter {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        calendar: Arc<dyn CalendarProvider>,
        tz: Tz,
        hold_ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            calendar,
            tz,
            hold_ttl: Duration::seconds(hold_ttl_secs),
        }
    }

    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    pub fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }

    pub fn today_local(&self) -> NaiveDate {
        self.now_local().date()
    }

    /// Place a hold on a slot. Succeeds only when no live hold from another
    /// conversation exists for the key; a repeat request from the same
    /// holder refreshes the hold and returns a fresh token.
    pub fn request_hold(
        &self,
        start: &NaiveDateTime,
        holder: &str,
        ttl: Duration,
    ) -> Result<Hold, Error> {
        let key = slot_key(start);
        let now = self.now_local();
        let db = self.db.lock().unwrap();

        queries::delete_expired_hold(&db, &key, &now)?;

        if let Some(existing) = queries::get_hold_by_slot(&db, &key, &now)? {
            if existing.holder != holder {
                return Err(Error::SlotUnavailable(key));
            }
            let refreshed = Hold {
                slot_key: key,
                holder: holder.to_string(),
                token: Uuid::new_v4().to_string(),
                created_at: existing.created_at,
                expires_at: now + ttl,
            };
            queries::replace_hold(&db, &refreshed)?;
            return Ok(refreshed);
        }

        let hold = Hold {
            slot_key: key,
            holder: holder.to_string(),
            token: Uuid::new_v4().to_string(),
            created_at: now,
            expires_at: now + ttl,
        };
        if !queries::try_insert_hold(&db, &hold)? {
            // lost the race to a concurrent insert
            return Err(Error::SlotUnavailable(hold.slot_key));
        }
        Ok(hold)
    }

    /// Promote a hold into a confirmed calendar event. The token must
    /// reference a live hold created by the same holder; otherwise the hold
    /// expired or was stolen, nothing is written to the calendar, and the
    /// caller restarts from an availability check.
    pub async fn confirm(
        &self,
        token: &str,
        holder: &str,
        details: &BookingDetails,
    ) -> Result<Booking, Error> {
        let now = self.now_local();
        let hold = {
            let db = self.db.lock().unwrap();
            queries::get_hold_by_token(&db, token, &now)?
        };
        let hold = match hold {
            Some(h) if h.holder == holder && h.slot_key == slot_key(&details.start) => h,
            _ => return Err(Error::HoldExpired),
        };

        // the calendar may have filled up through another channel while
        // the hold was live
        let end = details.start + Duration::minutes(details.duration_minutes);
        if self.overlap_count(details.start, end, None).await? >= MAX_PARALLEL_BOOKINGS {
            let db = self.db.lock().unwrap();
            queries::delete_hold_by_token(&db, token)?;
            return Err(Error::SlotUnavailable(hold.slot_key));
        }

        let draft = EventDraft::for_booking(details);
        let event = self.calendar.create_event(&draft).await?;

        let db = self.db.lock().unwrap();
        queries::delete_hold_by_token(&db, token)?;

        Ok(Booking {
            event_id: event.id,
            start: details.start,
            duration_minutes: details.duration_minutes,
            summary: event.summary,
            status: BookingStatus::Confirmed,
        })
    }

    /// Drop a hold. Idempotent: releasing twice, or a token that never
    /// existed, is fine.
    pub fn release(&self, token: &str) {
        let db = self.db.lock().unwrap();
        if let Err(e) = queries::delete_hold_by_token(&db, token) {
            tracing::error!(error = %e, "failed to release hold");
        }
    }

    /// Calendar-only availability: ignores holds entirely.
    pub async fn check_availability(
        &self,
        start: NaiveDateTime,
        duration_minutes: i64,
    ) -> Result<bool, Error> {
        let end = start + Duration::minutes(duration_minutes);
        Ok(self.overlap_count(start, end, None).await? < MAX_PARALLEL_BOOKINGS)
    }

    async fn overlap_count(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        exclude_event: Option<&str>,
    ) -> Result<usize, Error> {
        let day_start = start.date().and_time(NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);
        let events = self.calendar.list_events(day_start, day_end).await?;
        Ok(events
            .iter()
            .filter(|e| exclude_event != Some(e.id.as_str()))
            .filter(|e| e.overlaps(start, end))
            .count())
    }

    /// Scan working hours for free slots and hold the ones we are about to
    /// offer, so two conversations are not promised the same time.
    ///
    /// On the first requested day suggestions start at `preferred_time`
    /// when given; Sundays are closed; slots already in the past, at
    /// capacity, or held by someone else are skipped.
    pub async fn suggest_slots(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        duration_minutes: i64,
        holder: &str,
        preferred_time: Option<NaiveTime>,
    ) -> Result<Vec<SuggestedSlot>, Error> {
        let window_start = start_date.and_time(NaiveTime::MIN);
        let window_end = end_date.and_time(NaiveTime::MIN) + Duration::days(1);
        let events = self.calendar.list_events(window_start, window_end).await?;
        let now = self.now_local();

        let mut available: Vec<SuggestedSlot> = vec![];
        let mut day = start_date;
        while day <= end_date && available.len() < SUGGESTED_SLOT_COUNT {
            let Some(next_day) = day.succ_opt() else { break };
            if day.weekday() == Weekday::Sun {
                day = next_day;
                continue;
            }

            let day_events: Vec<_> = events.iter().filter(|e| e.start.date() == day).collect();

            let mut slot_time = day.and_time(hour(BUSINESS_OPEN_HOUR));
            if day == start_date {
                if let Some(pref) = preferred_time {
                    use chrono::Timelike;
                    if pref.hour() >= BUSINESS_CLOSE_HOUR {
                        day = next_day;
                        continue;
                    }
                    if pref.hour() >= BUSINESS_OPEN_HOUR {
                        slot_time = day.and_time(pref);
                    }
                }
            }
            let close_time = day.and_time(hour(BUSINESS_CLOSE_HOUR));

            while slot_time + Duration::minutes(duration_minutes) <= close_time {
                let current = slot_time;
                slot_time = slot_time + Duration::hours(1);

                if current < now {
                    continue;
                }

                let slot_end = current + Duration::minutes(duration_minutes);
                let overlapping = day_events
                    .iter()
                    .filter(|e| e.overlaps(current, slot_end))
                    .count();
                if overlapping >= MAX_PARALLEL_BOOKINGS {
                    continue;
                }

                let foreign_hold = {
                    let db = self.db.lock().unwrap();
                    queries::get_hold_by_slot(&db, &slot_key(&current), &now)?
                        .map(|h| h.holder != holder)
                        .unwrap_or(false)
                };
                if foreign_hold {
                    continue;
                }

                available.push(SuggestedSlot {
                    date: day.format("%Y-%m-%d").to_string(),
                    start_time: current.format("%H:%M").to_string(),
                    start: current,
                });
                if available.len() >= SUGGESTED_SLOT_COUNT {
                    break;
                }
            }

            day = next_day;
        }

        for slot in &available {
            if let Err(e) = self.request_hold(&slot.start, holder, self.hold_ttl) {
                tracing::debug!(slot = %slot.start, error = %e, "suggested slot taken mid-scan");
            }
        }

        Ok(available)
    }

    /// Upcoming bookings whose event description carries this phone number.
    pub async fn find_bookings_by_phone(&self, phone: &str) -> Result<Vec<Booking>, Error> {
        let from = self.now_local();
        let to = from + Duration::days(BOOKING_SEARCH_DAYS);
        let events = self.calendar.list_events(from, to).await?;

        Ok(events
            .into_iter()
            .filter(|e| e.description.contains(phone))
            .map(|e| {
                let duration_minutes = e.duration_minutes();
                Booking {
                    event_id: e.id,
                    start: e.start,
                    duration_minutes,
                    summary: e.summary,
                    status: BookingStatus::Confirmed,
                }
            })
            .collect())
    }

    pub async fn cancel_booking(&self, event_id: &str) -> Result<(), Error> {
        self.calendar.delete_event(event_id).await?;
        Ok(())
    }

    /// Move a booking to a new start. Implemented as cancel-then-create;
    /// when the create step fails after the cancel succeeded, the caller
    /// gets `RescheduleIncomplete` and the original event is gone; it is
    /// never silently resurrected.
    pub async fn reschedule(
        &self,
        event_id: &str,
        new_start: NaiveDateTime,
        duration_minutes: Option<i64>,
        price: Option<f64>,
    ) -> Result<Booking, Error> {
        let existing = self.calendar.get_event(event_id).await?;

        let duration = duration_minutes
            .or_else(|| price.map(|p| (pricing::duration_hours_from_price(p) * 60.0).round() as i64))
            .unwrap_or_else(|| existing.duration_minutes());
        let new_end = new_start + Duration::minutes(duration);

        if self.overlap_count(new_start, new_end, Some(event_id)).await? >= MAX_PARALLEL_BOOKINGS {
            return Err(Error::SlotUnavailable(slot_key(&new_start)));
        }

        self.calendar.delete_event(event_id).await?;

        let description = match price {
            Some(p) => patch_price_lines(&existing.description, p, duration),
            None => existing.description.clone(),
        };
        let draft = EventDraft {
            summary: existing.summary.clone(),
            description,
            start: new_start,
            end: new_end,
        };

        match self.calendar.create_event(&draft).await {
            Ok(event) => Ok(Booking {
                event_id: event.id,
                start: new_start,
                duration_minutes: duration,
                summary: event.summary,
                status: BookingStatus::Confirmed,
            }),
            Err(e) => Err(Error::RescheduleIncomplete {
                event_id: event_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Rewrite the price and duration lines of an event description, appending
/// them when absent.
fn patch_price_lines(description: &str, price: f64, duration_minutes: i64) -> String {
    let price_line = format!("Estimated price: {price}\u{20ac}");
    let duration_line = format!(
        "Duration: {}",
        pricing::format_duration(duration_minutes as f64 / 60.0)
    );

    let mut lines: Vec<String> = vec![];
    let mut price_seen = false;
    let mut duration_seen = false;
    for line in description.lines() {
        if line.starts_with("Estimated price:") {
            lines.push(price_line.clone());
            price_seen = true;
        } else if line.starts_with("Duration:") {
            lines.push(duration_line.clone());
            duration_seen = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !price_seen {
        lines.push(price_line);
    }
    if !duration_seen {
        lines.push(duration_line);
    }
    lines.join("\n")
}

/// Human-readable listing of offered slots, grouped by day.
pub fn format_available_slots_message(slots: &[SuggestedSlot]) -> String {
    if slots.is_empty() {
        return "Unfortunately there are no free times for the dates you asked about.".to_string();
    }

    let mut days: Vec<(NaiveDate, Vec<String>)> = vec![];
    for slot in slots {
        let date = slot.start.date();
        match days.iter_mut().find(|(d, _)| *d == date) {
            Some((_, times)) => times.push(slot.start_time.clone()),
            None => days.push((date, vec![slot.start_time.clone()])),
        }
    }

    let mut message = String::from("Available times:\n");
    for (date, times) in days {
        message.push_str(&format!(
            "\n\u{1F4C5} {}, {} {}:\n   \u{23F0} {}",
            date.format("%A"),
            date.day(),
            date.format("%B"),
            times[..times.len().min(3)].join(", ")
        ));
        if times.len() > 3 {
            message.push_str(&format!(" and {} more", times.len() - 3));
        }
        message.push('\n');
    }
    message.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::errors::ServiceError;
    use crate::services::calendar::CalendarEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Barrier;

    struct MockCalendar {
        events: Mutex<Vec<CalendarEvent>>,
        deleted: Mutex<Vec<String>>,
        next_id: AtomicU32,
        created_count: AtomicU32,
        fail_create: AtomicBool,
    }

    impl MockCalendar {
        fn new() -> Self {
            Self {
                events: Mutex::new(vec![]),
                deleted: Mutex::new(vec![]),
                next_id: AtomicU32::new(1),
                created_count: AtomicU32::new(0),
                fail_create: AtomicBool::new(false),
            }
        }

        fn seed(&self, summary: &str, description: &str, start: NaiveDateTime, minutes: i64) -> String {
            let id = format!("evt{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.events.lock().unwrap().push(CalendarEvent {
                id: id.clone(),
                summary: summary.to_string(),
                description: description.to_string(),
                start,
                end: start + Duration::minutes(minutes),
            });
            id
        }
    }

    #[async_trait]
    impl CalendarProvider for MockCalendar {
        async fn list_events(
            &self,
            from: NaiveDateTime,
            to: NaiveDateTime,
        ) -> Result<Vec<CalendarEvent>, ServiceError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.overlaps(from, to))
                .cloned()
                .collect())
        }

        async fn get_event(&self, event_id: &str) -> Result<CalendarEvent, ServiceError> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == event_id)
                .cloned()
                .ok_or_else(|| ServiceError::permanent("calendar", "not found"))
        }

        async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, ServiceError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ServiceError::transient("calendar", "insert failed"));
            }
            self.created_count.fetch_add(1, Ordering::SeqCst);
            let id = format!("evt{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let event = CalendarEvent {
                id,
                summary: draft.summary.clone(),
                description: draft.description.clone(),
                start: draft.start,
                end: draft.end,
            };
            self.events.lock().unwrap().push(event.clone());
            Ok(event)
        }

        async fn delete_event(&self, event_id: &str) -> Result<(), ServiceError> {
            let mut events = self.events.lock().unwrap();
            let before = events.len();
            events.retain(|e| e.id != event_id);
            if events.len() == before {
                return Err(ServiceError::permanent("calendar", "not found"));
            }
            self.deleted.lock().unwrap().push(event_id.to_string());
            Ok(())
        }
    }

    fn arbiter(calendar: Arc<MockCalendar>) -> SlotArbiter {
        let conn = db::init_db(":memory:").unwrap();
        SlotArbiter::new(
            Arc::new(Mutex::new(conn)),
            calendar,
            chrono_tz::Europe::Athens,
            30 * 60,
        )
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    /// A weekday comfortably in the future, so past-slot filtering and
    /// date validation stay out of the way.
    fn future_monday() -> NaiveDate {
        let mut day = Utc::now().date_naive() + Duration::days(14);
        while day.weekday() != Weekday::Mon {
            day = day.succ_opt().unwrap();
        }
        day
    }

    fn details(start: NaiveDateTime) -> BookingDetails {
        BookingDetails {
            customer_name: "Maria".to_string(),
            customer_phone: "6912345678".to_string(),
            start,
            duration_minutes: 60,
            description: None,
            price: None,
        }
    }

    #[test]
    fn test_second_holder_is_rejected() {
        let arb = arbiter(Arc::new(MockCalendar::new()));
        let start = future_monday().and_time(hour(14));

        let hold = arb.request_hold(&start, "alice", Duration::minutes(30)).unwrap();
        assert_eq!(hold.holder, "alice");

        let err = arb.request_hold(&start, "bob", Duration::minutes(30)).unwrap_err();
        assert!(matches!(err, Error::SlotUnavailable(_)));

        // same holder refreshes instead of conflicting
        let refreshed = arb.request_hold(&start, "alice", Duration::minutes(30)).unwrap();
        assert_ne!(refreshed.token, hold.token);
    }

    #[test]
    fn test_concurrent_holds_at_most_one_wins() {
        let arb = Arc::new(arbiter(Arc::new(MockCalendar::new())));
        let start = future_monday().and_time(hour(15));
        let barrier = Arc::new(Barrier::new(2));

        let mut handles = vec![];
        for holder in ["alice", "bob"] {
            let arb = Arc::clone(&arb);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                arb.request_hold(&start, holder, Duration::minutes(30)).is_ok()
            }));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_expired_hold_frees_the_slot() {
        let arb = arbiter(Arc::new(MockCalendar::new()));
        let start = future_monday().and_time(hour(16));

        arb.request_hold(&start, "alice", Duration::zero()).unwrap();
        assert!(arb.request_hold(&start, "bob", Duration::minutes(30)).is_ok());
    }

    #[tokio::test]
    async fn test_confirm_creates_event_and_consumes_hold() {
        let calendar = Arc::new(MockCalendar::new());
        let arb = arbiter(Arc::clone(&calendar));
        let start = future_monday().and_time(hour(14));

        let hold = arb.request_hold(&start, "user1", Duration::minutes(30)).unwrap();
        let booking = arb.confirm(&hold.token, "user1", &details(start)).await.unwrap();

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(calendar.created_count.load(Ordering::SeqCst), 1);

        // hold is gone: a second confirm must fail without touching the
        // calendar again
        let err = arb.confirm(&hold.token, "user1", &details(start)).await.unwrap_err();
        assert!(matches!(err, Error::HoldExpired));
        assert_eq!(calendar.created_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_confirm_after_expiry_fails_without_calendar_mutation() {
        let calendar = Arc::new(MockCalendar::new());
        let arb = arbiter(Arc::clone(&calendar));
        let start = future_monday().and_time(hour(14));

        let hold = arb.request_hold(&start, "user1", Duration::zero()).unwrap();
        let err = arb.confirm(&hold.token, "user1", &details(start)).await.unwrap_err();

        assert!(matches!(err, Error::HoldExpired));
        assert_eq!(calendar.created_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confirm_rejects_foreign_token() {
        let calendar = Arc::new(MockCalendar::new());
        let arb = arbiter(Arc::clone(&calendar));
        let start = future_monday().and_time(hour(14));

        let hold = arb.request_hold(&start, "user1", Duration::minutes(30)).unwrap();
        let err = arb.confirm(&hold.token, "someone_else", &details(start)).await.unwrap_err();
        assert!(matches!(err, Error::HoldExpired));
        assert_eq!(calendar.created_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let arb = arbiter(Arc::new(MockCalendar::new()));
        let start = future_monday().and_time(hour(17));

        let hold = arb.request_hold(&start, "alice", Duration::minutes(30)).unwrap();
        arb.release(&hold.token);
        arb.release(&hold.token);
        arb.release("no-such-token");

        // slot is free again
        assert!(arb.request_hold(&start, "bob", Duration::minutes(30)).is_ok());
    }

    #[tokio::test]
    async fn test_availability_respects_capacity() {
        let calendar = Arc::new(MockCalendar::new());
        let start = future_monday().and_time(hour(14));
        calendar.seed("Tattoo - A", "", start, 60);

        let arb = arbiter(Arc::clone(&calendar));
        assert!(arb.check_availability(start, 60).await.unwrap());

        calendar.seed("Tattoo - B", "", start, 60);
        assert!(!arb.check_availability(start, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_suggest_slots_skips_sunday_capacity_and_foreign_holds() {
        let calendar = Arc::new(MockCalendar::new());
        let monday = future_monday();
        let sunday = monday - Duration::days(1);

        // 11:00 Monday is fully booked
        let eleven = monday.and_time(hour(11));
        calendar.seed("Tattoo - A", "", eleven, 60);
        calendar.seed("Tattoo - B", "", eleven, 60);

        let arb = arbiter(Arc::clone(&calendar));

        // 12:00 Monday is held by another conversation
        arb.request_hold(&monday.and_time(hour(12)), "someone_else", Duration::minutes(30))
            .unwrap();

        let slots = arb
            .suggest_slots(sunday, monday, 60, "me", None)
            .await
            .unwrap();

        assert_eq!(slots.len(), SUGGESTED_SLOT_COUNT);
        assert_eq!(slots[0].start, monday.and_time(hour(13)));
        assert_eq!(slots[1].start, monday.and_time(hour(14)));
        assert_eq!(slots[2].start, monday.and_time(hour(15)));

        // the offered slots are now held for this user: nobody else can
        // grab them
        for slot in &slots {
            assert!(matches!(
                arb.request_hold(&slot.start, "other", Duration::minutes(30)),
                Err(Error::SlotUnavailable(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_suggest_slots_honors_preferred_time_and_closing() {
        let arb = arbiter(Arc::new(MockCalendar::new()));
        let monday = future_monday();

        let slots = arb
            .suggest_slots(monday, monday, 120, "me", Some(hour(17)))
            .await
            .unwrap();

        // 17:00 and 18:00 fit a 2h slot before 20:00 close; 19:00 does not
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].start, monday.and_time(hour(17)));
        assert_eq!(slots[1].start, monday.and_time(hour(18)));
    }

    #[tokio::test]
    async fn test_find_cancel_by_phone() {
        let calendar = Arc::new(MockCalendar::new());
        let start = future_monday().and_time(hour(14));
        let id = calendar.seed(
            "Tattoo - Maria",
            "Customer: Maria\nPhone: 6912345678",
            start,
            60,
        );
        calendar.seed("Tattoo - Nikos", "Customer: Nikos\nPhone: 6998765432", start, 60);

        let arb = arbiter(Arc::clone(&calendar));
        let bookings = arb.find_bookings_by_phone("6912345678").await.unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].event_id, id);
        assert_eq!(bookings[0].status, BookingStatus::Confirmed);

        arb.cancel_booking(&id).await.unwrap();
        assert!(arb.find_bookings_by_phone("6912345678").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_moves_event() {
        let calendar = Arc::new(MockCalendar::new());
        let monday = future_monday();
        let id = calendar.seed(
            "Tattoo - Maria",
            "Customer: Maria\nPhone: 6912345678",
            monday.and_time(hour(14)),
            60,
        );

        let arb = arbiter(Arc::clone(&calendar));
        let new_start = monday.and_time(hour(16));
        let booking = arb.reschedule(&id, new_start, None, None).await.unwrap();

        assert_eq!(booking.start, new_start);
        assert_eq!(booking.duration_minutes, 60);
        assert!(calendar.deleted.lock().unwrap().contains(&id));
    }

    #[tokio::test]
    async fn test_reschedule_incomplete_on_create_failure() {
        let calendar = Arc::new(MockCalendar::new());
        let monday = future_monday();
        let id = calendar.seed(
            "Tattoo - Maria",
            "Customer: Maria\nPhone: 6912345678",
            monday.and_time(hour(14)),
            60,
        );

        let arb = arbiter(Arc::clone(&calendar));
        calendar.fail_create.store(true, Ordering::SeqCst);

        let err = arb
            .reschedule(&id, monday.and_time(hour(16)), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RescheduleIncomplete { .. }));
        // the original was cancelled and must not silently reappear
        assert!(calendar.deleted.lock().unwrap().contains(&id));
        assert!(calendar.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_patch_price_lines() {
        let original = "Customer: Maria\nPhone: 6912345678\nEstimated price: 100\u{20ac}\nDuration: 1 hour";
        let patched = patch_price_lines(original, 150.0, 90);
        assert!(patched.contains("Estimated price: 150\u{20ac}"));
        assert!(patched.contains("Duration: 1 hour and 30 minutes"));
        assert!(!patched.contains("Estimated price: 100"));

        let bare = patch_price_lines("Customer: Maria", 80.0, 60);
        assert!(bare.contains("Estimated price: 80\u{20ac}"));
        assert!(bare.contains("Duration: 1 hour"));
    }

    #[test]
    fn test_format_slots_message() {
        assert!(format_available_slots_message(&[]).contains("no free times"));

        let monday = future_monday();
        let slots: Vec<SuggestedSlot> = [11u32, 12, 13, 14]
            .iter()
            .map(|h| SuggestedSlot {
                date: monday.format("%Y-%m-%d").to_string(),
                start_time: format!("{h}:00"),
                start: monday.and_time(hour(*h)),
            })
            .collect();

        let message = format_available_slots_message(&slots);
        assert!(message.contains("Available times:"));
        assert!(message.contains("11:00, 12:00, 13:00"));
        assert!(message.contains("and 1 more"));
    }

    #[test]
    fn test_slot_key_format() {
        assert_eq!(slot_key(&dt("2025-06-16 14:00")), "2025-06-16T14:00");
    }
}
