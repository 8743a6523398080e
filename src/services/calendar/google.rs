use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::{CalendarEvent, CalendarProvider, EventDraft};
use crate::config::AppConfig;
use crate::errors::ServiceError;

const SERVICE: &str = "calendar";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for a Google Calendar v3 style API, scoped to one calendar
/// id and the studio timezone. No retries here: retry policy lives in the
/// language model adapter only.
pub struct GoogleCalendarClient {
    base_url: String,
    token: String,
    calendar_id: String,
    tz: Tz,
    client: reqwest::Client,
}

impl GoogleCalendarClient {
    pub fn new(base_url: String, token: String, calendar_id: String, tz: Tz) -> Self {
        Self {
            base_url,
            token,
            calendar_id,
            tz,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &AppConfig, tz: Tz) -> Self {
        Self::new(
            config.calendar_base_url.clone(),
            config.calendar_token.clone(),
            config.calendar_id.clone(),
            tz,
        )
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url.trim_end_matches('/'),
            self.calendar_id
        )
    }

    fn to_rfc3339(&self, local: NaiveDateTime) -> Result<String, ServiceError> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.to_rfc3339())
            .ok_or_else(|| {
                ServiceError::permanent(SERVICE, format!("invalid local time: {local}"))
            })
    }

    fn parse_event(&self, item: &Value) -> Option<CalendarEvent> {
        // all-day events carry `date` instead of `dateTime`; they never
        // block a slot
        let start = item["start"]["dateTime"].as_str()?;
        let end = item["end"]["dateTime"].as_str()?;
        let start = DateTime::parse_from_rfc3339(start).ok()?;
        let end = DateTime::parse_from_rfc3339(end).ok()?;

        Some(CalendarEvent {
            id: item["id"].as_str()?.to_string(),
            summary: item["summary"].as_str().unwrap_or_default().to_string(),
            description: item["description"].as_str().unwrap_or_default().to_string(),
            start: start.with_timezone(&self.tz).naive_local(),
            end: end.with_timezone(&self.tz).naive_local(),
        })
    }

    async fn read_body(&self, resp: reqwest::Response) -> Result<Value, ServiceError> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;
        if !status.is_success() {
            return Err(ServiceError::from_status(SERVICE, status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| ServiceError::permanent(SERVICE, format!("invalid JSON response: {e}")))
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    async fn list_events(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, ServiceError> {
        let resp = self
            .client
            .get(self.events_url())
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .query(&[
                ("timeMin", self.to_rfc3339(from)?),
                ("timeMax", self.to_rfc3339(to)?),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        let data = self.read_body(resp).await?;
        let items = data["items"].as_array().cloned().unwrap_or_default();
        Ok(items.iter().filter_map(|i| self.parse_event(i)).collect())
    }

    async fn get_event(&self, event_id: &str) -> Result<CalendarEvent, ServiceError> {
        let resp = self
            .client
            .get(format!("{}/{event_id}", self.events_url()))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        let data = self.read_body(resp).await?;
        self.parse_event(&data)
            .ok_or_else(|| ServiceError::permanent(SERVICE, "event has no timed start"))
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, ServiceError> {
        let body = json!({
            "summary": draft.summary,
            "description": draft.description,
            "start": {
                "dateTime": self.to_rfc3339(draft.start)?,
                "timeZone": self.tz.name(),
            },
            "end": {
                "dateTime": self.to_rfc3339(draft.end)?,
                "timeZone": self.tz.name(),
            },
            "reminders": {
                "useDefault": false,
                "overrides": [{"method": "popup", "minutes": 60}],
            },
        });

        let resp = self
            .client
            .post(self.events_url())
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        let data = self.read_body(resp).await?;
        self.parse_event(&data)
            .ok_or_else(|| ServiceError::permanent(SERVICE, "created event came back unreadable"))
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), ServiceError> {
        let resp = self
            .client
            .delete(format!("{}/{event_id}", self.events_url()))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(SERVICE, status, &text));
        }
        Ok(())
    }
}
