use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use parley_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Instrument;

use super::{execution_error, google_api_error};
use super::google_auth::GoogleAuth;

const CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

fn default_max_results() -> u32 {
    10
}

/// Where events are created and read.
#[derive(Clone, Debug)]
pub struct CalendarSettings {
    /// Calendar id, `primary` for the user's main calendar.
    pub calendar_id: String,
    /// IANA time zone applied to created events.
    pub time_zone: String,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_owned(),
            time_zone: "Asia/Kolkata".to_owned(),
        }
    }
}

#[derive(Clone)]
struct CalendarClient {
    client: Client,
    auth: Arc<GoogleAuth>,
    settings: CalendarSettings,
}

impl CalendarClient {
    fn events_url(&self) -> Result<Url, ToolError> {
        let mut url = Url::parse(CALENDAR_API_URL).map_err(execution_error)?;
        url.path_segments_mut()
            .map_err(|_| execution_error("invalid calendar API URL"))?
            .extend(["calendars", self.settings.calendar_id.as_str(), "events"]);
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ToolError> {
        let token = self.auth.access_token().await.map_err(execution_error)?;
        let resp = req.bearer_auth(token).send().await.map_err(execution_error)?;
        if !resp.status().is_success() {
            return Err(google_api_error(resp).await);
        }
        resp.json().await.map_err(execution_error)
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct CreateEventToolParameters {
    #[schemars(description = "Event title.")]
    title: String,
    #[schemars(
        description = "Start time in ISO format, e.g. \"2025-10-30T10:00:00\"."
    )]
    start_datetime: String,
    #[schemars(
        description = "End time in ISO format, e.g. \"2025-10-30T11:00:00\"."
    )]
    end_datetime: String,
    #[schemars(description = "Event description.")]
    #[serde(default)]
    description: String,
    #[schemars(description = "Event location.")]
    #[serde(default)]
    location: String,
}

/// A tool for creating Google Calendar events.
pub struct CreateEventTool {
    calendar: CalendarClient,
    parameter_schema: Value,
}

impl CreateEventTool {
    /// Creates a new tool writing to the configured calendar.
    pub fn new(
        client: Client,
        auth: Arc<GoogleAuth>,
        settings: CalendarSettings,
    ) -> Self {
        CreateEventTool {
            calendar: CalendarClient {
                client,
                auth,
                settings,
            },
            parameter_schema: schema_for!(CreateEventToolParameters).to_value(),
        }
    }
}

fn event_body(input: &CreateEventToolParameters, time_zone: &str) -> Value {
    json!({
        "summary": input.title,
        "location": input.location,
        "description": input.description,
        "start": { "dateTime": input.start_datetime, "timeZone": time_zone },
        "end": { "dateTime": input.end_datetime, "timeZone": time_zone },
    })
}

impl Tool for CreateEventTool {
    type Input = CreateEventToolParameters;

    fn name(&self) -> &str {
        "create_calendar_event"
    }

    fn description(&self) -> &str {
        r#"
Create a Google Calendar event.
Times are local times in ISO format without an offset, e.g. "2025-10-30T10:00:00"."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: CreateEventToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let calendar = self.calendar.clone();
        async move {
            let body = event_body(&input, &calendar.settings.time_zone);
            let url = calendar.events_url()?;
            let created = calendar
                .send(calendar.client.post(url).json(&body))
                .await?;
            info!("created calendar event {}", created["id"]);
            Ok(json!({
                "success": true,
                "event_id": created["id"].as_str().unwrap_or_default(),
                "title": input.title,
                "start": input.start_datetime,
                "link": created["htmlLink"].as_str().unwrap_or_default(),
            })
            .to_string())
        }
        .instrument(debug_span!("create calendar event"))
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct ListEventsToolParameters {
    #[schemars(
        description = "Start of the range in ISO format, e.g. \"2025-10-30T00:00:00\"."
    )]
    start_date: String,
    #[schemars(
        description = "End of the range in ISO format, e.g. \"2025-11-30T23:59:59\"."
    )]
    end_date: String,
    #[schemars(description = "Maximum number of events to return.")]
    #[serde(default = "default_max_results")]
    max_results: u32,
}

/// A tool for listing Google Calendar events in a time range.
pub struct ListEventsTool {
    calendar: CalendarClient,
    parameter_schema: Value,
}

impl ListEventsTool {
    /// Creates a new tool reading from the configured calendar.
    pub fn new(
        client: Client,
        auth: Arc<GoogleAuth>,
        settings: CalendarSettings,
    ) -> Self {
        ListEventsTool {
            calendar: CalendarClient {
                client,
                auth,
                settings,
            },
            parameter_schema: schema_for!(ListEventsToolParameters).to_value(),
        }
    }
}

impl Tool for ListEventsTool {
    type Input = ListEventsToolParameters;

    fn name(&self) -> &str {
        "get_calendar_events"
    }

    fn description(&self) -> &str {
        "Retrieve Google Calendar events within a date range."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: ListEventsToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let calendar = self.calendar.clone();
        async move {
            let mut url = calendar.events_url()?;
            url.query_pairs_mut()
                .append_pair("timeMin", &as_utc_timestamp(&input.start_date))
                .append_pair("timeMax", &as_utc_timestamp(&input.end_date))
                .append_pair("maxResults", &input.max_results.max(1).to_string())
                .append_pair("singleEvents", "true")
                .append_pair("orderBy", "startTime");

            let body = calendar.send(calendar.client.get(url)).await?;
            let events = parse_events(&body);
            Ok(json!({
                "success": true,
                "events": events,
                "count": events.len(),
            })
            .to_string())
        }
        .instrument(debug_span!("list calendar events"))
    }
}

/// Interprets timestamps without an offset as UTC.
fn as_utc_timestamp(value: &str) -> String {
    let value = value.trim();
    if DateTime::parse_from_rfc3339(value).is_ok() {
        value.to_owned()
    } else if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
        format!("{value}T00:00:00Z")
    } else {
        format!("{value}Z")
    }
}

fn parse_events(body: &Value) -> Vec<Value> {
    let Some(items) = body["items"].as_array() else {
        return vec![];
    };
    let when = |value: &Value| {
        value["dateTime"]
            .as_str()
            .or_else(|| value["date"].as_str())
            .unwrap_or_default()
            .to_owned()
    };
    items
        .iter()
        .map(|event| {
            json!({
                "title": event["summary"].as_str().unwrap_or("No title"),
                "start": when(&event["start"]),
                "end": when(&event["end"]),
                "description": event["description"].as_str().unwrap_or_default(),
                "location": event["location"].as_str().unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_utc_timestamp() {
        assert_eq!(as_utc_timestamp("2025-10-30T00:00:00"), "2025-10-30T00:00:00Z");
        assert_eq!(as_utc_timestamp("2025-10-30T00:00:00Z"), "2025-10-30T00:00:00Z");
        assert_eq!(
            as_utc_timestamp("2025-10-30T09:00:00+05:30"),
            "2025-10-30T09:00:00+05:30"
        );
        assert_eq!(as_utc_timestamp("2025-10-30"), "2025-10-30T00:00:00Z");
    }

    #[test]
    fn test_event_body() {
        let input = CreateEventToolParameters {
            title: "Standup".to_owned(),
            start_datetime: "2025-10-30T10:00:00".to_owned(),
            end_datetime: "2025-10-30T10:15:00".to_owned(),
            description: String::new(),
            location: "Room 4".to_owned(),
        };
        assert_eq!(
            event_body(&input, "Asia/Kolkata"),
            json!({
                "summary": "Standup",
                "location": "Room 4",
                "description": "",
                "start": { "dateTime": "2025-10-30T10:00:00", "timeZone": "Asia/Kolkata" },
                "end": { "dateTime": "2025-10-30T10:15:00", "timeZone": "Asia/Kolkata" },
            })
        );
    }

    #[test]
    fn test_parse_events() {
        let body = json!({
            "items": [
                {
                    "summary": "Dentist",
                    "start": { "dateTime": "2025-10-30T09:00:00+05:30" },
                    "end": { "dateTime": "2025-10-30T10:00:00+05:30" },
                    "location": "Clinic"
                },
                {
                    "start": { "date": "2025-11-01" },
                    "end": { "date": "2025-11-02" }
                }
            ]
        });
        let events = parse_events(&body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["title"], "Dentist");
        assert_eq!(events[0]["location"], "Clinic");
        assert_eq!(events[0]["description"], "");
        assert_eq!(events[1]["title"], "No title");
        assert_eq!(events[1]["start"], "2025-11-01");
        assert!(parse_events(&json!({})).is_empty());
    }

    #[test]
    fn test_events_url() {
        let calendar = CalendarClient {
            client: Client::new(),
            auth: Arc::new(GoogleAuth::new(Client::new(), "token.json")),
            settings: CalendarSettings {
                calendar_id: "team@example.com".to_owned(),
                ..Default::default()
            },
        };
        assert_eq!(
            calendar.events_url().unwrap().as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@example.com/events"
        );
    }
}
