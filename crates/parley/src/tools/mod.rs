//! A set of built-in tools that models can use.

mod calculator;
mod calendar;
mod google_auth;
mod stock;
mod web_search;
mod youtube;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use parley_core::AgentBuilder;
use parley_core::tool::Error as ToolError;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

pub use calculator::CalculatorTool;
pub use calendar::{CalendarSettings, CreateEventTool, ListEventsTool};
pub use google_auth::{AuthError, GoogleAuth};
pub use stock::StockPriceTool;
pub use web_search::WebSearchTool;
pub use youtube::YouTubeSearchTool;

use crate::config::ToolsConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn execution_error<E: Display>(err: E) -> ToolError {
    ToolError::execution_error().with_reason(err.to_string())
}

/// Turns a failed Google API response into a tool error.
///
/// The message from the `{"error": {"message": ...}}` envelope is used when
/// the body has one, the status line otherwise.
pub(crate) async fn google_api_error(resp: Response) -> ToolError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    execution_error(google_api_error_message(status, &body))
}

fn google_api_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|body| body["error"]["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| status.to_string())
}

/// Returns the HTTP client shared by the built-in tools.
pub fn http_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|err| {
            warn!("failed to configure HTTP client: {err}");
            Client::new()
        })
}

/// Registers every built-in tool that `config` does not disable.
///
/// Tools whose API key is missing are still registered; they answer the
/// model with an error explaining what is missing.
pub fn register_tools(
    mut builder: AgentBuilder,
    config: &ToolsConfig,
) -> AgentBuilder {
    let client = http_client();

    if config.is_enabled("web_search") {
        builder = builder.with_tool(WebSearchTool::new(client.clone()));
    }
    if config.is_enabled("get_stock_price") {
        builder = builder.with_tool(StockPriceTool::new(
            client.clone(),
            config.alphavantage_api_key.clone(),
        ));
    }
    if config.is_enabled("calculator") {
        builder = builder.with_tool(CalculatorTool::new());
    }

    let auth = Arc::new(GoogleAuth::new(
        client.clone(),
        config.google_token_path(),
    ));
    let defaults = CalendarSettings::default();
    let settings = CalendarSettings {
        calendar_id: config.calendar_id.clone().unwrap_or(defaults.calendar_id),
        time_zone: config.time_zone.clone().unwrap_or(defaults.time_zone),
    };
    if config.is_enabled("create_calendar_event") {
        builder = builder.with_tool(CreateEventTool::new(
            client.clone(),
            auth.clone(),
            settings.clone(),
        ));
    }
    if config.is_enabled("get_calendar_events") {
        builder = builder.with_tool(ListEventsTool::new(
            client.clone(),
            auth,
            settings,
        ));
    }

    if config.is_enabled("search_youtube") {
        builder = builder.with_tool(YouTubeSearchTool::new(
            client,
            config.youtube_api_key.clone(),
        ));
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_api_error_message() {
        let body = r#"{"error": {"code": 403, "message": "Quota exceeded"}}"#;
        assert_eq!(
            google_api_error_message(StatusCode::FORBIDDEN, body),
            "Quota exceeded"
        );
        assert_eq!(
            google_api_error_message(
                StatusCode::BAD_GATEWAY,
                "<html>Bad Gateway</html>"
            ),
            "502 Bad Gateway"
        );
        assert_eq!(
            google_api_error_message(StatusCode::NOT_FOUND, r#"{"error": "gone"}"#),
            "404 Not Found"
        );
    }
}
