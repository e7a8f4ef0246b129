use parley_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Instrument;

use super::{execution_error, google_api_error};

const YOUTUBE_SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const DESCRIPTION_MAX_CHARS: usize = 200;

fn default_max_results() -> u32 {
    5
}

#[derive(Deserialize, JsonSchema)]
pub struct YouTubeSearchToolParameters {
    #[schemars(
        description = "Search query, e.g. \"python tutorial\" or \"how to cook pasta\"."
    )]
    query: String,
    #[schemars(description = "Maximum number of results to return.")]
    #[serde(default = "default_max_results")]
    max_results: u32,
}

/// A tool for searching videos with the YouTube Data API.
pub struct YouTubeSearchTool {
    client: Client,
    api_key: Option<String>,
    parameter_schema: Value,
}

impl YouTubeSearchTool {
    /// Creates a new YouTube search tool.
    #[inline]
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        YouTubeSearchTool {
            client,
            api_key,
            parameter_schema: schema_for!(YouTubeSearchToolParameters)
                .to_value(),
        }
    }
}

impl Tool for YouTubeSearchTool {
    type Input = YouTubeSearchToolParameters;

    fn name(&self) -> &str {
        "search_youtube"
    }

    fn description(&self) -> &str {
        r#"
Search for YouTube videos based on a query.
Returns videos with their title, channel and URL."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: YouTubeSearchToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        async move {
            let Some(api_key) = api_key else {
                return Err(ToolError::execution_error()
                    .with_reason("YouTube API key not found"));
            };
            let max_results = input.max_results.clamp(1, 50).to_string();
            let url = Url::parse_with_params(
                YOUTUBE_SEARCH_URL,
                &[
                    ("part", "snippet"),
                    ("q", input.query.as_str()),
                    ("maxResults", max_results.as_str()),
                    ("type", "video"),
                    ("key", api_key.as_str()),
                ],
            )
            .map_err(execution_error)?;

            let resp = client.get(url).send().await.map_err(execution_error)?;
            if !resp.status().is_success() {
                return Err(google_api_error(resp).await);
            }
            let body: Value = resp.json().await.map_err(execution_error)?;

            let videos = parse_videos(&body);
            Ok(json!({
                "success": true,
                "count": videos.len(),
                "videos": videos,
            })
            .to_string())
        }
        .instrument(debug_span!("youtube search"))
    }
}

fn parse_videos(body: &Value) -> Vec<Value> {
    let Some(items) = body["items"].as_array() else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| {
            let video_id = item["id"]["videoId"].as_str()?;
            let snippet = &item["snippet"];
            let text = |value: &Value| value.as_str().unwrap_or_default().to_owned();
            let mut description: String = snippet["description"]
                .as_str()
                .unwrap_or_default()
                .chars()
                .take(DESCRIPTION_MAX_CHARS)
                .collect();
            description.push_str("...");
            Some(json!({
                "title": text(&snippet["title"]),
                "channel": text(&snippet["channelTitle"]),
                "description": description,
                "url": format!("https://www.youtube.com/watch?v={video_id}"),
                "thumbnail": text(&snippet["thumbnails"]["default"]["url"]),
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_videos() {
        let long = "a".repeat(250);
        let body = json!({
            "items": [
                {
                    "id": { "kind": "youtube#video", "videoId": "abc123" },
                    "snippet": {
                        "title": "Rust in 100 Seconds",
                        "channelTitle": "Fireship",
                        "description": long,
                        "thumbnails": { "default": { "url": "https://i.ytimg.com/vi/abc123/default.jpg" } }
                    }
                },
                {
                    "id": { "kind": "youtube#channel", "channelId": "xyz" },
                    "snippet": { "title": "Not a video" }
                }
            ]
        });
        let videos = parse_videos(&body);
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0]["url"], "https://www.youtube.com/watch?v=abc123");
        assert_eq!(videos[0]["channel"], "Fireship");
        let description = videos[0]["description"].as_str().unwrap();
        assert_eq!(description.len(), 203);
        assert!(description.ends_with("..."));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let tool = YouTubeSearchTool::new(Client::new(), None);
        let err = tool
            .execute(YouTubeSearchToolParameters {
                query: "rust".to_owned(),
                max_results: 5,
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "YouTube API key not found");
    }
}
