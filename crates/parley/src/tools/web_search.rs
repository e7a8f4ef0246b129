use parley_core::tool::{Tool, ToolResult};
use reqwest::{Client, Url};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use super::execution_error;

const DUCKDUCKGO_LITE_URL: &str = "https://lite.duckduckgo.com/lite/";
const REGION: &str = "us-en";
const MAX_RESULTS: usize = 5;

#[derive(Deserialize, JsonSchema)]
pub struct WebSearchToolParameters {
    #[schemars(description = "The search query.")]
    query: String,
}

#[derive(Debug, PartialEq, Serialize)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
}

/// A tool for searching the web with DuckDuckGo.
pub struct WebSearchTool {
    client: Client,
    parameter_schema: Value,
}

impl WebSearchTool {
    /// Creates a new web search tool.
    #[inline]
    pub fn new(client: Client) -> Self {
        WebSearchTool {
            client,
            parameter_schema: schema_for!(WebSearchToolParameters).to_value(),
        }
    }
}

impl Tool for WebSearchTool {
    type Input = WebSearchToolParameters;

    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        r#"
Search the web for current information, news and facts.
Returns the top results with their titles, links and snippets."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: WebSearchToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let client = self.client.clone();
        async move {
            let url = Url::parse_with_params(
                DUCKDUCKGO_LITE_URL,
                &[("q", input.query.as_str()), ("kl", REGION)],
            )
            .map_err(execution_error)?;
            let html = client
                .get(url)
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(execution_error)?
                .text()
                .await
                .map_err(execution_error)?;

            let results = parse_results(&html, MAX_RESULTS);
            debug!("got {} results", results.len());
            serde_json::to_string(&results).map_err(execution_error)
        }
        .instrument(debug_span!("web search"))
    }
}

/// Scans the result table of a DuckDuckGo lite page.
fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();
    let mut pos = 0;
    while results.len() < max_results {
        let Some(offset) = html[pos..].find("class=\"result-link\"") else {
            break;
        };
        let link_start = pos + offset;

        let tag_start = html[..link_start].rfind("<a ").unwrap_or(link_start);
        let url = extract_attr(&html[tag_start..], "href").unwrap_or_default();

        let Some(title_start) = html[link_start..].find('>').map(|p| link_start + p + 1)
        else {
            break;
        };
        let Some(title_end) = html[title_start..].find("</a>").map(|p| title_start + p)
        else {
            break;
        };
        let title = strip_tags(&html[title_start..title_end]).trim().to_owned();

        // The snippet belongs to this result only if it comes before the
        // next link.
        let next_link = html[title_end..]
            .find("class=\"result-link\"")
            .map_or(html.len(), |p| title_end + p);
        let snippet = html[title_end..next_link]
            .find("class=\"result-snippet\"")
            .and_then(|p| {
                let start = title_end + p;
                let content_start = start + html[start..].find('>')? + 1;
                let content_end = content_start + html[content_start..].find("</td>")?;
                Some(strip_tags(&html[content_start..content_end]).trim().to_owned())
            })
            .unwrap_or_default();

        if !url.is_empty() && !title.is_empty() {
            results.push(SearchResult {
                title,
                url,
                snippet,
            });
        }
        pos = title_end;
    }
    results
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let pattern = format!("{attr}=\"");
    let start = tag.find(&pattern)? + pattern.len();
    let end = tag[start..].find('"')? + start;
    Some(html_decode(&tag[start..end]))
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    html_decode(&out)
}

fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<table>
  <tr><td>1.&nbsp;</td><td>
    <a rel="nofollow" href="https://doc.rust-lang.org/book/" class="result-link">The Rust <b>Programming</b> Language</a>
  </td></tr>
  <tr><td class="result-snippet">Learn <b>Rust</b> &amp; have fun.</td></tr>
  <tr><td>2.&nbsp;</td><td>
    <a rel="nofollow" href="https://example.com/?a=1&amp;b=2" class="result-link">Example</a>
  </td></tr>
  <tr><td>3.&nbsp;</td><td>
    <a rel="nofollow" href="https://third.example/" class="result-link">Third</a>
  </td></tr>
  <tr><td class="result-snippet">Third snippet</td></tr>
</table>
"#;

    #[test]
    fn test_parse_results() {
        let results = parse_results(PAGE, 5);
        assert_eq!(
            results,
            vec![
                SearchResult {
                    title: "The Rust Programming Language".to_owned(),
                    url: "https://doc.rust-lang.org/book/".to_owned(),
                    snippet: "Learn Rust & have fun.".to_owned(),
                },
                SearchResult {
                    title: "Example".to_owned(),
                    url: "https://example.com/?a=1&b=2".to_owned(),
                    snippet: String::new(),
                },
                SearchResult {
                    title: "Third".to_owned(),
                    url: "https://third.example/".to_owned(),
                    snippet: "Third snippet".to_owned(),
                },
            ]
        );
        assert_eq!(parse_results(PAGE, 1).len(), 1);
        assert!(parse_results("<html></html>", 5).is_empty());
    }
}
