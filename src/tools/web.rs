use crate::tools::base::{
    ActionDescriptor, ExecutionContext, SubagentAccess, Tool, ToolCapabilities, ToolParam, ToolResult,
};
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;

const MAX_BODY_BYTES: usize = 512 * 1024;
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";
const INSTANT_ANSWER_URL: &str = "https://api.duckduckgo.com/";
const HTML_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Calls an instant-answer JSON endpoint plus a web-search HTML endpoint
/// and merges the two into one result block.
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch_capped(&self, url: reqwest::RequestBuilder) -> anyhow::Result<String> {
        let response = url.send().await?;
        let mut body = Vec::new();
        let mut stream_resp = response;
        while let Some(chunk) = stream_resp.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() > MAX_BODY_BYTES {
                body.truncate(MAX_BODY_BYTES);
                break;
            }
        }
        Ok(String::from_utf8_lossy(&body).to_string())
    }

    async fn instant_answer(&self, query: &str) -> Option<String> {
        let resp = self
            .fetch_capped(self.client.get(INSTANT_ANSWER_URL).query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ]))
            .await
            .ok()?;
        let json: Value = serde_json::from_str(&resp).ok()?;
        let abstract_text = json.get("AbstractText").and_then(Value::as_str).unwrap_or("");
        if abstract_text.is_empty() {
            None
        } else {
            Some(decode_entities(abstract_text))
        }
    }

    async fn html_results(&self, query: &str, count: usize) -> anyhow::Result<Vec<String>> {
        let html = self
            .fetch_capped(self.client.get(HTML_SEARCH_URL).query(&[("q", query)]))
            .await?;
        let document = Html::parse_document(&html);
        let result_sel = Selector::parse(".result").unwrap();
        let link_sel = Selector::parse(".result__a").unwrap();
        let snippet_sel = Selector::parse(".result__snippet").unwrap();

        let mut results = Vec::new();
        for (i, result) in document.select(&result_sel).enumerate() {
            if i >= count {
                break;
            }
            let Some(link) = result.select(&link_sel).next() else {
                continue;
            };
            let title = decode_entities(&link.text().collect::<String>());
            let href = link.value().attr("href").unwrap_or("").to_string();
            let snippet = result
                .select(&snippet_sel)
                .next()
                .map(|s| decode_entities(&s.text().collect::<String>()))
                .unwrap_or_default();
            results.push(format!("{}. {title} — {href}\n   {snippet}", i + 1));
        }
        Ok(results)
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return an instant answer (if any) plus top results."
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![
            ToolParam {
                name: "query",
                schema_type: "string",
                description: "search query",
                required: true,
            },
            ToolParam {
                name: "count",
                schema_type: "integer",
                description: "number of results to return, 1-10",
                required: false,
            },
        ]
    }

    async fn execute(&self, _ctx: &ExecutionContext, params: &Value) -> ToolResult {
        let Some(query) = params.get("query").and_then(Value::as_str) else {
            return ToolResult::error("missing required parameter: query");
        };
        let count = params
            .get("count")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, 10) as usize)
            .unwrap_or(5);

        let instant = self.instant_answer(query).await;
        let mut sections = Vec::new();
        if let Some(text) = instant {
            sections.push(format!("Instant answer: {text}"));
        }

        match self.html_results(query, count).await {
            Ok(results) if !results.is_empty() => sections.push(results.join("\n")),
            Ok(_) => sections.push(format!("No results for: {query}")),
            Err(e) => sections.push(format!("web search unavailable: {e}")),
        }

        ToolResult::new(sections.join("\n\n"))
    }

    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            built_in: true,
            network_outbound: true,
            subagent_access: SubagentAccess::Full,
            actions: vec![ActionDescriptor { name: "search", read_only: true }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_entities_handles_common_set() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&quot;hi&quot; &#39;there&#39;"), "\"hi\" 'there'");
    }

    #[tokio::test]
    async fn count_parameter_clamps_into_range() {
        let tool = WebSearchTool::new();
        let ctx = ExecutionContext::new("api", "1");
        // Hits the real network in CI-less environments this crate targets;
        // this asserts only the parameter parsing contract via a guard on
        // the tool's declared parameter set, not a live call.
        let params = tool.parameters();
        assert!(params.iter().any(|p| p.name == "count" && !p.required));
        let _ = ctx;
    }
}
