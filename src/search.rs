//! Hybrid web search for grounding answers.
//!
//! Queries Wikipedia's search API and DuckDuckGo's instant-answer API,
//! takes the top snippets from each, and formats a context block the
//! embedder can prepend to a prompt. Each provider fails independently:
//! a network or parse error on one side just drops that side's results,
//! and an entirely empty result set yields an empty string.

use serde_json::Value;

const WIKIPEDIA_API: &str = "https://en.wikipedia.org/w/api.php";
const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";

/// Run both providers and format the combined context block.
///
/// Never fails: provider errors are logged and swallowed, and no results
/// yields an empty string.
pub async fn hybrid_search(query: &str) -> String {
    let client = reqwest::Client::new();
    let mut results = Vec::new();

    match wikipedia_search(&client, query).await {
        Ok(Some(snippet)) => results.push(format!("[Wikipedia]: {}", snippet)),
        Ok(None) => {}
        Err(e) => tracing::debug!("wikipedia search failed: {}", e),
    }

    match duckduckgo_search(&client, query).await {
        Ok(Some(answer)) => results.push(format!("[DuckDuckGo]: {}", answer)),
        Ok(None) => {}
        Err(e) => tracing::debug!("duckduckgo search failed: {}", e),
    }

    format_context_block(&results)
}

async fn wikipedia_search(
    client: &reqwest::Client,
    query: &str,
) -> Result<Option<String>, reqwest::Error> {
    let response = client
        .get(WIKIPEDIA_API)
        .query(&[
            ("action", "query"),
            ("list", "search"),
            ("srsearch", query),
            ("format", "json"),
        ])
        .send()
        .await?;

    let body: Value = response.json().await?;
    Ok(parse_wikipedia_response(&body))
}

async fn duckduckgo_search(
    client: &reqwest::Client,
    query: &str,
) -> Result<Option<String>, reqwest::Error> {
    let response = client
        .get(DUCKDUCKGO_API)
        .query(&[
            ("q", query),
            ("format", "json"),
            ("no_html", "1"),
            ("skip_disambig", "1"),
        ])
        .send()
        .await?;

    let body: Value = response.json().await?;
    Ok(parse_duckduckgo_response(&body))
}

/// Top two search snippets, stripped of markup, joined with ". ".
fn parse_wikipedia_response(body: &Value) -> Option<String> {
    let hits = body.get("query")?.get("search")?.as_array()?;
    let snippets: Vec<String> = hits
        .iter()
        .take(2)
        .filter_map(|hit| hit.get("snippet").and_then(Value::as_str))
        .map(strip_tags)
        .filter(|s| !s.is_empty())
        .collect();

    if snippets.is_empty() {
        None
    } else {
        Some(snippets.join(". "))
    }
}

/// The abstract if present, otherwise the first related topic with text.
fn parse_duckduckgo_response(body: &Value) -> Option<String> {
    if let Some(abstract_text) = body.get("AbstractText").and_then(Value::as_str) {
        if !abstract_text.is_empty() {
            return Some(abstract_text.to_string());
        }
    }

    let topics = body.get("RelatedTopics")?.as_array()?;
    topics
        .iter()
        .filter_map(|topic| topic.get("Text").and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Remove HTML tags from a snippet.
fn strip_tags(snippet: &str) -> String {
    let mut out = String::with_capacity(snippet.len());
    let mut in_tag = false;
    for c in snippet.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Format provider results as a context block for the system prompt.
fn format_context_block(results: &[String]) -> String {
    if results.is_empty() {
        return String::new();
    }
    format!(
        "\n\nSEARCH CONTEXT (use it to answer if relevant):\n{}\n",
        results.join("\n")
    )
}
