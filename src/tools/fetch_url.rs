use super::{ToolError, ToolSet};
use std::sync::Arc;
use std::sync::OnceLock;

const MAX_FETCH_CHARS: usize = 50_000;

/// Shared HTTP client — created once, reused across all calls.
fn http_client() -> &'static reqwest::blocking::Client {
    static CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new())
    })
}

pub fn register(tools: &mut ToolSet) {
    tools
        .insert(
            "fetch_url",
            "Fetch a URL and return its text content",
            Arc::new(|args| {
                let url = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
                    ToolError::InvalidArguments("fetch_url(url) expects a URL".to_string())
                })?;
                fetch(url)
            }),
        )
        .expect("fetch_url is not a reserved name");
}

fn fetch(url: &str) -> Result<String, ToolError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ToolError::InvalidArguments(
            "URL must start with http:// or https://".to_string(),
        ));
    }

    let response = http_client()
        .get(url)
        .header("User-Agent", "replbox/0.2.0")
        .send()
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to fetch URL '{}': {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::ExecutionFailed(format!(
            "HTTP error {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )));
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = response
        .text()
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

    let text = if content_type.contains("text/html") {
        html_to_text(&body)
    } else {
        body
    };

    if text.len() > MAX_FETCH_CHARS {
        let mut end = MAX_FETCH_CHARS;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Ok(format!(
            "{}\n\n... (truncated, {} total chars)",
            &text[..end],
            text.len()
        ))
    } else {
        Ok(text)
    }
}

/// Strip HTML tags, dropping script and style bodies entirely.
fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 3);
    let mut in_tag = false;
    let mut name_done = false;
    let mut skip_depth = 0usize;
    let mut tag_name = String::with_capacity(16);

    for ch in html.chars() {
        if ch == '<' {
            in_tag = true;
            name_done = false;
            tag_name.clear();
            continue;
        }
        if in_tag {
            if ch == '>' {
                in_tag = false;
                let name = tag_name.to_ascii_lowercase();
                if name == "script" || name == "style" {
                    skip_depth += 1;
                } else if (name == "/script" || name == "/style") && skip_depth > 0 {
                    skip_depth -= 1;
                }
            } else if ch.is_whitespace() {
                name_done = true;
            } else if !name_done && tag_name.len() < 16 {
                tag_name.push(ch);
            }
            continue;
        }
        if skip_depth == 0 {
            text.push(ch);
        }
    }

    // Collapse runs of blank lines left behind by stripped markup.
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
