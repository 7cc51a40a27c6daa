//! In-container HTTP caller: calls a service the sandboxed workload has
//! bound to a container-local port without ever publishing that port to
//! the host, by running `curl` inside the container via `exec` and parsing
//! its stdout. Grounded in `quixand/core/proxy.py::ProxyFacade`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::adapter::DockerAdapter;
use crate::error::{QuixandError, Result};
use crate::model::SandboxHandle;

/// Prefix written after the response body so status can be recovered from
/// combined stdout; matches `proxy.py`'s `QS_PROXY_STATUS__:` marker
/// verbatim, since an operator inspecting raw container output during
/// debugging benefits from the same recognizable string across languages.
const STATUS_MARKER: &str = "QS_PROXY_STATUS__:";

fn bash_quote(s: &str) -> String {
    let quoted = shell_quote::Bash::quote_vec(s.as_bytes());
    String::from_utf8_lossy(&quoted).to_string()
}

pub struct ProxyFacade {
    adapter: Arc<DockerAdapter>,
    handle: SandboxHandle,
    method_cache: Mutex<HashMap<String, String>>,
}

impl ProxyFacade {
    pub(crate) fn new(adapter: Arc<DockerAdapter>, handle: SandboxHandle) -> Self {
        ProxyFacade {
            adapter,
            handle,
            method_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the `curl` command and splits its combined stdout into
    /// `(status, body)` at the last occurrence of [`STATUS_MARKER`].
    async fn make_request(
        &self,
        method: &str,
        url: &str,
        payload: Option<&Value>,
        timeout: Option<u64>,
        extra_options: &str,
    ) -> Result<(u16, String)> {
        let method_upper = method.to_ascii_uppercase();
        let max_time = timeout
            .map(|t| format!("--max-time {t} "))
            .unwrap_or_default();

        let cmd = if method_upper == "GET" && payload.is_none() {
            format!(
                "curl -sS -X GET {extra_options}{max_time}{} -w '\\n{STATUS_MARKER}%{{http_code}}'",
                bash_quote(url),
            )
        } else if method_upper == "GET" {
            let query = payload
                .and_then(|p| p.as_object())
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(&value_to_query(v))))
                        .collect::<Vec<_>>()
                        .join("&")
                })
                .unwrap_or_default();
            let full_url = if query.is_empty() {
                url.to_string()
            } else if url.contains('?') {
                format!("{url}&{query}")
            } else {
                format!("{url}?{query}")
            };
            format!(
                "curl -sS -X GET {extra_options}{max_time}{} -w '\\n{STATUS_MARKER}%{{http_code}}'",
                bash_quote(&full_url),
            )
        } else {
            let json_body = serde_json::to_string(payload.unwrap_or(&Value::Object(Default::default())))?;
            format!(
                "echo {} | curl -sS -X {method_upper} {extra_options}-H 'Content-Type: application/json' {max_time}-d @- {} -w '\\n{STATUS_MARKER}%{{http_code}}'",
                bash_quote(&json_body),
                bash_quote(url),
            )
        };

        let result = self.adapter.run(&self.handle, &cmd, None, timeout).await?;
        let text = result.text;
        let idx = text
            .rfind(STATUS_MARKER)
            .ok_or_else(|| QuixandError::ProxyError("could not parse HTTP status from response".to_string()))?;
        let body = text[..idx].trim_end_matches('\n').to_string();
        let status_str = text[idx + STATUS_MARKER.len()..].trim();
        let status: u16 = status_str
            .parse()
            .map_err(|_| QuixandError::ProxyError(format!("invalid HTTP status '{status_str}'")))?;
        Ok((status, body))
    }

    /// Polls `http://localhost:{port}/health` once a second until it
    /// returns HTTP 200 or `timeout` elapses.
    pub async fn health(&self, port: u16, timeout: Duration) -> Result<()> {
        let deadline = std::time::Instant::now() + timeout;
        let url = format!("http://localhost:{port}/health");
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            if let Ok((200, _)) = self.make_request("GET", &url, None, Some(5), "").await {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1).min(remaining)).await;
        }
        Err(QuixandError::ProxyError(format!(
            "service not ready on {url} within {:?}",
            timeout
        )))
    }

    /// Calls `path` inside the container, retrying against `fallback_paths`
    /// in order when the primary path 404s, and JSON-decoding the body
    /// when possible. Matches `ProxyFacade.run`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        port: u16,
        path: &str,
        method: &str,
        payload: Option<Value>,
        timeout: Duration,
        ensure_ready: bool,
        fallback_paths: &[&str],
    ) -> Result<Value> {
        if ensure_ready {
            self.health(port, timeout.min(Duration::from_secs(30))).await?;
        }

        let url = format!("http://localhost:{port}{path}");
        let timeout_secs = timeout.as_secs().max(1);
        let (mut status, mut body) = self
            .make_request(method, &url, payload.as_ref(), Some(timeout_secs), "")
            .await?;

        if status == 404 {
            for fallback in fallback_paths {
                let alt_url = format!("http://localhost:{port}{fallback}");
                let (s, b) = self
                    .make_request(method, &alt_url, payload.as_ref(), Some(timeout_secs), "")
                    .await?;
                status = s;
                body = b;
                if status != 404 {
                    break;
                }
            }
        }

        if !(200..300).contains(&status) {
            let preview: String = body.chars().take(200).collect();
            return Err(QuixandError::ProxyError(format!(
                "HTTP {status}: {preview}"
            )));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    /// Dynamic-dispatch replacement for Python's `proxy.X(**kwargs)`:
    /// detects the endpoint's method via `OPTIONS`/`Allow` (cached by
    /// URL) when not already known, then calls it. See SPEC_FULL.md /
    /// DESIGN.md for why this is the static-API shape chosen in place of
    /// `__getattr__`.
    pub async fn call(&self, name: &str, port: u16, payload: Value, timeout: Duration) -> Result<Value> {
        let url = format!("http://localhost:{port}/{name}");
        let method = self.detect_method(&url, port).await?;
        let timeout_secs = timeout.as_secs().max(1);
        let (status, body) = self
            .make_request(&method, &url, Some(&payload), Some(timeout_secs), "")
            .await?;

        if !(200..300).contains(&status) {
            let preview: String = body.chars().take(200).collect();
            return Err(QuixandError::ProxyError(format!(
                "proxy call to {name} failed with HTTP {status}: {preview}"
            )));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    async fn detect_method(&self, url: &str, _port: u16) -> Result<String> {
        if let Some(cached) = self.method_cache.lock().get(url).cloned() {
            return Ok(cached);
        }

        let (_, body) = self.make_request("OPTIONS", url, None, Some(5), "-i ").await?;
        let allow_line = body
            .to_ascii_lowercase()
            .lines()
            .find(|l| l.starts_with("allow:"))
            .map(|l| l.to_ascii_uppercase());

        let method = allow_line.as_ref().and_then(|allow| {
            for candidate in ["POST", "GET", "PUT"] {
                if allow.contains(candidate) {
                    return Some(candidate.to_string());
                }
            }
            None
        });

        let method = method.ok_or_else(|| {
            QuixandError::ProxyError(format!(
                "endpoint {url} did not return a parseable Allow header"
            ))
        })?;

        self.method_cache.lock().insert(url.to_string(), method.clone());
        Ok(method)
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn value_to_query(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_bytes() {
        assert_eq!(urlencode("a b&c"), "a+b%26c");
        assert_eq!(urlencode("abc-123_.~"), "abc-123_.~");
    }
}
