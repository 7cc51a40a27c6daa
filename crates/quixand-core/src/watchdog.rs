//! Idle/lifetime reaper loop, grounded in `quixand/core/watchdog.py`. This
//! module holds the pure polling logic; `quixand-watchdog` is the thin
//! binary that runs it as a detached, one-sandbox-per-process reaper
//! (process model grounded in `sandboxer.rs`/`children.rs`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::adapter::DockerAdapter;
use crate::error::Result;
use crate::model::SandboxHandle;

/// Floor added to `timeout_seconds` when computing the hard lifetime
/// deadline, so a short idle timeout doesn't also imply a near-immediate
/// hard cap. Matches spec.md §4.4's `timeout_seconds + 60s` term.
const HARD_DEADLINE_FLOOR_SECONDS: i64 = 60;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Watchdog {
    adapter: Arc<DockerAdapter>,
    sandbox_id: String,
}

impl Watchdog {
    pub fn new(adapter: Arc<DockerAdapter>, sandbox_id: String) -> Self {
        Watchdog {
            adapter,
            sandbox_id,
        }
    }

    /// Blocks the current thread, polling once a second until the sandbox
    /// is reaped or the state record disappears (e.g. a concurrent
    /// `shutdown()` beat the watchdog to it).
    pub async fn run(&self) -> Result<()> {
        loop {
            let handle = match self.adapter.store().get(&self.sandbox_id) {
                Some(h) => h,
                None => {
                    log::debug!("sandbox {} has no state record, exiting", self.sandbox_id);
                    return Ok(());
                }
            };

            if !self
                .adapter
                .runtime()
                .container_exists(&handle.container_id)
                .await
                .unwrap_or(false)
            {
                log::debug!("container for {} is gone, cleaning up state", self.sandbox_id);
                let _ = self.adapter.store().remove(&self.sandbox_id);
                self.adapter.cleanup_host_dirs(&self.sandbox_id);
                return Ok(());
            }

            if let Some(reason) = expired(&handle, Utc::now()) {
                log::info!("reaping sandbox {} ({reason})", self.sandbox_id);
                self.adapter.shutdown(&handle).await?;
                return Ok(());
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Pure deadline check, split out from [`Watchdog::run`] so the poll-loop
/// plumbing doesn't have to be exercised to test the deadline arithmetic.
fn expired(handle: &SandboxHandle, now: chrono::DateTime<Utc>) -> Option<&'static str> {
    let timeout = handle.timeout_seconds as i64;

    let idle_deadline = handle.last_active_at + chrono::Duration::seconds(timeout);
    if now >= idle_deadline {
        return Some("idle timeout exceeded");
    }

    let hard_lifetime_seconds = (2 * timeout).max(timeout + HARD_DEADLINE_FLOOR_SECONDS);
    let hard_deadline = handle.created_at + chrono::Duration::seconds(hard_lifetime_seconds);
    if now >= hard_deadline {
        return Some("max lifetime exceeded");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SandboxHandle;

    fn handle_with(last_active_secs_ago: i64, created_secs_ago: i64, timeout: u64) -> SandboxHandle {
        let now = Utc::now();
        SandboxHandle {
            id: "sbx".to_string(),
            container_id: "c1".to_string(),
            runtime: "docker".to_string(),
            workdir: "/workspace".to_string(),
            created_at: now - chrono::Duration::seconds(created_secs_ago),
            last_active_at: now - chrono::Duration::seconds(last_active_secs_ago),
            timeout_seconds: timeout,
            metadata: serde_json::Value::Null,
            adapter: "local-docker".to_string(),
        }
    }

    #[test]
    fn not_expired_when_recently_active() {
        let h = handle_with(5, 5, 300);
        assert!(expired(&h, Utc::now()).is_none());
    }

    #[test]
    fn expired_on_idle_timeout() {
        let h = handle_with(301, 301, 300);
        assert_eq!(expired(&h, Utc::now()), Some("idle timeout exceeded"));
    }

    /// timeout=10s => hard_deadline = created_at + max(20, 70) = +70s;
    /// kept alive (last_active 1s ago) but created 71s ago should still
    /// hit the hard cap, matching spec.md §4.4's `timeout_seconds + 60s` floor.
    #[test]
    fn expired_on_hard_lifetime_even_if_active() {
        let h = handle_with(1, 71, 10);
        assert_eq!(expired(&h, Utc::now()), Some("max lifetime exceeded"));
    }

    /// timeout=300s => hard_deadline = created_at + max(600, 360) = +600s;
    /// at 200s since creation, neither deadline has passed.
    #[test]
    fn not_expired_before_doubled_timeout() {
        let h = handle_with(1, 200, 300);
        assert!(expired(&h, Utc::now()).is_none());
    }
}
