//! Typed configuration for the render-strategy engine and live-state sync fabric.
//!
//! Every tunable named across the data model and external interfaces gets a plain
//! struct with a `Default` matching the stated defaults, plus a `from_env()` built on
//! `envy`, the same crate the framework's dependency manifest already carries for this
//! purpose. Structs that nest other config structs (`HubConfig` wraps `AdmissionConfig`)
//! compose their `from_env()` manually since `envy` itself only flattens one level.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the Page Cache (C3).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries held before FIFO eviction kicks in. `-1` disables eviction.
    pub max_entries: i64,
    /// Optional absolute TTL, independent of ISR's revalidate clock. `None` disables it.
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl_seconds: None,
        }
    }
}

impl CacheConfig {
    /// Reads overrides from `WAVEFRONT_CACHE_*` environment variables, falling back to
    /// [`Default`] for anything unset.
    pub fn from_env() -> Self {
        envy::prefixed("WAVEFRONT_CACHE_")
            .from_env()
            .unwrap_or_default()
    }

    /// Returns the configured TTL as a [`Duration`], if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}

/// Configuration for the Revalidation Scheduler (C4).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevalidationConfig {
    /// Global concurrency cap on in-flight ISR background rebuilds.
    pub isr_concurrency: usize,
    /// How long a PPR follower waits on the shell-build completion signal before
    /// falling back to an inline, uncached render.
    pub shell_wait_window_millis: u64,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            isr_concurrency: 10,
            shell_wait_window_millis: 2_000,
        }
    }
}

impl RevalidationConfig {
    /// Reads overrides from `WAVEFRONT_REVALIDATE_*` environment variables.
    pub fn from_env() -> Self {
        envy::prefixed("WAVEFRONT_REVALIDATE_")
            .from_env()
            .unwrap_or_default()
    }

    pub fn shell_wait_window(&self) -> Duration {
        Duration::from_millis(self.shell_wait_window_millis)
    }
}

/// Bundles the config the `RenderOrchestrator` needs at construction.
#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    pub cache: CacheConfig,
    pub revalidation: RevalidationConfig,
}

impl RenderConfig {
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            revalidation: RevalidationConfig::from_env(),
        }
    }
}

/// Configuration for WebSocket connection admission (part of C5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Token bucket refill rate, in tokens per second.
    pub refill_per_second: f64,
    /// Token bucket burst capacity.
    pub burst: u32,
    /// Maximum accepted WebSocket frame size, in bytes.
    pub max_frame_bytes: usize,
    /// Heartbeat interval; a client missing two consecutive heartbeats is dropped.
    pub heartbeat_seconds: u64,
    /// Max reconnect attempts advertised to clients (informational; enforced client-side).
    pub max_reconnect_attempts: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            refill_per_second: 0.2,
            burst: 5,
            max_frame_bytes: 64 * 1024,
            heartbeat_seconds: 30,
            max_reconnect_attempts: 5,
        }
    }
}

impl AdmissionConfig {
    pub fn from_env() -> Self {
        envy::prefixed("WAVEFRONT_HUB_")
            .from_env()
            .unwrap_or_default()
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds)
    }
}

/// Configuration supplied to `StateSyncHub::new`.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub admission: AdmissionConfig,
    /// Bounded capacity of each client's outbound send queue.
    pub send_queue_capacity: usize,
    /// When `true` (the default), outbound updates send only changed keys relative to
    /// the client's `lastSentState`; when `false`, every broadcast sends a full snapshot.
    pub diff_enabled: bool,
    /// When `true`, outbound payloads over `compression_threshold_bytes` are wrapped in
    /// a `CompressedEnvelope`.
    pub compression_enabled: bool,
    /// Payload size, in bytes, above which compression is applied.
    pub compression_threshold_bytes: usize,
    /// Name of the pub/sub channel the hub publishes broadcasts to and subscribes on.
    pub channel: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionConfig::default(),
            send_queue_capacity: 64,
            diff_enabled: true,
            compression_enabled: true,
            compression_threshold_bytes: 1024,
            channel: "wavefront:state".to_string(),
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self {
            admission: AdmissionConfig::from_env(),
            send_queue_capacity: std::env::var("WAVEFRONT_HUB_SEND_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
            ..Self::default()
        }
    }
}

/// Configuration for the remote action endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Maximum accepted request body size, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ActionConfig {
    pub fn from_env() -> Self {
        envy::prefixed("WAVEFRONT_ACTION_")
            .from_env()
            .unwrap_or_default()
    }
}

/// Configuration for the two-stage CSRF middleware pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Name of the cookie the issuer middleware sets and the validator middleware reads.
    pub cookie_name: String,
    /// Name of the request header the validator middleware compares against the cookie.
    pub header_name: String,
    /// Cookie lifetime, in seconds.
    pub cookie_ttl_seconds: i64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "wavefront_csrf".to_string(),
            header_name: "x-csrf-token".to_string(),
            cookie_ttl_seconds: 86_400,
        }
    }
}

impl CsrfConfig {
    pub fn from_env() -> Self {
        envy::prefixed("WAVEFRONT_CSRF_")
            .from_env()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults_match_spec() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.max_entries, 500);
        assert!(cfg.ttl_seconds.is_none());
    }

    #[test]
    fn admission_config_defaults_match_spec() {
        let cfg = AdmissionConfig::default();
        assert_eq!(cfg.refill_per_second, 0.2);
        assert_eq!(cfg.burst, 5);
        assert_eq!(cfg.max_frame_bytes, 65536);
        assert_eq!(cfg.heartbeat_seconds, 30);
    }

    #[test]
    fn revalidation_config_defaults_match_spec() {
        assert_eq!(RevalidationConfig::default().isr_concurrency, 10);
    }

    #[test]
    fn action_config_defaults_match_spec() {
        assert_eq!(ActionConfig::default().max_body_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn csrf_config_defaults_are_sensible() {
        let cfg = CsrfConfig::default();
        assert_eq!(cfg.cookie_name, "wavefront_csrf");
        assert_eq!(cfg.header_name, "x-csrf-token");
        assert!(cfg.cookie_ttl_seconds > 0);
    }
}
