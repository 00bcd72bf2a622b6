//! Proxy configuration.
//!
//! Built once at startup from CLI flags and never mutated afterwards.
//! Regex pairs are represented as [`Selector`] values with their absent
//! semantics fixed at construction, so the rest of the code never has to
//! reason about missing patterns.

use regex::Regex;
use thiserror::Error;

use crate::schedule::WeeklySchedule;

/// Errors detected while assembling the configuration. All of them are
/// fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid regex for --{flag}: {source}")]
    Regex {
        flag: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid value for --{flag}: '{value}' (expected HH:MM-HH:MM)")]
    WindowFormat { flag: String, value: String },

    #[error(
        "invalid value for --{flag}: '{value}' crosses midnight; split it into two windows"
    )]
    WindowOrder { flag: String, value: String },

    #[error("defaultWaitType must be connect, loading, or none (got '{0}')")]
    WaitType(String),
}

/// What the dispatcher does with a request while the workload is not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitType {
    /// Hold the request until the workload is ready, then forward it.
    Connect,
    /// Answer immediately with the loading page; the client re-polls.
    Loading,
    /// Answer immediately with 503.
    None,
}

impl std::str::FromStr for WaitType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(WaitType::Connect),
            "loading" => Ok(WaitType::Loading),
            "none" => Ok(WaitType::None),
            other => Err(ConfigError::WaitType(other.to_string())),
        }
    }
}

impl std::fmt::Display for WaitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WaitType::Connect => "connect",
            WaitType::Loading => "loading",
            WaitType::None => "none",
        })
    }
}

/// A match/exclude regex pair.
///
/// Two absent-match semantics exist, fixed by the constructor:
///
/// - [`Selector::match_all_unless`]: an absent match regex matches
///   everything (used for the activity filters, whose CLI flags also
///   default to `.*`).
/// - [`Selector::opt_in`]: an absent match regex matches nothing, so the
///   feature stays off until a pattern is configured (uptime monitor
///   recognition and the per-strategy wait routers).
///
/// An absent exclude regex excludes nothing in both cases.
#[derive(Debug, Clone)]
pub struct Selector {
    matches: Option<Regex>,
    excludes: Option<Regex>,
    absent_matches_all: bool,
}

impl Selector {
    pub fn match_all_unless(matches: Option<Regex>, excludes: Option<Regex>) -> Self {
        Self {
            matches,
            excludes,
            absent_matches_all: true,
        }
    }

    pub fn opt_in(matches: Option<Regex>, excludes: Option<Regex>) -> Self {
        Self {
            matches,
            excludes,
            absent_matches_all: false,
        }
    }

    /// Whether any pattern is configured at all.
    pub fn is_configured(&self) -> bool {
        self.matches.is_some() || self.excludes.is_some()
    }

    pub fn selects(&self, input: &str) -> bool {
        let matched = match &self.matches {
            Some(re) => re.is_match(input),
            None => self.absent_matches_all,
        };
        if !matched {
            return false;
        }
        match &self.excludes {
            Some(re) => !re.is_match(input),
            None => true,
        }
    }
}

/// Compile an optional regex flag. An empty value means "not configured";
/// the flag name is carried into the error for a usable startup message.
///
/// The pattern flavor is the `regex` crate's syntax.
pub fn compile_flag(flag: &str, value: &str) -> Result<Option<Regex>, ConfigError> {
    if value.is_empty() {
        return Ok(None);
    }
    Regex::new(value)
        .map(Some)
        .map_err(|source| ConfigError::Regex {
            flag: flag.to_string(),
            source,
        })
}

/// Immutable proxy configuration, constructed at startup.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Namespace of the service and deployment.
    pub namespace: String,
    /// Service name; also the backend host inside the cluster.
    pub service: String,
    /// Deployment scaled up and down.
    pub deployment: String,
    /// Public listener port.
    pub listen_port: u16,
    /// Backend service port.
    pub service_port: u16,
    /// Prefix prepended to every forwarded path.
    pub target_path_prefix: String,
    /// Seconds without qualifying activity before deactivation.
    pub idle_timeout_secs: u16,
    /// Wait strategy for paths not claimed by any per-strategy router.
    pub default_wait_type: WaitType,
    pub activity_path: Selector,
    pub activity_user_agent: Selector,
    pub wait_connect_path: Selector,
    pub wait_loading_path: Selector,
    pub wait_none_path: Selector,
    pub uptime_monitor_user_agent: Selector,
    pub uptime_monitor_response_code: u16,
    pub uptime_monitor_response_message: String,
    pub schedule: WeeklySchedule,
    /// In-band readiness URL; empty disables the readiness gate.
    pub readiness_probe_path: String,
    /// Ceiling for the readiness gate; 0 means unbounded.
    pub readiness_timeout_secs: u16,
}

impl ProxyConfig {
    /// Base URL requests are forwarded to, without a trailing slash.
    pub fn target_base_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.service, self.service_port, self.target_path_prefix
        )
    }

    /// Whether any request can be answered with the loading strategy, in
    /// which case the loading template must be available at startup.
    pub fn loading_reachable(&self) -> bool {
        self.default_wait_type == WaitType::Loading || self.wait_loading_path.is_configured()
    }
}
