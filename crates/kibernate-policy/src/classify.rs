//! Request classification.
//!
//! Pure functions of `(path, user agent)` and the configuration: uptime
//! monitor recognition, activity qualification, and wait-strategy routing.

use crate::config::{ProxyConfig, WaitType};

impl ProxyConfig {
    /// Whether the request comes from the configured uptime monitor.
    ///
    /// Off unless a monitor match regex is configured.
    pub fn is_uptime_monitor(&self, user_agent: &str) -> bool {
        self.uptime_monitor_user_agent.selects(user_agent)
    }

    /// Whether the request extends the idle deadline.
    ///
    /// Both the path and the user-agent family must select the request;
    /// an unconfigured family selects everything.
    pub fn qualifies_as_activity(&self, path: &str, user_agent: &str) -> bool {
        self.activity_path.selects(path) && self.activity_user_agent.selects(user_agent)
    }

    /// Wait strategy for a path: first match over connect, loading, none,
    /// falling back to the configured default.
    pub fn wait_strategy(&self, path: &str) -> WaitType {
        if self.wait_connect_path.selects(path) {
            WaitType::Connect
        } else if self.wait_loading_path.selects(path) {
            WaitType::Loading
        } else if self.wait_none_path.selects(path) {
            WaitType::None
        } else {
            self.default_wait_type
        }
    }
}
