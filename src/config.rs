/// Application-level constants
pub const APP_NAME: &str = "RadAssist";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Base URL of the clinical backend when the shell configures none.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Per-request timeout for backend calls, in seconds. Matches the
/// service's own upstream LLM timeout so this client never gives up
/// first while a report is still being generated.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default tracing filter when `RUST_LOG` is unset: quiet dependencies,
/// informative own crate.
pub fn default_log_filter() -> String {
    format!("warn,{}=info", env!("CARGO_PKG_NAME"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comes_from_cargo() {
        assert!(!APP_VERSION.is_empty());
    }

    #[test]
    fn default_filter_scopes_info_to_own_crate() {
        let filter = default_log_filter();
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("radassist=info"));
    }
}
