//! Bucket region resolution.
//!
//! A pure precedence chain, evaluated once at store construction: the
//! explicit configuration value wins, then the SDK region variable, then
//! the bare `REGION` variable. A `None` result defers to the SDK default.

/// Primary region environment variable.
pub const REGION_ENV: &str = "AWS_REGION";

/// Fallback region environment variable.
pub const REGION_FALLBACK_ENV: &str = "REGION";

/// Resolve the bucket region. `lookup` abstracts the environment so the
/// chain is testable without mutating process state.
pub fn resolve_region<F>(explicit: Option<&str>, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(explicit.map(str::to_string))
        .or_else(|| non_empty(lookup(REGION_ENV)))
        .or_else(|| non_empty(lookup(REGION_FALLBACK_ENV)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
