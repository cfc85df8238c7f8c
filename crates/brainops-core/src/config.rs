//! Environment lookups shared by the `from_env()` constructors.
//!
//! Unset, empty and unparsable variables all fall back to the caller's
//! default; configuration never fails because of a typo in the environment.

use std::str::FromStr;

/// Parse `key` from the environment, if set and valid.
pub fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
}

/// Parse `key` from the environment or return `default`.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).unwrap_or(default)
}

/// Read a string variable or return `default`.
pub fn env_string(key: &str, default: &str) -> String {
    env_opt::<String>(key).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_fallbacks() {
        std::env::set_var("BRAINOPS_TEST_CFG_NUM", "42");
        std::env::set_var("BRAINOPS_TEST_CFG_BAD", "forty-two");
        std::env::set_var("BRAINOPS_TEST_CFG_EMPTY", "  ");

        assert_eq!(env_or("BRAINOPS_TEST_CFG_NUM", 1u64), 42);
        assert_eq!(env_or("BRAINOPS_TEST_CFG_BAD", 1u64), 1);
        assert_eq!(env_or("BRAINOPS_TEST_CFG_EMPTY", 7usize), 7);
        assert_eq!(env_or("BRAINOPS_TEST_CFG_UNSET_XYZ", 3u32), 3);
        assert_eq!(env_string("BRAINOPS_TEST_CFG_EMPTY", "dflt"), "dflt");
        assert!(env_opt::<usize>("BRAINOPS_TEST_CFG_UNSET_XYZ").is_none());
    }
}
