//! Deterministic cache keys for memoized operations
//!
//! Keyword arguments are sorted by name before hashing, so call-site
//! argument order never changes the resulting key.

use sha2::{Digest, Sha256};

/// Build a deterministic cache key from a prefix, positional arguments
/// and named arguments.
pub fn cache_key(prefix: &str, args: &[&str], kwargs: &[(&str, &str)]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(1 + args.len() + kwargs.len());
    parts.push(prefix.to_string());
    parts.extend(args.iter().map(|a| a.to_string()));

    let mut named: Vec<(&str, &str)> = kwargs.to_vec();
    named.sort_by_key(|(name, _)| *name);
    parts.extend(named.iter().map(|(name, value)| format!("{}={}", name, value)));

    let digest = Sha256::digest(parts.join("|").as_bytes());
    hex::encode(digest)[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = cache_key("video_meta", &["https://example.com/v/1"], &[]);
        let b = cache_key("video_meta", &["https://example.com/v/1"], &[]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_kwarg_order_does_not_matter() {
        let a = cache_key("resolve", &["u"], &[("quality", "720"), ("audio", "yes")]);
        let b = cache_key("resolve", &["u"], &[("audio", "yes"), ("quality", "720")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_inputs_distinct_keys() {
        let a = cache_key("p", &["x"], &[]);
        let b = cache_key("p", &["y"], &[]);
        let c = cache_key("q", &["x"], &[]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
