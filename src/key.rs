//! Store key layout.
//!
//! Everything the controller persists lives in one flat keyspace, each kind
//! under its own leading segment so request-derived keys never overlap the
//! controller's metadata:
//!
//! | key | value |
//! |-----|-------|
//! | `body:<fingerprint>` | response body |
//! | `ttl:<fingerprint>` | absolute expiry, unix seconds |
//! | `request:404:<uri hash>` | negative entry |
//! | `queue_update:<fingerprint>` | refresh dedup marker |

/// Prefix of response bodies.
pub const BODY_PREFIX: &str = "body";

/// Prefix of TTL markers.
pub const TTL_PREFIX: &str = "ttl";

/// Prefix of negative-result entries.
pub const NEGATIVE_PREFIX: &str = "request:404";

/// Prefix of refresh dedup markers.
pub const QUEUE_MARKER_PREFIX: &str = "queue_update";

/// Builder for store keys.
pub struct KeyBuilder;

impl KeyBuilder {
    /// Key holding the response body for a fingerprint.
    pub fn entry(fingerprint: &str) -> String {
        Self::build_with_prefix(BODY_PREFIX, &fingerprint)
    }

    /// Key holding the expiry timestamp for a fingerprint.
    pub fn ttl(fingerprint: &str) -> String {
        Self::build_with_prefix(TTL_PREFIX, &fingerprint)
    }

    /// Key holding the negative entry for an exact request URI.
    pub fn negative(uri_hash: &str) -> String {
        Self::build_with_prefix(NEGATIVE_PREFIX, &uri_hash)
    }

    /// Key of the "refresh already enqueued" marker for a fingerprint.
    pub fn queue_marker(fingerprint: &str) -> String {
        Self::build_with_prefix(QUEUE_MARKER_PREFIX, &fingerprint)
    }

    /// Build key with custom prefix.
    pub fn build_with_prefix(prefix: &str, id: &dyn std::fmt::Display) -> String {
        format!("{}:{}", prefix, id)
    }

    /// Build composite key from multiple parts.
    pub fn build_composite(parts: &[&str]) -> String {
        parts.join(":")
    }

    /// Parse a composite key into parts.
    pub fn parse(key: &str) -> Vec<&str> {
        key.split(':').collect()
    }
}
