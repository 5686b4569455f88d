//! Response assembly.
//!
//! Merges cache metadata and the optional deprecation banner into the served
//! body, runs content fix-ups and computes the transport headers. Everything
//! here works on a parsed copy of the body; the stored entry is never
//! touched, so a fix-up failure only fails the current request.

use crate::dispatcher::{Dispatched, ServedBody};
use crate::error::{Error, Result};
use crate::fingerprint::sha256_hex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const HEADER_REQUEST_HASH: &str = "X-Request-Hash";
pub const HEADER_REQUEST_CACHED: &str = "X-Request-Cached";
pub const HEADER_REQUEST_CACHE_TTL: &str = "X-Request-Cache-Ttl";
pub const HEADER_ETAG: &str = "ETag";
pub const HEADER_EXPIRES: &str = "Expires";
pub const HEADER_DEPRECATION: &str = "X-API-Deprecation";
pub const HEADER_DEPRECATION_DATE: &str = "X-API-Deprecation-Date";
pub const HEADER_DEPRECATION_INFO: &str = "X-API-Deprecation-Info";

/// Resource types whose `related` field must render as an object.
const RELATED_FIXUP_TYPES: &[&str] = &["anime", "manga"];

/// Post-processing step applied to a response payload before it is sent.
pub trait ContentFixup: Send + Sync {
    /// # Errors
    /// Returns `Error::FixupError` if the payload cannot be fixed up.
    fn apply(&self, payload: &mut Value) -> Result<()>;
}

/// Renders an empty array at `pointer` as an empty object.
///
/// Missing fields and non-empty arrays are left alone.
#[derive(Clone, Debug)]
pub struct EmptyRelationFixup {
    pointer: String,
}

impl EmptyRelationFixup {
    /// `pointer` is a JSON pointer such as `/related`.
    pub fn new(pointer: impl Into<String>) -> Self {
        EmptyRelationFixup {
            pointer: pointer.into(),
        }
    }
}

impl ContentFixup for EmptyRelationFixup {
    fn apply(&self, payload: &mut Value) -> Result<()> {
        if let Some(target) = payload.pointer_mut(&self.pointer) {
            if target.as_array().is_some_and(|a| a.is_empty()) {
                *target = Value::Object(Map::new());
            }
        }
        Ok(())
    }
}

/// Fix-ups keyed by resource type.
#[derive(Clone, Default)]
pub struct FixupRegistry {
    fixups: HashMap<String, Vec<Arc<dyn ContentFixup>>>,
}

impl FixupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `related` fix-up for anime and manga.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for resource_type in RELATED_FIXUP_TYPES {
            registry.register(*resource_type, Arc::new(EmptyRelationFixup::new("/related")));
        }
        registry
    }

    pub fn register(&mut self, resource_type: impl Into<String>, fixup: Arc<dyn ContentFixup>) {
        self.fixups
            .entry(resource_type.into())
            .or_default()
            .push(fixup);
    }

    /// Apply every fix-up registered for `resource_type`, in order.
    ///
    /// # Errors
    /// Returns the first fix-up error.
    pub fn apply(&self, resource_type: &str, payload: &mut Value) -> Result<()> {
        if let Some(fixups) = self.fixups.get(resource_type) {
            for fixup in fixups {
                fixup.apply(payload)?;
            }
        }
        Ok(())
    }
}

/// Global API deprecation banner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeprecationNotice {
    pub date: String,
    pub info: String,
}

impl DeprecationNotice {
    pub fn new(date: impl Into<String>, info: impl Into<String>) -> Self {
        DeprecationNotice {
            date: date.into(),
            info: info.into(),
        }
    }
}

/// Final response for the transport layer.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledResponse {
    pub status: u16,
    pub payload: Value,
    pub headers: Vec<(String, String)>,
}

impl AssembledResponse {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Builds client responses from dispatched bodies.
#[derive(Clone)]
pub struct ResponseAssembler {
    fixups: FixupRegistry,
    deprecation: Option<DeprecationNotice>,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAssembler {
    pub fn new() -> Self {
        ResponseAssembler {
            fixups: FixupRegistry::with_defaults(),
            deprecation: None,
        }
    }

    pub fn with_fixups(mut self, fixups: FixupRegistry) -> Self {
        self.fixups = fixups;
        self
    }

    pub fn with_deprecation(mut self, notice: Option<DeprecationNotice>) -> Self {
        self.deprecation = notice;
        self
    }

    /// # Errors
    /// - `Error::FixupError` if the body is not a JSON object or a fix-up fails
    pub fn assemble(&self, dispatched: &Dispatched) -> Result<AssembledResponse> {
        match dispatched {
            Dispatched::Served(served) => self.assemble_served(served),
            Dispatched::NotFound {
                request_hash,
                entry,
            } => Ok(AssembledResponse {
                status: 404,
                payload: entry.to_payload(),
                headers: vec![(HEADER_REQUEST_HASH.to_string(), request_hash.clone())],
            }),
        }
    }

    fn assemble_served(&self, served: &ServedBody) -> Result<AssembledResponse> {
        let meta = &served.meta;

        let mut payload: Value = serde_json::from_slice(&served.body)
            .map_err(|e| Error::FixupError(format!("body is not valid JSON: {}", e)))?;
        let fields = payload.as_object_mut().ok_or_else(|| {
            Error::FixupError(format!(
                "body for {} is not a JSON object",
                served.resource_type
            ))
        })?;

        fields.insert("request_hash".into(), json!(meta.request_hash));
        fields.insert("request_cached".into(), json!(meta.is_cached));
        fields.insert("request_cache_expiry".into(), json!(meta.ttl_remaining()));

        if let Some(notice) = &self.deprecation {
            fields.insert("api_deprecation".into(), json!(true));
            fields.insert("api_deprecation_date".into(), json!(notice.date));
            fields.insert("api_deprecation_info".into(), json!(notice.info));
        }

        self.fixups.apply(&served.resource_type, &mut payload)?;

        let mut headers = vec![
            (HEADER_REQUEST_HASH.to_string(), meta.request_hash.clone()),
            (HEADER_REQUEST_CACHED.to_string(), meta.is_cached.to_string()),
            (
                HEADER_REQUEST_CACHE_TTL.to_string(),
                meta.ttl_remaining().to_string(),
            ),
            (HEADER_ETAG.to_string(), format!("\"{}\"", sha256_hex(&served.body))),
        ];
        if let Some(expires) = meta.expires_at.and_then(http_date) {
            headers.push((HEADER_EXPIRES.to_string(), expires));
        }
        if let Some(notice) = &self.deprecation {
            headers.push((HEADER_DEPRECATION.to_string(), "true".to_string()));
            headers.push((HEADER_DEPRECATION_DATE.to_string(), notice.date.clone()));
            headers.push((HEADER_DEPRECATION_INFO.to_string(), notice.info.clone()));
        }

        Ok(AssembledResponse {
            status: 200,
            payload,
            headers,
        })
    }
}

/// RFC 7231 IMF-fixdate for a unix timestamp.
fn http_date(unix_secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}
