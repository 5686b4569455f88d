//! Request fingerprinting.
//!
//! Turns an inbound request into the key its response is cached under. Two
//! requests that would produce the same upstream content get the same
//! fingerprint; header order, query-parameter order, parameter-name casing and
//! client identity never influence it. Requests that differ in any path
//! segment or normalized parameter never share one: the `:` and `=`
//! separators are percent-escaped inside components before joining.

use crate::key::KeyBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

/// Name of the pagination parameter.
pub const PAGE_PARAM: &str = "page";

/// Default header carrying the trusted bypass credential.
pub const DEFAULT_BYPASS_HEADER: &str = "x-cache-bypass";

/// Transport-agnostic shape of an inbound request.
///
/// Carries everything needed to redo the resolver's work and to re-fetch from
/// upstream later, which is why refresh jobs store it verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Matched route/handler name, e.g. `anime` or `user_profile`.
    pub route: String,
    /// Request path as received, e.g. `/anime/1/episodes`.
    pub path: String,
    /// Query parameters in the order received.
    pub query: Vec<(String, String)>,
    /// Request headers in the order received.
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(route: impl Into<String>, path: impl Into<String>) -> Self {
        Request {
            route: route.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Build from a route name and a raw `path?query` URI.
    ///
    /// Query values are kept as received; no percent-decoding is attempted.
    pub fn from_uri(route: impl Into<String>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };

        let mut request = Request::new(route, path);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            request.query.push((k.to_string(), v.to_string()));
        }
        request
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The exact request URI, query in received order.
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}?{}", self.path, query.join("&"))
    }
}

/// Cache identity of a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Store key, e.g. `anime:1` or `anime:1:episodes:page=2`.
    pub key: String,
    /// Route-derived classification used only for policy lookups.
    pub resource_type: String,
    /// SHA-256 of `key`, exposed to clients as the request hash.
    pub request_hash: String,
    /// SHA-256 of the exact request URI, keys the negative-result cache.
    pub uri_hash: String,
}

/// Why a request skipped the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BypassReason {
    /// Caller presented the trusted bypass credential.
    Privileged,
    /// Path is empty or contains empty segments.
    DegeneratePath,
}

/// Outcome of fingerprint resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Cacheable(Fingerprint),
    Bypass {
        reason: BypassReason,
        /// Hash of the exact URI, still reported to the client.
        uri_hash: String,
    },
}

/// Derives fingerprints from requests.
#[derive(Clone, Debug)]
pub struct FingerprintResolver {
    bypass_header: String,
    bypass_token: Option<String>,
    ignored_params: HashSet<String>,
}

impl Default for FingerprintResolver {
    fn default() -> Self {
        FingerprintResolver {
            bypass_header: DEFAULT_BYPASS_HEADER.to_string(),
            bypass_token: None,
            ignored_params: HashSet::new(),
        }
    }
}

impl FingerprintResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` in `header` as the privileged bypass credential.
    pub fn with_bypass(mut self, header: impl Into<String>, token: impl Into<String>) -> Self {
        self.bypass_header = header.into();
        self.bypass_token = Some(token.into());
        self
    }

    /// Drop a query parameter from fingerprints (cache busters, tracking ids).
    pub fn with_ignored_param(mut self, name: &str) -> Self {
        self.ignored_params.insert(name.trim().to_ascii_lowercase());
        self
    }

    /// Resolve a request into its cache identity, or decide it bypasses the cache.
    pub fn resolve(&self, request: &Request) -> Resolution {
        let uri_hash = sha256_hex(request.uri().as_bytes());

        if self.is_privileged(request) {
            return Resolution::Bypass {
                reason: BypassReason::Privileged,
                uri_hash,
            };
        }

        let segments = match path_segments(&request.path) {
            Some(segments) => segments,
            None => {
                return Resolution::Bypass {
                    reason: BypassReason::DegeneratePath,
                    uri_hash,
                }
            }
        };

        let mut parts: Vec<Cow<'_, str>> = segments.into_iter().map(escape_component).collect();
        parts.extend(
            self.normalized_params(request)
                .iter()
                .map(|(k, v)| Cow::Owned(format!("{}={}", escape_component(k), escape_component(v)))),
        );
        let parts: Vec<&str> = parts.iter().map(|part| part.as_ref()).collect();

        let key = KeyBuilder::build_composite(&parts);
        let request_hash = sha256_hex(key.as_bytes());

        Resolution::Cacheable(Fingerprint {
            key,
            resource_type: request.route.clone(),
            request_hash,
            uri_hash,
        })
    }

    fn is_privileged(&self, request: &Request) -> bool {
        match (&self.bypass_token, request.header(&self.bypass_header)) {
            (Some(expected), Some(presented)) => !expected.is_empty() && expected == presented,
            _ => false,
        }
    }

    /// Lowercased names, sorted, empties and ignored names dropped; first
    /// occurrence wins on duplicates; `page=1` is the same as no page.
    fn normalized_params(&self, request: &Request) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        for (k, v) in &request.query {
            let name = k.trim().to_ascii_lowercase();
            let value = v.trim();
            if name.is_empty() || value.is_empty() || self.ignored_params.contains(&name) {
                continue;
            }
            params.entry(name).or_insert_with(|| value.to_string());
        }

        if let Some(page) = params.get(PAGE_PARAM) {
            match page.parse::<u32>() {
                Ok(1) => {
                    params.remove(PAGE_PARAM);
                }
                Ok(n) => {
                    params.insert(PAGE_PARAM.to_string(), n.to_string());
                }
                Err(_) => {}
            }
        }
        params
    }
}

/// Split a path into segments; `None` if the path is empty or has an empty segment.
fn path_segments(path: &str) -> Option<Vec<&str>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.trim().is_empty()) {
        return None;
    }
    Some(segments)
}

/// Percent-escape the key separators (and `%` itself) inside one component.
///
/// After escaping, path segments contain no `=` and parameters exactly one,
/// so a key splits back into its components unambiguously.
fn escape_component(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['%', ':', '=']) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '=' => escaped.push_str("%3D"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
