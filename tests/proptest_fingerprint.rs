//! Property-based tests for request fingerprinting and freshness decisions.
//!
//! # Properties Tested
//!
//! 1. **Determinism Property**: query order, parameter-name casing and headers
//!    never change a fingerprint
//! 2. **Pagination Property**: `page=1` is the same request as no page
//! 3. **Identity Property**: requests with different normalized shapes never
//!    share a key, whatever characters their segments and values contain
//! 4. **Freshness Property**: an entry is fresh exactly while `expires_at > now`

use proptest::prelude::*;
use std::collections::BTreeMap;
use swr_kit::fingerprint::{Fingerprint, FingerprintResolver, Request, Resolution};
use swr_kit::strategy::{decide, CacheDecision};

fn cacheable(resolution: Resolution) -> Fingerprint {
    match resolution {
        Resolution::Cacheable(fp) => fp,
        other => panic!("expected cacheable request, got {:?}", other),
    }
}

// ============================================================================
// Generators
// ============================================================================

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9]{1,8}", 1..5).prop_map(|segments| format!("/{}", segments.join("/")))
}

/// Distinct parameter names (duplicates resolve first-wins, which is
/// order-sensitive by definition).
fn arb_params() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-oq-z][a-z]{0,5}", "[a-z0-9]{1,6}", 0..6)
        .prop_map(|params| params.into_iter().collect())
}

fn arb_headers() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[A-Za-z-]{1,12}", "[ -~]{0,16}"), 0..5)
}

/// Params, a shuffled copy, and a casing mask for the copy.
fn arb_reordered_params() -> impl Strategy<Value = (Vec<(String, String)>, Vec<(String, String)>, Vec<bool>)> {
    arb_params().prop_flat_map(|params| {
        let n = params.len();
        (
            Just(params.clone()),
            Just(params).prop_shuffle(),
            prop::collection::vec(any::<bool>(), n),
        )
    })
}

/// Path segments drawn from an alphabet rich in key separators.
fn arb_raw_segments() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-c1:=%.]{1,4}", 1..4)
}

/// Normalized parameters (lower-case names, no `page`, non-empty values)
/// drawn from the same separator-heavy alphabet.
fn arb_raw_params() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-c:=%][a-c:=%]{0,3}", "[a-c1:=%&]{1,4}", 0..4)
}

fn shaped_request(segments: &[String], params: &BTreeMap<String, String>) -> Request {
    params.iter().fold(
        Request::new("search", format!("/{}", segments.join("/"))),
        |r, (k, v)| r.with_query(k.as_str(), v.as_str()),
    )
}

fn request(route: &str, path: &str, params: &[(String, String)]) -> Request {
    params
        .iter()
        .fold(Request::new(route, path), |r, (k, v)| r.with_query(k.as_str(), v.as_str()))
}

// ============================================================================
// Property 1: Determinism
// ============================================================================

proptest! {
    /// Property: reordering, re-casing parameter names and adding headers
    /// yields the same fingerprint
    #[test]
    fn prop_fingerprint_determinism(
        path in arb_path(),
        (params, shuffled, upper) in arb_reordered_params(),
        headers in arb_headers(),
    ) {
        let resolver = FingerprintResolver::new();

        let original = cacheable(resolver.resolve(&request("anime", &path, &params)));

        let recased: Vec<(String, String)> = shuffled
            .into_iter()
            .zip(upper)
            .map(|((k, v), up)| if up { (k.to_ascii_uppercase(), v) } else { (k, v) })
            .collect();
        let mut other = request("anime", &path, &recased);
        other.headers = headers;
        let variant = cacheable(resolver.resolve(&other));

        prop_assert_eq!(&original.key, &variant.key);
        prop_assert_eq!(&original.request_hash, &variant.request_hash);
    }

    /// Property: the route name is a policy input only, never part of the key
    #[test]
    fn prop_route_not_in_key(path in arb_path(), params in arb_params()) {
        let resolver = FingerprintResolver::new();
        let a = cacheable(resolver.resolve(&request("anime", &path, &params)));
        let b = cacheable(resolver.resolve(&request("top_anime", &path, &params)));

        prop_assert_eq!(a.key, b.key);
        prop_assert_ne!(a.resource_type, b.resource_type);
    }
}

// ============================================================================
// Property 2 & 3: Pagination and Identity
// ============================================================================

proptest! {
    /// Property: an explicit first page is the same request as no page
    #[test]
    fn prop_first_page_is_default(path in arb_path(), params in arb_params()) {
        let resolver = FingerprintResolver::new();
        let without = cacheable(resolver.resolve(&request("anime", &path, &params)));

        let mut with_page = params.clone();
        with_page.push(("page".to_string(), "1".to_string()));
        let with = cacheable(resolver.resolve(&request("anime", &path, &with_page)));

        prop_assert_eq!(without.key, with.key);
    }

    /// Property: distinct resource ids never collide
    #[test]
    fn prop_distinct_ids_distinct_keys(a in 1u32..1_000_000, b in 1u32..1_000_000) {
        prop_assume!(a != b);
        let resolver = FingerprintResolver::new();
        let fa = cacheable(resolver.resolve(&Request::new("anime", format!("/anime/{}", a))));
        let fb = cacheable(resolver.resolve(&Request::new("anime", format!("/anime/{}", b))));

        prop_assert_ne!(fa.key, fb.key);
        prop_assert_ne!(fa.request_hash, fb.request_hash);
    }

    /// Property: the key is injective over normalized request shapes, even
    /// when segments and values contain `:`, `=` or `%`
    #[test]
    fn prop_distinct_shapes_distinct_keys(
        (seg_a, params_a) in (arb_raw_segments(), arb_raw_params()),
        (seg_b, params_b) in (arb_raw_segments(), arb_raw_params()),
    ) {
        let resolver = FingerprintResolver::new();
        let fa = cacheable(resolver.resolve(&shaped_request(&seg_a, &params_a)));
        let fb = cacheable(resolver.resolve(&shaped_request(&seg_b, &params_b)));

        if seg_a == seg_b && params_a == params_b {
            prop_assert_eq!(fa.key, fb.key);
        } else {
            prop_assert_ne!(fa.key, fb.key);
        }
    }
}

// ============================================================================
// Property 4: Freshness
// ============================================================================

proptest! {
    /// Property: fresh iff expires_at > now; stale entries never miss
    #[test]
    fn prop_freshness_boundary(expires_at in any::<i32>(), now in any::<i32>(), queueable in any::<bool>()) {
        let (expires_at, now) = (i64::from(expires_at), i64::from(now));
        let decision = decide(Some(expires_at), now, queueable);

        if expires_at > now {
            prop_assert_eq!(decision, CacheDecision::HitFresh);
        } else if queueable {
            prop_assert_eq!(decision, CacheDecision::HitStaleQueued);
        } else {
            prop_assert_eq!(decision, CacheDecision::HitStaleSync);
        }
    }
}
