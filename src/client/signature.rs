//! Canonical request signatures.
//!
//! A signature identifies a logical request independently of incidental
//! differences such as query parameter ordering. It keys both the response
//! cache and the in-flight registry, and keeps the path readable so that
//! substring invalidation (`invalidate("/flood/")`) works on raw keys.

use reqwest::Method;
use serde_json::Value;

/// Build the canonical signature for a request.
///
/// Format: `METHOD path?k1=v1&k2=v2#bodyhash`, with query pairs sorted by
/// key then value. The query segment is omitted when empty; the body hash
/// segment is omitted for body-less requests.
pub fn canonical_signature(
    method: &Method,
    path: &str,
    query: &[(String, String)],
    body: Option<&Value>,
) -> String {
    let mut signature = format!("{method} {path}");

    if !query.is_empty() {
        let mut pairs: Vec<&(String, String)> = query.iter().collect();
        pairs.sort();
        signature.push('?');
        for (i, (key, value)) in pairs.iter().enumerate() {
            if i > 0 {
                signature.push('&');
            }
            signature.push_str(key);
            signature.push('=');
            signature.push_str(value);
        }
    }

    if let Some(body) = body {
        let serialized = body.to_string();
        let digest = blake3::hash(serialized.as_bytes());
        signature.push('#');
        signature.push_str(&hex::encode(&digest.as_bytes()[..16]));
    }

    signature
}
