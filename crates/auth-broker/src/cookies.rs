//! `Cookie` request header helpers.
//!
//! Browsers and proxies may split cookies across several `Cookie` headers.
//! Lookups read all of them; rewrites fold them back into exactly one
//! header with one pair per name.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};

/// All `name=value` pairs across every `Cookie` header, in order.
pub fn pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Value of the first non-empty cookie called `name`.
pub fn find(headers: &HeaderMap, name: &str) -> Option<String> {
    pairs(headers)
        .into_iter()
        .find(|(n, v)| n == name && !v.is_empty())
        .map(|(_, v)| v)
}

/// Set `name` to `value`, replacing every existing pair of that name.
pub fn set(headers: &mut HeaderMap, name: &str, value: &str) {
    let mut kept: Vec<(String, String)> = pairs(headers)
        .into_iter()
        .filter(|(n, _)| n != name)
        .collect();
    kept.push((name.to_string(), value.to_string()));
    write(headers, &kept);
}

/// Drop every pair called `name`.
pub fn remove(headers: &mut HeaderMap, name: &str) {
    let current = pairs(headers);
    if !current.iter().any(|(n, _)| n == name) {
        return;
    }
    let kept: Vec<(String, String)> = current.into_iter().filter(|(n, _)| n != name).collect();
    write(headers, &kept);
}

/// Replace the `Cookie` headers with one header holding `pairs`. If the
/// result is not valid header text the original headers stay in place.
fn write(headers: &mut HeaderMap, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        headers.remove(COOKIE);
        return;
    }
    let joined = pairs
        .iter()
        .map(|(n, v)| format!("{}={}", n, v))
        .collect::<Vec<_>>()
        .join("; ");
    match HeaderValue::from_str(&joined) {
        Ok(value) => {
            headers.remove(COOKIE);
            headers.insert(COOKIE, value);
        }
        Err(_) => {
            let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
            tracing::warn!(
                target: "broker.cookies",
                cookies = ?names,
                "Rewritten Cookie header is not valid header text, keeping the original"
            );
        }
    }
}
