//! Flow-state cookies: reserved-prefix codec and lifecycle reconciliation.
//!
//! All transient login state lives in short-lived `HttpOnly; Secure` cookies
//! carrying a reserved name prefix. Every cookie with that prefix present on
//! a request must appear on the response, either re-armed with a live value
//! or explicitly expired; no reserved cookie is silently dropped.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AuthError, AuthResult};

/// Reserved prefix for all flow-state cookies.
pub const COOKIE_PREFIX: &str = "fedauth_";

/// OAuth state echoed by providers that support it.
pub const STATE_COOKIE: &str = "fedauth_state";

/// Replay-protection nonce for providers that embed it in token claims.
pub const NONCE_COOKIE: &str = "fedauth_nonce";

/// Encrypted single-sign-on final redirect target.
pub const SSO_COOKIE: &str = "fedauth_sso";

/// Completion-action descriptor for popup-based flows (plain JSON, not secret).
pub const COMPLETION_COOKIE: &str = "fedauth_completion";

/// Flow-state cookie max age in seconds (10 minutes).
pub const FLOW_COOKIE_MAX_AGE: i64 = 600;

/// How a finished login is delivered back to a browser popup opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionAction {
    /// Delivery mechanism: `postMessage` or `iframe`.
    #[serde(rename = "type")]
    pub kind: CompletionKind,
    /// Opener origin the result is posted to.
    pub origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
    #[serde(rename = "postMessage")]
    PostMessage,
    #[serde(rename = "iframe")]
    Iframe,
}

/// Generate a random URL-safe token for state values.
#[must_use]
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Reserved-prefix cookies captured from an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestCookies {
    values: BTreeMap<String, String>,
}

impl RequestCookies {
    /// Parse the `Cookie` header, keeping only reserved-prefix entries.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut values = BTreeMap::new();
        for header in headers.get_all(COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            for part in raw.split(';') {
                let part = part.trim();
                if let Some((name, value)) = part.split_once('=') {
                    if name.starts_with(COOKIE_PREFIX) {
                        values.insert(name.to_string(), value.to_string());
                    }
                }
            }
        }
        Self { values }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Names of all reserved cookies the request carried.
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    /// Decode the completion-action cookie, if present and well formed.
    #[must_use]
    pub fn completion_action(&self) -> Option<CompletionAction> {
        let raw = self.get(COMPLETION_COOKIE)?;
        let decoded = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice(&decoded).ok()
    }
}

/// Outgoing cookie set that reconciles against the request's reserved cookies.
///
/// Handlers arm cookies through [`ResponseCookies::set`]; `apply` then emits
/// one `Set-Cookie` per armed cookie plus an expiring `Set-Cookie` for every
/// carried reserved cookie that was not re-armed.
#[derive(Debug)]
pub struct ResponseCookies {
    carried: BTreeSet<String>,
    armed: BTreeMap<String, String>,
}

impl ResponseCookies {
    #[must_use]
    pub fn new(request: &RequestCookies) -> Self {
        Self {
            carried: request.names(),
            armed: BTreeMap::new(),
        }
    }

    /// Arm a reserved cookie with a live value.
    pub fn set(&mut self, name: &str, value: &str) {
        debug_assert!(name.starts_with(COOKIE_PREFIX));
        self.armed.insert(
            name.to_string(),
            format!(
                "{name}={value}; HttpOnly; Secure; SameSite=Lax; Path=/login; Max-Age={FLOW_COOKIE_MAX_AGE}"
            ),
        );
    }

    /// Arm the completion-action cookie (base64url-wrapped JSON).
    pub fn set_completion_action(&mut self, action: &CompletionAction) -> AuthResult<()> {
        let json = serde_json::to_vec(action)?;
        self.set(COMPLETION_COOKIE, &URL_SAFE_NO_PAD.encode(json));
        Ok(())
    }

    /// Append all armed and expiring `Set-Cookie` headers to a response.
    pub fn apply(self, headers: &mut HeaderMap) {
        for (name, value) in &self.armed {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.append(SET_COOKIE, v);
            } else {
                tracing::warn!(cookie = %name, "Dropping cookie with invalid header value");
            }
        }
        for name in self.carried {
            if self.armed.contains_key(&name) {
                continue;
            }
            let expired = format!(
                "{name}=; HttpOnly; Secure; SameSite=Lax; Path=/login; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
            );
            if let Ok(v) = HeaderValue::from_str(&expired) {
                headers.append(SET_COOKIE, v);
            }
        }
    }
}

/// Validate a single-sign-on target against the configured package identifier.
///
/// The target must exactly equal the package identifier plus a trailing `/`.
/// This is the single canonical validation for SSO redirect targets.
pub fn validate_sso_target(target: &str, package_sid: Option<&str>) -> AuthResult<()> {
    let Some(sid) = package_sid else {
        return Err(AuthError::BadInput {
            reason: "single-sign-on is not configured for this service".to_string(),
        });
    };
    if target == format!("{sid}/") {
        Ok(())
    } else {
        Err(AuthError::BadInput {
            reason: "invalid single-sign-on redirect target".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    fn headers_with_cookie(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(raw).unwrap());
        headers
    }

    fn set_cookie_values(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn parses_only_reserved_cookies() {
        let headers =
            headers_with_cookie("fedauth_state=abc; session=xyz; fedauth_nonce=def");
        let cookies = RequestCookies::from_headers(&headers);
        assert_eq!(cookies.get(STATE_COOKIE), Some("abc"));
        assert_eq!(cookies.get(NONCE_COOKIE), Some("def"));
        assert_eq!(cookies.names().len(), 2);
        assert_eq!(cookies.get("session"), None);
    }

    #[test]
    fn carried_cookies_not_rearmed_are_expired() {
        let headers = headers_with_cookie("fedauth_state=abc; fedauth_sso=enc; fedauth_nonce=n");
        let request = RequestCookies::from_headers(&headers);
        let mut response = ResponseCookies::new(&request);
        response.set(STATE_COOKIE, "fresh");

        let mut out = HeaderMap::new();
        response.apply(&mut out);

        let values = set_cookie_values(&out);
        assert_eq!(values.len(), 3);
        assert!(values
            .iter()
            .any(|v| v.starts_with("fedauth_state=fresh") && v.contains("Max-Age=600")));
        assert!(values
            .iter()
            .any(|v| v.starts_with("fedauth_sso=;") && v.contains("Max-Age=0")));
        assert!(values
            .iter()
            .any(|v| v.starts_with("fedauth_nonce=;") && v.contains("Max-Age=0")));
    }

    #[test]
    fn no_carried_cookies_no_expirations() {
        let request = RequestCookies::default();
        let response = ResponseCookies::new(&request);
        let mut out = HeaderMap::new();
        response.apply(&mut out);
        assert!(out.get_all(SET_COOKIE).iter().next().is_none());
    }

    #[test]
    fn completion_action_round_trip() {
        let action = CompletionAction {
            kind: CompletionKind::PostMessage,
            origin: "https://app.example.com".to_string(),
        };
        let request = RequestCookies::default();
        let mut response = ResponseCookies::new(&request);
        response.set_completion_action(&action).unwrap();

        let mut out = HeaderMap::new();
        response.apply(&mut out);
        let raw = set_cookie_values(&out)[0].clone();
        let value = raw
            .strip_prefix("fedauth_completion=")
            .unwrap()
            .split(';')
            .next()
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{COMPLETION_COOKIE}={value}")).unwrap(),
        );
        let parsed = RequestCookies::from_headers(&headers)
            .completion_action()
            .unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn completion_cookie_survives_garbage() {
        let headers = headers_with_cookie("fedauth_completion=not-base64!");
        let cookies = RequestCookies::from_headers(&headers);
        assert!(cookies.completion_action().is_none());
    }

    #[test]
    fn state_tokens_are_unique_and_urlsafe() {
        let a = generate_state_token();
        let b = generate_state_token();
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn sso_target_must_match_package_sid_exactly() {
        assert!(validate_sso_target("ms-app://s-1-2-3/", Some("ms-app://s-1-2-3")).is_ok());
        assert!(validate_sso_target("ms-app://s-1-2-3", Some("ms-app://s-1-2-3")).is_err());
        assert!(validate_sso_target("ms-app://evil/", Some("ms-app://s-1-2-3")).is_err());
        assert!(validate_sso_target("ms-app://s-1-2-3/", None).is_err());
    }
}
