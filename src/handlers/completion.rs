//! Completion delivery: how a finished login reaches the browser.
//!
//! Three mechanisms, chosen by flow shape:
//! - fragment redirect, the default for plain server flows: the result rides
//!   in the URL fragment so it never reaches server logs,
//! - a `postMessage` page for popup flows, posting the result to the opener,
//! - an `iframe` page exposing the result to the hosting frame.
//!
//! The delivery origin is re-validated against the whitelist by the caller
//! immediately before rendering; the stored cookie value alone is never
//! trusted.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::cookies::{CompletionAction, CompletionKind};
use crate::error::AuthError;

/// Result of a server flow, ready for delivery.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Token(String),
    Error { code: String, message: String },
}

impl LoginOutcome {
    pub fn from_error(err: &AuthError) -> Self {
        LoginOutcome::Error {
            code: err.error_code().to_string(),
            message: err.public_message(),
        }
    }
}

/// 302 redirect carrying the outcome in the URL fragment.
///
/// Fragments are never sent back to the server on navigation, so neither
/// tokens nor error detail can leak into request logs.
pub fn fragment_redirect(target_uri: &str, outcome: &LoginOutcome) -> Response {
    let fragment = match outcome {
        LoginOutcome::Token(token) => format!("token={}", urlencoding::encode(token)),
        LoginOutcome::Error { code, .. } => format!("error={}", urlencoding::encode(code)),
    };
    let location = format!("{target_uri}#{fragment}");
    (
        StatusCode::FOUND,
        [(header::LOCATION, location)],
        // Some user agents render the body on slow redirects.
        "Redirecting...",
    )
        .into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    authentication_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

/// Render the popup delivery page for a validated completion action.
pub fn delivery_page(action: &CompletionAction, outcome: &LoginOutcome) -> Response {
    let payload = match outcome {
        LoginOutcome::Token(token) => DeliveryPayload {
            authentication_token: Some(token),
            error: None,
            error_message: None,
        },
        LoginOutcome::Error { code, message } => DeliveryPayload {
            authentication_token: None,
            error: Some(code),
            error_message: Some(message),
        },
    };
    // Serialization of this shape cannot fail; fall back to a bare error
    // object rather than panicking if it somehow does.
    let json = serde_json::to_string(&payload)
        .unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string());
    let json = escape_for_script(&json);
    let origin_js = escape_for_script(&serde_json::to_string(&action.origin).unwrap_or_default());

    let script = match action.kind {
        CompletionKind::PostMessage => format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head><body><script>\n\
             (function() {{\n\
               var result = {json};\n\
               var origin = {origin_js};\n\
               if (window.opener) {{ window.opener.postMessage(result, origin); }}\n\
               window.close();\n\
             }})();\n\
             </script></body></html>"
        ),
        CompletionKind::Iframe => format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head><body><script>\n\
             window.loginResult = {json};\n\
             window.loginResultOrigin = {origin_js};\n\
             </script></body></html>"
        ),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        script,
    )
        .into_response()
}

/// Escape `<` so JSON embedded in a script tag cannot break out of it.
fn escape_for_script(json: &str) -> String {
    json.replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn token_rides_in_fragment_not_query() {
        let response = fragment_redirect(
            "https://app.example.com/done",
            &LoginOutcome::Token("tok-123".to_string()),
        );
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(location, "https://app.example.com/done#token=tok-123");
        assert!(!location.contains("?token"));
    }

    #[test]
    fn error_fragment_carries_code_only() {
        let outcome = LoginOutcome::Error {
            code: "provider_error".to_string(),
            message: "Authentication with google failed".to_string(),
        };
        let response = fragment_redirect("https://app.example.com/done", &outcome);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.ends_with("#error=provider_error"));
        assert!(!location.contains("Authentication"));
    }

    #[tokio::test]
    async fn post_message_page_targets_origin() {
        let action = CompletionAction {
            kind: CompletionKind::PostMessage,
            origin: "https://app.example.com".to_string(),
        };
        let response = delivery_page(&action, &LoginOutcome::Token("tok".to_string()));
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        let body = body_string(response).await;
        assert!(body.contains("postMessage"));
        assert!(body.contains("https://app.example.com"));
        assert!(body.contains("\"authenticationToken\":\"tok\""));
    }

    #[tokio::test]
    async fn embedded_json_cannot_break_out_of_script() {
        let action = CompletionAction {
            kind: CompletionKind::Iframe,
            origin: "https://app.example.com".to_string(),
        };
        let outcome = LoginOutcome::Token("</script><script>alert(1)".to_string());
        let body = body_string(delivery_page(&action, &outcome)).await;
        assert!(!body.contains("</script><script>alert"));
        assert!(body.contains("\\u003c/script"));
    }
}
