//! Login flow orchestration.
//!
//! One handler pair drives the whole state machine: `POST /login/{provider}`
//! is the client flow (token in the body, JSON out), `GET /login/{provider}`
//! is the server flow, split into a new flow (redirect out) and a
//! continuation (code in, token delivered). `GET /login/done` is the stable
//! completion sentinel a browser can poll.
//!
//! Every response path reconciles reserved flow cookies: whatever the request
//! carried is either re-armed or explicitly expired, success or failure.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cookies::{
    generate_state_token, validate_sso_target, CompletionAction, CompletionKind, RequestCookies,
    ResponseCookies, NONCE_COOKIE, SSO_COOKIE, STATE_COOKIE,
};
use crate::error::{AuthError, AuthResult, ProviderName};
use crate::providers::{ensure_enabled, ExchangeOptions, LoginQuery, ProviderAdapter};
use crate::router::AppState;
use crate::services::IssuedToken;

use super::completion::{delivery_page, fragment_redirect, LoginOutcome};

/// Client-flow success body.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserRef,
    pub authentication_token: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: String,
}

/// Provider listing body for `GET /login`.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    pub name: String,
    pub login_uri: String,
}

/// List the providers enabled in this deployment, for login-page rendering.
#[utoipa::path(
    get,
    path = "/login",
    responses(
        (status = 200, description = "Enabled providers and their login URLs", body = ProvidersResponse)
    ),
    tag = "login"
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let providers = state
        .registry
        .enabled_providers()
        .into_iter()
        .map(|p| ProviderEntry {
            name: p.to_string(),
            login_uri: login_return_uri(&state, p),
        })
        .collect();
    Json(ProvidersResponse { providers })
}

/// Flow-completion sentinel.
///
/// Emits immediate success with no provider work so a browser can poll a
/// stable return URL; any leftover flow cookies are expired here.
#[utoipa::path(
    get,
    path = "/login/done",
    responses((status = 200, description = "Login flow completed")),
    tag = "login"
)]
pub async fn login_done(headers: HeaderMap) -> Response {
    let request_cookies = RequestCookies::from_headers(&headers);
    let cookies = ResponseCookies::new(&request_cookies);
    let mut response =
        Json(serde_json::json!({ "status": "complete" })).into_response();
    cookies.apply(response.headers_mut());
    response
}

/// Client flow: the app already holds a provider token and posts it in.
#[utoipa::path(
    post,
    path = "/login/{provider}",
    params(("provider" = String, Path, description = "Provider name")),
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 400, description = "Malformed body or unknown provider", body = ErrorResponse),
        (status = 401, description = "Token rejected or provider disabled", body = ErrorResponse)
    ),
    tag = "login"
)]
#[instrument(skip(state, headers, body), fields(provider = %provider))]
pub async fn login_post(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request_cookies = RequestCookies::from_headers(&headers);
    let cookies = ResponseCookies::new(&request_cookies);

    let mut response = match client_flow(&state, &provider, &body).await {
        Ok(issued) => Json(LoginResponse {
            user: UserRef {
                user_id: issued.user_id,
            },
            authentication_token: issued.token,
        })
        .into_response(),
        Err(err) => err.into_response(),
    };
    cookies.apply(response.headers_mut());
    response
}

async fn client_flow(state: &AppState, provider: &str, body: &str) -> AuthResult<IssuedToken> {
    let name: ProviderName = provider.parse()?;
    let adapter = state
        .registry
        .get(name)
        .ok_or_else(|| AuthError::UnsupportedProvider {
            provider: provider.to_string(),
        })?;

    let body: serde_json::Value =
        serde_json::from_str(body).map_err(|_| AuthError::BadInput {
            reason: "request body is not valid JSON".to_string(),
        })?;
    let token = adapter.extract_client_token(&body)?;

    let options = ExchangeOptions {
        fetch_profile: state.identity_store.is_enabled(),
        expected_nonce: None,
    };
    let details = adapter.to_authorization_details(&token, &options).await?;
    issue_token(state, details).await
}

/// Server flow: new-flow redirect out, or continuation with a code back in.
#[utoipa::path(
    get,
    path = "/login/{provider}",
    params(("provider" = String, Path, description = "Provider name")),
    responses(
        (status = 302, description = "Redirect to the provider, or completion fragment"),
        (status = 200, description = "Popup delivery page"),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 403, description = "Origin not whitelisted", body = ErrorResponse)
    ),
    tag = "login"
)]
#[instrument(skip(state, headers, query), fields(provider = %provider))]
pub async fn login_get(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> Response {
    let request_cookies = RequestCookies::from_headers(&headers);
    let mut cookies = ResponseCookies::new(&request_cookies);

    let resolved = provider.parse::<ProviderName>().and_then(|name| {
        state
            .registry
            .get(name)
            .ok_or_else(|| AuthError::UnsupportedProvider {
                provider: provider.clone(),
            })
    });
    let adapter = match resolved {
        Ok(adapter) => adapter,
        Err(err) => {
            let mut response = err.into_response();
            cookies.apply(response.headers_mut());
            return response;
        }
    };

    let mut response = if adapter.is_new_flow(&query) {
        match new_flow(&state, adapter.as_ref(), &query, &mut cookies) {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    } else {
        continuation_flow(&state, adapter.as_ref(), &query, &request_cookies).await
    };
    cookies.apply(response.headers_mut());
    response
}

/// Start a server flow: validate everything local, then redirect out.
///
/// All validation happens before any cookie is armed, so a rejected request
/// leaves no state behind.
fn new_flow(
    state: &AppState,
    adapter: &dyn ProviderAdapter,
    query: &LoginQuery,
    cookies: &mut ResponseCookies,
) -> AuthResult<Response> {
    // Completion-action origin check comes first: fail fast, no cookies,
    // no provider work.
    let completion = parse_completion_request(state, query)?;

    let encrypted_sso = match query.sso_end_uri.as_deref() {
        Some(target) => {
            validate_sso_target(target, state.config.package_sid.as_deref())?;
            Some(state.cookie_crypto.encrypt(target)?)
        }
        None => None,
    };

    let return_uri = login_return_uri(state, adapter.name());
    let state_token = adapter.echoes_state().then(generate_state_token);
    let nonce = adapter.uses_nonce().then(generate_state_token);

    let location =
        adapter.authorization_redirect(&return_uri, state_token.as_deref(), nonce.as_deref())?;

    if let Some(token) = &state_token {
        cookies.set(STATE_COOKIE, token);
    }
    if let Some(nonce) = &nonce {
        cookies.set(NONCE_COOKIE, nonce);
    }
    if let Some(encrypted) = &encrypted_sso {
        cookies.set(SSO_COOKIE, encrypted);
    }
    if let Some(action) = &completion {
        cookies.set_completion_action(action)?;
    }

    info!(provider = %adapter.name(), "Redirecting to provider");
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, location)],
        "Redirecting...",
    )
        .into_response())
}

/// Finish a server flow and deliver the outcome.
async fn continuation_flow(
    state: &AppState,
    adapter: &dyn ProviderAdapter,
    query: &LoginQuery,
    request_cookies: &RequestCookies,
) -> Response {
    // Resolve the delivery mechanism up front so failures reach the caller
    // the same way successes would. The cookie-stored origin is re-checked
    // against the whitelist before anything is rendered with it.
    let completion = match request_cookies.completion_action() {
        Some(action) if state.config.is_origin_whitelisted(&action.origin) => Some(action),
        Some(action) => {
            return AuthError::OriginNotWhitelisted {
                origin: action.origin,
            }
            .into_response();
        }
        None => None,
    };

    let result = run_continuation(state, adapter, query, request_cookies).await;

    // A provider-reported consent error with no popup in play is a plain
    // JSON failure; everything else goes through the delivery mechanism.
    if completion.is_none() && query.error.is_some() {
        if let Err(err) = result {
            return err.into_response();
        }
    }

    let outcome = match result {
        Ok(issued) => LoginOutcome::Token(issued.token),
        Err(err) => LoginOutcome::from_error(&err),
    };

    match completion {
        Some(action) => delivery_page(&action, &outcome),
        None => fragment_redirect(&final_redirect_target(state, request_cookies), &outcome),
    }
}

async fn run_continuation(
    state: &AppState,
    adapter: &dyn ProviderAdapter,
    query: &LoginQuery,
    request_cookies: &RequestCookies,
) -> AuthResult<IssuedToken> {
    // A disabled or credential-less provider is detectable locally; fail
    // before any outbound call.
    ensure_enabled(adapter.name(), adapter.settings())?;

    if let Some(error) = query.error.as_deref() {
        let detail = query.error_description.as_deref().unwrap_or("no description");
        return Err(AuthError::ProviderError {
            provider: adapter.name(),
            reason: format!("provider returned error '{error}': {detail}"),
        });
    }

    // State must match before any provider call is made.
    if adapter.echoes_state() {
        let echoed = query.state.as_deref();
        let stored = request_cookies.get(STATE_COOKIE);
        match (echoed, stored) {
            (Some(a), Some(b)) if a == b => {}
            _ => return Err(AuthError::StateMismatch),
        }
    }

    let expected_nonce = if adapter.uses_nonce() {
        match request_cookies.get(NONCE_COOKIE) {
            Some(nonce) => Some(nonce.to_string()),
            None => return Err(AuthError::NonceMismatch),
        }
    } else {
        None
    };

    let return_uri = login_return_uri(state, adapter.name());
    let token = adapter.exchange_server_code(query, &return_uri).await?;

    let options = ExchangeOptions {
        fetch_profile: state.identity_store.is_enabled(),
        expected_nonce,
    };
    let details = adapter.to_authorization_details(&token, &options).await?;
    issue_token(state, details).await
}

/// Persist the identity when a store is enabled, then sign the service token.
async fn issue_token(
    state: &AppState,
    details: crate::providers::AuthorizationDetails,
) -> AuthResult<IssuedToken> {
    let stored_user_id = if state.identity_store.is_enabled() {
        let user = state
            .identity_store
            .add_user_identity(&details.provider.to_string(), &details.provider_id, &details)
            .await?;
        Some(user.id)
    } else {
        None
    };
    state.issuer.issue(&details, stored_user_id)
}

fn parse_completion_request(
    state: &AppState,
    query: &LoginQuery,
) -> AuthResult<Option<CompletionAction>> {
    // The origin is checked against the whitelist whenever it is present,
    // with or without a completion type.
    if let Some(origin) = query.completion_origin.as_deref() {
        if !state.config.is_origin_whitelisted(origin) {
            warn!(origin = %origin, "Rejected completion origin");
            return Err(AuthError::OriginNotWhitelisted {
                origin: origin.to_string(),
            });
        }
    }
    let Some(kind) = query.completion_type.as_deref() else {
        if query.completion_origin.is_some() {
            return Err(AuthError::BadInput {
                reason: "completion_origin requires completion_type".to_string(),
            });
        }
        return Ok(None);
    };
    let kind = match kind {
        "postMessage" => CompletionKind::PostMessage,
        "iframe" => CompletionKind::Iframe,
        other => {
            return Err(AuthError::BadInput {
                reason: format!("unknown completion type '{other}'"),
            })
        }
    };
    let origin = query
        .completion_origin
        .as_deref()
        .ok_or_else(|| AuthError::BadInput {
            reason: "completion_type requires completion_origin".to_string(),
        })?;
    Ok(Some(CompletionAction {
        kind,
        origin: origin.to_string(),
    }))
}

fn login_return_uri(state: &AppState, provider: ProviderName) -> String {
    format!("{}/login/{provider}", state.config.base_url)
}

/// Where a fragment-delivered outcome lands: the validated single-sign-on
/// target if one rode in on the encrypted cookie, else the completion
/// sentinel.
fn final_redirect_target(state: &AppState, request_cookies: &RequestCookies) -> String {
    let fallback = format!("{}/login/done", state.config.base_url);
    let Some(encrypted) = request_cookies.get(SSO_COOKIE) else {
        return fallback;
    };
    match state.cookie_crypto.decrypt(encrypted) {
        Ok(target)
            if validate_sso_target(&target, state.config.package_sid.as_deref()).is_ok() =>
        {
            target
        }
        _ => {
            warn!("Discarding invalid single-sign-on cookie");
            fallback
        }
    }
}
