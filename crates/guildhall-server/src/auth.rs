// Session extraction: `Authorization: Bearer <token>` or the session cookie.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use guildhall_core::users::User;
use guildhall_core::Error;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller. Rejects with 401 when no valid session exists.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// The caller if a valid session exists, anonymous otherwise.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

/// The raw session token presented by the caller.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Pull the session token out of the request headers. A bearer token wins
/// over the cookie.
pub fn token_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// `Set-Cookie` value opening a session.
pub fn session_cookie(name: &str, token: &str, max_age_secs: i64) -> String {
    format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value clearing the session cookie.
pub fn clear_cookie(name: &str) -> String {
    format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

impl FromRequestParts<AppState> for SessionToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        token_from_headers(&parts.headers, &state.config.auth.cookie_name)
            .map(SessionToken)
            .ok_or(ApiError(Error::Unauthenticated))
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let SessionToken(token) = SessionToken::from_request_parts(parts, state).await?;
        let user = state.run(move |db| db.user_for_token(&token)).await?;
        Ok(CurrentUser(user))
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = token_from_headers(&parts.headers, &state.config.auth.cookie_name) else {
            return Ok(MaybeUser(None));
        };
        match state.run(move |db| db.user_for_token(&token)).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(ApiError(Error::Unauthenticated | Error::Forbidden(_))) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

impl MaybeUser {
    pub fn id(&self) -> Option<i64> {
        self.0.as_ref().map(|u| u.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn bearer_token_extracted() {
        let h = headers(&[("authorization", "Bearer abc123")]);
        assert_eq!(token_from_headers(&h, "sid").as_deref(), Some("abc123"));
    }

    #[test]
    fn cookie_token_extracted() {
        let h = headers(&[("cookie", "theme=dark; sid=tok; other=1")]);
        assert_eq!(token_from_headers(&h, "sid").as_deref(), Some("tok"));
        assert_eq!(token_from_headers(&h, "missing"), None);
    }

    #[test]
    fn bearer_wins_over_cookie() {
        let h = headers(&[("cookie", "sid=from-cookie"), ("authorization", "Bearer from-header")]);
        assert_eq!(token_from_headers(&h, "sid").as_deref(), Some("from-header"));
    }

    #[test]
    fn other_schemes_and_empty_values_ignored() {
        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz"), ("cookie", "sid=")]);
        assert_eq!(token_from_headers(&h, "sid"), None);
    }

    #[test]
    fn cookie_strings() {
        assert_eq!(
            session_cookie("sid", "t", 60),
            "sid=t; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );
        assert!(clear_cookie("sid").ends_with("Max-Age=0"));
    }
}
