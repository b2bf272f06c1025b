// Copyright (C) 2025 the bookden authors
//
// This file is part of bookden.
//
// bookden is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bookden is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bookden.  If not,
// see <http://www.gnu.org/licenses/>.

//! # authn
//!
//! Bearer-token authentication.
//!
//! Identity is delegated to an external provider; what reaches us is a signed JWT whose claims
//! carry the principal's stable id, email, display name & email-verified flag. We verify the
//! signature (HS256 over a shared secret), the issuer and the expiry, and surface the result as a
//! [Principal] in the request's extensions. Handlers that require authentication pull it out; the
//! middleware itself lets unauthenticated requests through, since some of the API is public.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use chrono::Utc;
use hmac::Hmac;
use jwt::VerifyWithKey;
use serde::Deserialize;
use sha2::Sha256;
use snafu::{prelude::*, Backtrace};
use tracing::{debug, info};

use crate::{
    counter_add,
    entities::{Principal, UserId},
    http::Bookden,
    metrics::{self, Sort},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("No Authorization header"))]
    NoAuthToken { backtrace: Backtrace },
    #[snafu(display("An Authorization header had a non-textual value"))]
    NonTextualHeader {
        source: axum::http::header::ToStrError,
        backtrace: Backtrace,
    },
    #[snafu(display("Authorization scheme not supported (only Bearer is accepted)"))]
    UnsupportedScheme { backtrace: Backtrace },
    #[snafu(display("Token verification failed: {source}"))]
    BadToken {
        source: jwt::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Token issued by {actual}; expected {expected}"))]
    WrongIssuer {
        actual: String,
        expected: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Token expired"))]
    Expired { backtrace: Backtrace },
    #[snafu(display("Token subject isn't a usable user id: {source}"))]
    BadSubject { source: crate::entities::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// The claims the identity provider puts on its tokens
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email_verified: bool,
    exp: i64,
    iss: String,
}

/// Verify a bearer token & produce the [Principal] it describes
pub fn verify_bearer(token: &str, key: &Hmac<Sha256>, issuer: &str) -> Result<Principal> {
    let claims: Claims = token.verify_with_key(key).context(BadTokenSnafu)?;
    if claims.iss != issuer {
        return WrongIssuerSnafu {
            actual: claims.iss,
            expected: issuer.to_owned(),
        }
        .fail();
    }
    if claims.exp <= Utc::now().timestamp() {
        return ExpiredSnafu.fail();
    }
    Ok(Principal {
        id: UserId::new(&claims.sub).context(BadSubjectSnafu)?,
        email: claims.email,
        display_name: claims.name,
        email_verified: claims.email_verified,
    })
}

fn bearer_from_headers(headers: &HeaderMap) -> Result<&str> {
    let value = headers.get("authorization").context(NoAuthTokenSnafu)?;
    let text = value.to_str().context(NonTextualHeaderSnafu)?;
    text.strip_prefix("Bearer ")
        .context(UnsupportedSchemeSnafu)
}

inventory::submit! { metrics::Registration::new("authn.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("authn.failures", Sort::IntegralCounter) }

/// Function-based axum middleware: authenticate the request if it carries credentials
///
/// On success, the verified [Principal] is inserted into the request's extensions. A request with
/// *no* credentials passes through untouched — handlers that need a principal will 401 when the
/// extension is absent. A request with *bad* credentials is rejected here: silently downgrading a
/// presented-but-invalid token to anonymous would mask client bugs and token expiry.
pub async fn authenticate(
    State(state): State<Arc<Bookden>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    match bearer_from_headers(&headers)
        .and_then(|token| verify_bearer(token, &state.token_key, &state.token_issuer))
    {
        Ok(principal) => {
            debug!("bookden authorized user {}", principal.id);
            counter_add!(state.instruments, "authn.successes", 1, &[]);
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(Error::NoAuthToken { .. }) => next.run(request).await,
        Err(err) => {
            info!("bookden failed to authenticate this request: {}", err);
            counter_add!(state.instruments, "authn.failures", 1, &[]);
            (
                axum::http::StatusCode::UNAUTHORIZED,
                crate::http::ErrorResponseBody {
                    error: "Unauthorized".to_owned(),
                },
            )
                .into_response()
        }
    }
}

/// Mint a token the way the identity provider does; test & development aid
pub fn mint_token(
    key: &Hmac<Sha256>,
    issuer: &str,
    sub: &str,
    email: &str,
    name: &str,
    email_verified: bool,
    lifetime_secs: i64,
) -> std::result::Result<String, jwt::Error> {
    use jwt::SignWithKey;
    let claims = serde_json::json!({
        "sub": sub,
        "email": email,
        "name": name,
        "email_verified": email_verified,
        "exp": Utc::now().timestamp() + lifetime_secs,
        "iss": issuer,
    });
    claims.sign_with_key(key)
}

#[cfg(test)]
mod test {
    use super::*;
    use hmac::Mac;

    fn key() -> Hmac<Sha256> {
        Hmac::new_from_slice(b"an-adequately-long-test-secret").unwrap()
    }

    #[test]
    fn round_trip() {
        let token = mint_token(&key(), "https://id.example.com", "uid-1", "a@b.c", "jo", true, 60)
            .unwrap();
        let principal = verify_bearer(&token, &key(), "https://id.example.com").unwrap();
        assert_eq!(principal.id.as_ref(), "uid-1");
        assert!(principal.email_verified);
    }

    #[test]
    fn wrong_issuer_rejected() {
        let token =
            mint_token(&key(), "https://elsewhere.example", "uid-1", "a@b.c", "jo", true, 60)
                .unwrap();
        assert!(matches!(
            verify_bearer(&token, &key(), "https://id.example.com"),
            Err(Error::WrongIssuer { .. })
        ));
    }

    #[test]
    fn expired_rejected() {
        let token = mint_token(&key(), "https://id.example.com", "uid-1", "a@b.c", "jo", true, -60)
            .unwrap();
        assert!(matches!(
            verify_bearer(&token, &key(), "https://id.example.com"),
            Err(Error::Expired { .. })
        ));
    }
}
