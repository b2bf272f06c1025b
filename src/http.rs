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

//! # http
//!
//! Shared HTTP plumbing: the application state handed to every handler, and the standard error
//! response body.

use std::sync::Arc;

use axum::Json;
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{catalog::Catalog, metrics, stats::IsbnLocks, storage::Backend as StorageBackend};

/// A serializable struct for use in HTTP error responses
///
/// Every error a handler returns carries a JSON body of the shape `{"error": "..."}`; the
/// `IntoResponse` implementations on the per-module error types all route through this.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl axum::response::IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// Application state available to all handlers
pub struct Bookden {
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub catalog: Arc<dyn Catalog + Send + Sync>,
    pub locks: IsbnLocks,
    pub instruments: metrics::Instruments,
    pub registry: prometheus::Registry,
    /// Shared secret with the identity provider, for bearer-token verification
    pub token_key: Hmac<Sha256>,
    /// Expected `iss` claim on inbound tokens
    pub token_issuer: String,
}
