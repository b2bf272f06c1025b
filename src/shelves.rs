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

//! # shelves
//!
//! One component, every shelf. The wishlist and the reading list have identical semantics — a
//! per-user set of books with toggle/check/list operations — differing only in which shelf they
//! name, so a single router is built per [Shelf] variant and mounted twice. The shelf in play
//! rides along as a request extension.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::error;

use crate::{
    counter_add,
    entities::{Isbn, Principal, Shelf, ShelfEntry, UserId},
    http::{Bookden, ErrorResponseBody},
    metrics::{self, Sort},
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Validation { source: crate::entities::Error },
    #[snafu(display("Authentication required"))]
    Unauthenticated { backtrace: Backtrace },
    #[snafu(display("No book with ISBN {isbn} in the catalog"))]
    UnknownIsbn { isbn: Isbn, backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Catalog { source: crate::catalog::Error },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::Validation { source } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, format!("{}", self)),
            Error::UnknownIsbn { .. } => (StatusCode::NOT_FOUND, format!("{}", self)),
            Error::Catalog { source } => source.as_status_and_msg(),
            Error::Storage { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_owned(),
            ),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           `/toggle`                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("shelves.toggled", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
struct ToggleReq {
    isbn: String,
    title: Option<String>,
    author: Option<String>,
    image: Option<String>,
}

/// Flip the book's membership on the shelf; the response names the field after the shelf, so
/// `{"isWished": true}` from the wishlist mount and `{"isReading": true}` from the reading one.
/// Display metadata for a new entry comes from our own book record, falling back to the fields
/// the client sent, falling back to a catalog lookup.
async fn toggle(
    State(state): State<Arc<Bookden>>,
    Extension(shelf): Extension<Shelf>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<ToggleReq>,
) -> axum::response::Response {
    async fn toggle1(
        state: &Bookden,
        shelf: Shelf,
        principal: Principal,
        req: ToggleReq,
    ) -> Result<bool> {
        let isbn = Isbn::new(&req.isbn).context(ValidationSnafu)?;
        if state
            .storage
            .get_shelf_entry(shelf, &principal.id, &isbn)
            .await
            .context(StorageSnafu)?
            .is_some()
        {
            state
                .storage
                .delete_shelf_entry(shelf, &principal.id, &isbn)
                .await
                .context(StorageSnafu)?;
            return Ok(false);
        }
        // Shelf entries carry display metadata so listing a shelf needs no catalog round trips
        let (title, author, image) =
            match state.storage.get_book(&isbn).await.context(StorageSnafu)? {
                Some(book) => (
                    book.title().to_owned(),
                    book.author().to_owned(),
                    book.image().to_owned(),
                ),
                // The client just rendered this book; its fields spare a catalog round trip
                None => match req.title {
                    Some(title) => (
                        title,
                        req.author.unwrap_or_default(),
                        req.image.unwrap_or_default(),
                    ),
                    None => {
                        let meta = state
                            .catalog
                            .lookup(&isbn)
                            .await
                            .context(CatalogSnafu)?
                            .context(UnknownIsbnSnafu { isbn: isbn.clone() })?;
                        (meta.title, meta.author, meta.image)
                    }
                },
            };
        let entry = ShelfEntry::new(&principal.id, &isbn, &title, &author, &image);
        state
            .storage
            .put_shelf_entry(shelf, &entry)
            .await
            .context(StorageSnafu)?;
        Ok(true)
    }

    match principal.context(UnauthenticatedSnafu) {
        Ok(Extension(principal)) => match toggle1(&state, shelf, principal, req).await {
            Ok(on) => {
                counter_add!(state.instruments, "shelves.toggled", 1, &[]);
                (
                    StatusCode::OK,
                    Json(serde_json::json!({ (shelf.membership_field()): on })),
                )
                    .into_response()
            }
            Err(err) => {
                error!("{:#?}", err);
                err.into_response()
            }
        },
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            `/check`                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckReq {
    user_id: String,
    isbn: String,
}

async fn check(
    State(state): State<Arc<Bookden>>,
    Extension(shelf): Extension<Shelf>,
    Query(req): Query<CheckReq>,
) -> axum::response::Response {
    async fn check1(state: &Bookden, shelf: Shelf, req: CheckReq) -> Result<bool> {
        let user = UserId::new(&req.user_id).context(ValidationSnafu)?;
        let isbn = Isbn::new(&req.isbn).context(ValidationSnafu)?;
        Ok(state
            .storage
            .get_shelf_entry(shelf, &user, &isbn)
            .await
            .context(StorageSnafu)?
            .is_some())
    }

    match check1(&state, shelf, req).await {
        Ok(on) => (
            StatusCode::OK,
            Json(serde_json::json!({ (shelf.membership_field()): on })),
        )
            .into_response(),
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             `/my`                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryView {
    isbn: String,
    title: String,
    author: String,
    image: String,
}

#[derive(Debug, Serialize)]
struct MyRsp {
    books: Vec<EntryView>,
}

async fn my(
    State(state): State<Arc<Bookden>>,
    Extension(shelf): Extension<Shelf>,
    principal: Option<Extension<Principal>>,
) -> axum::response::Response {
    async fn my1(state: &Bookden, shelf: Shelf, principal: Principal) -> Result<MyRsp> {
        let entries = state
            .storage
            .shelf_for_user(shelf, &principal.id)
            .await
            .context(StorageSnafu)?;
        Ok(MyRsp {
            books: entries
                .iter()
                .map(|e| EntryView {
                    isbn: e.isbn().to_string(),
                    title: e.title().to_owned(),
                    author: e.author().to_owned(),
                    image: e.image().to_owned(),
                })
                .collect(),
        })
    }

    match principal.context(UnauthenticatedSnafu) {
        Ok(Extension(principal)) => match my1(&state, shelf, principal).await {
            Ok(rsp) => (StatusCode::OK, Json(rsp)).into_response(),
            Err(err) => {
                error!("{:#?}", err);
                err.into_response()
            }
        },
        Err(err) => err.into_response(),
    }
}

/// Return a router for one shelf; mount it once per [Shelf] variant
pub fn make_router(state: Arc<Bookden>, shelf: Shelf) -> Router<Arc<Bookden>> {
    Router::new()
        .route("/toggle", post(toggle))
        .route("/check", get(check))
        .route("/my", get(my))
        .layer(Extension(shelf))
        .with_state(state)
}
