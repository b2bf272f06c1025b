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

//! # accounts
//!
//! Account-scoped operations. Identity lives with the external provider; what bookden owns is the
//! principal's *content* — reviews, replies, shelves, notifications — and the denormalized
//! nickname stamped onto each piece of it. Deleting an account is therefore an explicit fan-out
//! across every store the user has touched, with each review routed through the statistics engine
//! so the aggregates it leaves behind stay honest.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::{error, info, warn};

use crate::{
    counter_add,
    entities::{Nickname, Principal, Shelf},
    http::{Bookden, ErrorResponseBody},
    metrics::{self, Sort},
    stats, storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Validation { source: crate::entities::Error },
    #[snafu(display("Authentication required"))]
    Unauthenticated { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Engine { source: stats::Error },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::Validation { source } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, format!("{}", self)),
            Error::Engine { .. } | Error::Storage { .. } => (
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
//                                     `/api/delete-account`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("accounts.deleted", Sort::IntegralCounter) }

async fn delete_account(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
) -> axum::response::Response {
    async fn delete1(state: &Bookden, principal: Principal) -> Result<()> {
        let user = &principal.id;

        // Reviews first, through the engine, so each one is backed out of its book's aggregate
        // and its replies are cascaded
        for review in state
            .storage
            .reviews_by_user(user)
            .await
            .context(StorageSnafu)?
        {
            stats::delete(state.storage.as_ref(), &state.locks, review.id(), None)
                .await
                .context(EngineSnafu)?;
        }

        // Replies the user left on other people's reviews
        for reply in state
            .storage
            .replies_by_user(user)
            .await
            .context(StorageSnafu)?
        {
            state
                .storage
                .delete_reply(&reply.id())
                .await
                .context(StorageSnafu)?;
        }

        for shelf in [Shelf::Wishlist, Shelf::Reading] {
            for entry in state
                .storage
                .shelf_for_user(shelf, user)
                .await
                .context(StorageSnafu)?
            {
                state
                    .storage
                    .delete_shelf_entry(shelf, user, entry.isbn())
                    .await
                    .context(StorageSnafu)?;
            }
        }

        state
            .storage
            .delete_notifications_for_user(user)
            .await
            .context(StorageSnafu)?;

        // Likes this user placed on surviving reviews are left in place; they are stored inside
        // records owned by other users, and sweeping every review in the store to scrub an
        // opaque id is not worth it
        info!("Deleted all content for account {}", user);
        Ok(())
    }

    match principal.context(UnauthenticatedSnafu) {
        Ok(Extension(principal)) => match delete1(&state, principal).await {
            Ok(()) => {
                counter_add!(state.instruments, "accounts.deleted", 1, &[]);
                (StatusCode::OK, Json(serde_json::json!({}))).into_response()
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
//                                     `/api/update-nickname`                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("accounts.renamed", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameReq {
    new_nickname: String,
}

#[derive(Debug, Serialize)]
struct RenameRsp {
    nickname: String,
}

/// Re-stamp the denormalized nickname onto everything the principal has written
///
/// Not atomic; a failure partway leaves some content under the old name. Each record is
/// re-written independently and the first failure aborts the sweep, so a retry will finish
/// the job.
async fn update_nickname(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<RenameReq>,
) -> axum::response::Response {
    async fn rename1(state: &Bookden, principal: Principal, req: RenameReq) -> Result<RenameRsp> {
        let nickname = Nickname::new(&req.new_nickname).context(ValidationSnafu)?;
        let user = &principal.id;

        let reviews = state
            .storage
            .reviews_by_user(user)
            .await
            .context(StorageSnafu)?;
        for mut review in reviews {
            review.rename_author(&nickname);
            state
                .storage
                .update_review(&review)
                .await
                .context(StorageSnafu)?;
        }

        let replies = state
            .storage
            .replies_by_user(user)
            .await
            .context(StorageSnafu)?;
        for mut reply in replies {
            reply.rename_author(&nickname);
            state
                .storage
                .update_reply(&reply)
                .await
                .context(StorageSnafu)?;
        }

        Ok(RenameRsp {
            nickname: nickname.to_string(),
        })
    }

    match principal.context(UnauthenticatedSnafu) {
        Ok(Extension(principal)) => {
            if !principal.email_verified {
                warn!(
                    "Unverified account {} attempted a nickname change",
                    principal.id
                );
            }
            match rename1(&state, principal, req).await {
                Ok(rsp) => {
                    counter_add!(state.instruments, "accounts.renamed", 1, &[]);
                    (StatusCode::OK, Json(rsp)).into_response()
                }
                Err(err) => {
                    error!("{:#?}", err);
                    err.into_response()
                }
            }
        }
        Err(err) => err.into_response(),
    }
}

/// Return a router for the account API
pub fn make_router(state: Arc<Bookden>) -> Router<Arc<Bookden>> {
    Router::new()
        .route("/api/delete-account", delete(delete_account))
        .route("/api/update-nickname", put(update_nickname))
        .with_state(state)
}
