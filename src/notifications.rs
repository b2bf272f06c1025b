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

//! # notifications
//!
//! Reply notifications: created when someone replies to your review, listed newest-first,
//! dismissed one at a time. Dismissal checks ownership; a notification id names a record that
//! belongs to exactly one user, and nobody else may destroy it.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::error;

use crate::{
    counter_add,
    entities::{Notification, NotificationId, Principal, Reply, Review},
    http::{Bookden, ErrorResponseBody},
    metrics::{self, Sort},
    storage::{self, Backend as StorageBackend},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Authentication required"))]
    Unauthenticated { backtrace: Backtrace },
    #[snafu(display("No such notification"))]
    NoSuchNotification { backtrace: Backtrace },
    #[snafu(display("You may only dismiss your own notifications"))]
    NotYours { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, format!("{}", self)),
            Error::NoSuchNotification { .. } => (StatusCode::NOT_FOUND, format!("{}", self)),
            Error::NotYours { .. } => (StatusCode::FORBIDDEN, format!("{}", self)),
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

/// Record that `reply` was posted under `review`, unless the author is talking to themselves
pub async fn notify_reply(
    storage: &(dyn StorageBackend + Send + Sync),
    review: &Review,
    reply: &Reply,
) -> std::result::Result<(), storage::Error> {
    if review.author() == reply.author() {
        return Ok(());
    }
    let notification = Notification::new(
        review.author(),
        &format!(
            "{} replied to your review: {}",
            reply.author_nickname(),
            reply.content()
        ),
        &format!("/book/{}", review.isbn()),
        Utc::now(),
    );
    storage.add_notification(&notification).await
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `/api/notifications`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationView {
    notification_id: NotificationId,
    message: String,
    link: String,
    posted: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ListRsp {
    notifications: Vec<NotificationView>,
}

async fn list(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
) -> axum::response::Response {
    async fn list1(state: &Bookden, principal: Principal) -> Result<ListRsp> {
        let mut notifications = state
            .storage
            .notifications_for_user(&principal.id)
            .await
            .context(StorageSnafu)?;
        notifications.sort_by_key(|n| std::cmp::Reverse(n.posted()));
        Ok(ListRsp {
            notifications: notifications
                .iter()
                .map(|n| NotificationView {
                    notification_id: n.id(),
                    message: n.message().to_owned(),
                    link: n.link().to_owned(),
                    posted: n.posted(),
                })
                .collect(),
        })
    }

    match principal.context(UnauthenticatedSnafu) {
        Ok(Extension(principal)) => match list1(&state, principal).await {
            Ok(rsp) => (StatusCode::OK, Json(rsp)).into_response(),
            Err(err) => {
                error!("{:#?}", err);
                err.into_response()
            }
        },
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                   `/api/notification-dismiss`                                  //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("notifications.dismissed", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DismissReq {
    notification_id: String,
}

async fn dismiss(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Query(req): Query<DismissReq>,
) -> axum::response::Response {
    async fn dismiss1(state: &Bookden, principal: Principal, req: DismissReq) -> Result<()> {
        let id = NotificationId::from_raw_string(&req.notification_id)
            .ok()
            .context(NoSuchNotificationSnafu)?;
        let notification = state
            .storage
            .get_notification(&id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchNotificationSnafu)?;
        ensure!(notification.target() == &principal.id, NotYoursSnafu);
        state
            .storage
            .delete_notification(&id)
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    match principal.context(UnauthenticatedSnafu) {
        Ok(Extension(principal)) => match dismiss1(&state, principal, req).await {
            Ok(()) => {
                counter_add!(state.instruments, "notifications.dismissed", 1, &[]);
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

/// Return a router for the notification API
pub fn make_router(state: Arc<Bookden>) -> Router<Arc<Bookden>> {
    Router::new()
        .route("/api/notifications", get(list))
        .route("/api/notification-dismiss", delete(dismiss))
        .with_state(state)
}
