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

//! # reviews
//!
//! The review & reply API.
//!
//! Handlers here do the HTTP-shaped work (authentication, ownership checks, request validation,
//! response shaping) and hand the actual review/statistics choreography to [stats]. Each handler
//! follows the same pattern: an inner function returning `Result` against this module's [Error],
//! an outer function that matches on it, counts it, and converts it to a response.
//!
//! [stats]: crate::stats

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::{error, warn};

use crate::{
    counter_add,
    entities::{Book, Comment, Isbn, Principal, Rating, Reply, ReplyId, Review, ReviewId, SortMode},
    http::{Bookden, ErrorResponseBody},
    metrics::{self, Sort},
    notifications, stats, storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Validation { source: crate::entities::Error },
    #[snafu(display("Authentication required"))]
    Unauthenticated { backtrace: Backtrace },
    #[snafu(display("Please verify your email address before posting"))]
    EmailUnverified { backtrace: Backtrace },
    #[snafu(display("You may only modify your own contributions"))]
    NotYours { backtrace: Backtrace },
    #[snafu(display("No book with ISBN {isbn} in the catalog"))]
    UnknownIsbn { isbn: Isbn, backtrace: Backtrace },
    #[snafu(display("No review {id}"))]
    NoSuchReview { id: ReviewId, backtrace: Backtrace },
    #[snafu(display("No such reply"))]
    NoSuchReply { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Catalog { source: crate::catalog::Error },
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
            Error::EmailUnverified { .. } | Error::NotYours { .. } => {
                (StatusCode::FORBIDDEN, format!("{}", self))
            }
            Error::UnknownIsbn { .. } | Error::NoSuchReview { .. } | Error::NoSuchReply { .. } => {
                (StatusCode::NOT_FOUND, format!("{}", self))
            }
            Error::Catalog { source } => source.as_status_and_msg(),
            Error::Engine { source } => match source {
                stats::Error::DuplicateReview { .. } | stats::Error::SelfLike { .. } => {
                    (StatusCode::BAD_REQUEST, format!("{}", source))
                }
                stats::Error::NoSuchReview { .. } => {
                    (StatusCode::NOT_FOUND, format!("{}", source))
                }
                // The accepted-inconsistency window; details go to the log, not the client
                stats::Error::StatsLagged { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_owned(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_owned(),
                ),
            },
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

/// Pull the verified principal out of the request, or fail the way the API promises
fn require_principal(principal: Option<Extension<Principal>>) -> Result<Principal> {
    let Extension(principal) = principal.context(UnauthenticatedSnafu)?;
    Ok(principal)
}

fn require_verified(principal: Option<Extension<Principal>>) -> Result<Principal> {
    let principal = require_principal(principal)?;
    ensure!(principal.email_verified, EmailUnverifiedSnafu);
    Ok(principal)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `/api/review-submit`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("reviews.submitted", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new(stats::STATS_LAG_METRIC, Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitReq {
    isbn: String,
    rating: u8,
    comment: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRsp {
    review_id: ReviewId,
    review_count: u32,
    rating_sum: u32,
    average_rating: f64,
}

/// Resolve the book we're about to review into a seed record with zeroed statistics
///
/// Our own record wins if we have one; otherwise the catalog is consulted, and an ISBN the
/// catalog has never heard of is a client error, not a server one.
async fn seed_book(state: &Bookden, isbn: &Isbn) -> Result<Book> {
    if let Some(book) = state.storage.get_book(isbn).await.context(StorageSnafu)? {
        return Ok(book);
    }
    let meta = state
        .catalog
        .lookup(isbn)
        .await
        .context(CatalogSnafu)?
        .context(UnknownIsbnSnafu { isbn: isbn.clone() })?;
    Ok(Book::new(
        &meta.isbn,
        &meta.title,
        &meta.author,
        &meta.publisher,
        &meta.image,
    ))
}

async fn submit(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<SubmitReq>,
) -> axum::response::Response {
    async fn submit1(state: &Bookden, principal: Principal, req: SubmitReq) -> Result<SubmitRsp> {
        let isbn = Isbn::new(&req.isbn).context(ValidationSnafu)?;
        let rating = Rating::new(req.rating).context(ValidationSnafu)?;
        let comment = Comment::new(&req.comment).context(ValidationSnafu)?;
        let seed = seed_book(state, &isbn).await?;
        let review = Review::new(
            &principal.id,
            &principal.display_name,
            &isbn,
            rating,
            comment,
            Utc::now(),
        );
        let id = review.id().clone();
        let book = stats::submit(state.storage.as_ref(), &state.locks, &seed, review)
            .await
            .context(EngineSnafu)?;
        Ok(SubmitRsp {
            review_id: id,
            review_count: book.review_count(),
            rating_sum: book.rating_sum(),
            average_rating: book.average_rating(),
        })
    }

    match require_verified(principal).map(|p| (p, req)) {
        Ok((principal, req)) => match submit1(&state, principal, req).await {
            Ok(rsp) => {
                counter_add!(state.instruments, "reviews.submitted", 1, &[]);
                (StatusCode::OK, Json(rsp)).into_response()
            }
            Err(err) => {
                if matches!(
                    err,
                    Error::Engine {
                        source: stats::Error::StatsLagged { .. }
                    }
                ) {
                    counter_add!(state.instruments, stats::STATS_LAG_METRIC, 1, &[]);
                }
                error!("{:#?}", err);
                err.into_response()
            }
        },
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       `/api/review-edit`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("reviews.edited", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditReq {
    review_id: String,
    #[serde(default)]
    book_isbn: Option<String>,
    new_rating: u8,
    new_comment: String,
    /// Pre-edit rating as the client remembers it; checked, never trusted
    #[serde(default)]
    old_rating: Option<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EditRsp {
    review_id: ReviewId,
    rating: u8,
    comment: String,
    posted: Option<DateTime<Utc>>,
}

async fn edit(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<EditReq>,
) -> axum::response::Response {
    async fn edit1(state: &Bookden, principal: Principal, req: EditReq) -> Result<EditRsp> {
        let id = ReviewId::parse(&req.review_id).context(ValidationSnafu)?;
        ensure!(id.user_id() == &principal.id, NotYoursSnafu);
        if let Some(claimed) = &req.book_isbn {
            if Isbn::new(claimed).ok().as_ref() != Some(id.isbn()) {
                warn!(
                    "Edit of review {} names book {:?}; the review key says {}",
                    id,
                    claimed,
                    id.isbn()
                );
            }
        }
        let new_rating = Rating::new(req.new_rating).context(ValidationSnafu)?;
        let new_comment = Comment::new(&req.new_comment).context(ValidationSnafu)?;
        let claimed_old = req
            .old_rating
            .map(Rating::new)
            .transpose()
            .context(ValidationSnafu)?;
        let review = stats::edit(
            state.storage.as_ref(),
            &state.locks,
            &id,
            new_rating,
            new_comment,
            claimed_old,
        )
        .await
        .context(EngineSnafu)?;
        Ok(EditRsp {
            review_id: id,
            rating: review.rating().get(),
            comment: review.comment().to_string(),
            posted: review.posted(),
        })
    }

    match require_principal(principal).map(|p| (p, req)) {
        Ok((principal, req)) => match edit1(&state, principal, req).await {
            Ok(rsp) => {
                counter_add!(state.instruments, "reviews.edited", 1, &[]);
                (StatusCode::OK, Json(rsp)).into_response()
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
//                                      `/api/review-delete`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("reviews.deleted", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteReq {
    review_id: String,
    /// Rating as the client remembers it; checked, never trusted
    #[serde(default)]
    deleted_rating: Option<u8>,
}

async fn delete_review(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Query(req): Query<DeleteReq>,
) -> axum::response::Response {
    async fn delete1(state: &Bookden, principal: Principal, req: DeleteReq) -> Result<()> {
        let id = ReviewId::parse(&req.review_id).context(ValidationSnafu)?;
        ensure!(id.user_id() == &principal.id, NotYoursSnafu);
        let claimed = req
            .deleted_rating
            .map(Rating::new)
            .transpose()
            .context(ValidationSnafu)?;
        stats::delete(state.storage.as_ref(), &state.locks, &id, claimed)
            .await
            .context(EngineSnafu)
    }

    match require_principal(principal).map(|p| (p, req)) {
        Ok((principal, req)) => match delete1(&state, principal, req).await {
            Ok(()) => {
                counter_add!(state.instruments, "reviews.deleted", 1, &[]);
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
//                                       `/api/review-like`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("reviews.liked", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikeReq {
    review_id: String,
    /// Must match the authenticated principal; retained for interface compatibility
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct LikeRsp {
    likes: Vec<String>,
}

async fn like(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<LikeReq>,
) -> axum::response::Response {
    async fn like1(state: &Bookden, principal: Principal, req: LikeReq) -> Result<LikeRsp> {
        let id = ReviewId::parse(&req.review_id).context(ValidationSnafu)?;
        if let Some(claimed) = &req.user_id {
            ensure!(claimed == principal.id.as_ref(), NotYoursSnafu);
        }
        let likes = stats::like(state.storage.as_ref(), &state.locks, &id, &principal.id)
            .await
            .context(EngineSnafu)?;
        let mut likes: Vec<String> = likes.into_iter().map(|u| u.to_string()).collect();
        likes.sort();
        Ok(LikeRsp { likes })
    }

    match require_principal(principal).map(|p| (p, req)) {
        Ok((principal, req)) => match like1(&state, principal, req).await {
            Ok(rsp) => {
                counter_add!(state.instruments, "reviews.liked", 1, &[]);
                (StatusCode::OK, Json(rsp)).into_response()
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
//                                      `/api/review-reply`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("replies.posted", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyReq {
    review_id: String,
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyView {
    reply_id: ReplyId,
    review_id: ReviewId,
    user_id: String,
    nickname: String,
    content: String,
    posted: DateTime<Utc>,
}

impl From<&Reply> for ReplyView {
    fn from(reply: &Reply) -> ReplyView {
        ReplyView {
            reply_id: reply.id(),
            review_id: reply.review().clone(),
            user_id: reply.author().to_string(),
            nickname: reply.author_nickname().to_owned(),
            content: reply.content().to_string(),
            posted: reply.posted(),
        }
    }
}

async fn post_reply(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<ReplyReq>,
) -> axum::response::Response {
    async fn reply1(state: &Bookden, principal: Principal, req: ReplyReq) -> Result<ReplyView> {
        let id = ReviewId::parse(&req.review_id).context(ValidationSnafu)?;
        let content = Comment::new(&req.content).context(ValidationSnafu)?;
        let review = state
            .storage
            .get_review(&id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchReviewSnafu { id: id.clone() })?;
        let reply = Reply::new(
            &id,
            &principal.id,
            &principal.display_name,
            content,
            Utc::now(),
        );
        state.storage.add_reply(&reply).await.context(StorageSnafu)?;
        // The notification is a courtesy; its failure must not fail the reply
        if let Err(err) =
            notifications::notify_reply(state.storage.as_ref(), &review, &reply).await
        {
            warn!("Couldn't notify {} of a new reply: {}", review.author(), err);
        }
        Ok(ReplyView::from(&reply))
    }

    match require_verified(principal).map(|p| (p, req)) {
        Ok((principal, req)) => match reply1(&state, principal, req).await {
            Ok(rsp) => {
                counter_add!(state.instruments, "replies.posted", 1, &[]);
                (StatusCode::OK, Json(rsp)).into_response()
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
//                               `/api/reply-edit` & `/api/reply-delete`                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyEditReq {
    reply_id: String,
    content: String,
}

async fn owned_reply(state: &Bookden, raw_id: &str, principal: &Principal) -> Result<Reply> {
    let id = ReplyId::from_raw_string(raw_id).ok().context(NoSuchReplySnafu)?;
    let reply = state
        .storage
        .get_reply(&id)
        .await
        .context(StorageSnafu)?
        .context(NoSuchReplySnafu)?;
    ensure!(reply.author() == &principal.id, NotYoursSnafu);
    Ok(reply)
}

async fn edit_reply(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Json(req): Json<ReplyEditReq>,
) -> axum::response::Response {
    async fn edit1(state: &Bookden, principal: Principal, req: ReplyEditReq) -> Result<ReplyView> {
        let content = Comment::new(&req.content).context(ValidationSnafu)?;
        let mut reply = owned_reply(state, &req.reply_id, &principal).await?;
        reply.set_content(content);
        state
            .storage
            .update_reply(&reply)
            .await
            .context(StorageSnafu)?;
        Ok(ReplyView::from(&reply))
    }

    match require_principal(principal).map(|p| (p, req)) {
        Ok((principal, req)) => match edit1(&state, principal, req).await {
            Ok(rsp) => (StatusCode::OK, Json(rsp)).into_response(),
            Err(err) => {
                error!("{:#?}", err);
                err.into_response()
            }
        },
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyDeleteReq {
    reply_id: String,
}

async fn delete_reply(
    State(state): State<Arc<Bookden>>,
    principal: Option<Extension<Principal>>,
    Query(req): Query<ReplyDeleteReq>,
) -> axum::response::Response {
    async fn delete1(state: &Bookden, principal: Principal, req: ReplyDeleteReq) -> Result<()> {
        let reply = owned_reply(state, &req.reply_id, &principal).await?;
        state
            .storage
            .delete_reply(&reply.id())
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    match require_principal(principal).map(|p| (p, req)) {
        Ok((principal, req)) => match delete1(&state, principal, req).await {
            Ok(()) => (StatusCode::OK, Json(serde_json::json!({}))).into_response(),
            Err(err) => {
                error!("{:#?}", err);
                err.into_response()
            }
        },
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `/api/reviews`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Deserialize)]
struct ListReq {
    isbn: String,
    #[serde(default)]
    sort: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewView {
    review_id: ReviewId,
    user_id: String,
    nickname: String,
    rating: u8,
    comment: String,
    posted: Option<DateTime<Utc>>,
    likes: Vec<String>,
    replies: Vec<ReplyView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRsp {
    reviews: Vec<ReviewView>,
    review_count: u32,
    average_rating: f64,
}

async fn list_reviews(
    State(state): State<Arc<Bookden>>,
    Query(req): Query<ListReq>,
) -> axum::response::Response {
    async fn list1(state: &Bookden, req: ListReq) -> Result<ListRsp> {
        let isbn = Isbn::new(&req.isbn).context(ValidationSnafu)?;
        let mode: SortMode = req
            .sort
            .as_deref()
            .map(str::parse)
            .transpose()
            .context(ValidationSnafu)?
            .unwrap_or_default();

        let mut reviews = state
            .storage
            .reviews_for_book(&isbn)
            .await
            .context(StorageSnafu)?;
        stats::sort_reviews(&mut reviews, mode);

        let mut views = Vec::with_capacity(reviews.len());
        for review in &reviews {
            let mut replies = state
                .storage
                .replies_for_review(review.id())
                .await
                .context(StorageSnafu)?;
            replies.sort_by_key(Reply::posted);
            let mut likes: Vec<String> =
                review.likes().iter().map(|u| u.to_string()).collect();
            likes.sort();
            views.push(ReviewView {
                review_id: review.id().clone(),
                user_id: review.author().to_string(),
                nickname: review.author_nickname().to_owned(),
                rating: review.rating().get(),
                comment: review.comment().to_string(),
                posted: review.posted(),
                likes,
                replies: replies.iter().map(ReplyView::from).collect(),
            });
        }

        // The denormalized aggregate, for the book header; absent book means no reviews yet
        let (review_count, average_rating) = match state
            .storage
            .get_book(&isbn)
            .await
            .context(StorageSnafu)?
        {
            Some(book) => (book.review_count(), book.display_rating()),
            None => (0, 0.0),
        };
        Ok(ListRsp {
            reviews: views,
            review_count,
            average_rating,
        })
    }

    match list1(&state, req).await {
        Ok(rsp) => (StatusCode::OK, Json(rsp)).into_response(),
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

/// Return a router for the review & reply API
pub fn make_router(state: Arc<Bookden>) -> Router<Arc<Bookden>> {
    Router::new()
        .route("/api/review-submit", post(submit))
        .route("/api/review-edit", put(edit))
        .route("/api/review-delete", delete(delete_review))
        .route("/api/review-like", post(like))
        .route("/api/review-reply", post(post_reply))
        .route("/api/reply-edit", put(edit_reply))
        .route("/api/reply-delete", delete(delete_reply))
        .route("/api/reviews", get(list_reviews))
        .with_state(state)
}
