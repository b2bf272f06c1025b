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

//! # stats
//!
//! The review/statistics consistency engine.
//!
//! Every review mutation (submit, edit, delete) must keep the denormalized aggregate on the book
//! record — `review_count` & `rating_sum` — honest, and the document store gives us no atomicity
//! across the three-to-four round trips each mutation takes. Two things stand between us and the
//! classic lost-update race:
//!
//! 1. **A per-ISBN serialization point** ([IsbnLocks]). The book record is the only genuinely
//!    shared mutable resource in the system (reviews, replies, shelves & notifications are each
//!    owned by a single user), so serializing aggregate read-modify-writes per ISBN removes the
//!    race without a global bottleneck.
//!
//! 2. **Server-side delta derivation.** Edit & delete re-read the stored review *inside* the
//!    serialized section and derive the aggregate delta from what is actually on disk. The
//!    client-supplied prior rating is accepted for backward compatibility but demoted to a
//!    consistency check; a stale or tampered value gets a warning in the log, not a corrupted
//!    aggregate.
//!
//! One window remains open: if the process dies between persisting a review and updating the
//! aggregate, the aggregate under-counts until the next mutation of that book. Closing it for
//! real needs multi-record atomicity from the store; what we do here is keep the window one
//! write wide, log it loudly, and count it ([STATS_LAG_METRIC]).

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::Arc,
    sync::Mutex as StdMutex,
};

use chrono::{DateTime, Utc};
use snafu::{prelude::*, Backtrace, IntoError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::{
    entities::{self, Book, Comment, Isbn, Rating, Review, ReviewId, SortMode, UserId},
    storage::{self, Backend as StorageBackend},
};

/// Bumped whenever a review write succeeded but the follow-up aggregate write did not
pub const STATS_LAG_METRIC: &str = "stats.lagged";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("A review by this user already exists for {isbn}", isbn = id.isbn()))]
    DuplicateReview { id: ReviewId, backtrace: Backtrace },
    #[snafu(display("No review {id}"))]
    NoSuchReview { id: ReviewId, backtrace: Backtrace },
    #[snafu(display("Failed to resolve book {isbn}: {source}"))]
    ResolveBook {
        isbn: Isbn,
        source: storage::Error,
    },
    #[snafu(display("Failed to persist review {id}: {source}"))]
    PersistReview {
        id: ReviewId,
        source: storage::Error,
    },
    #[snafu(display(
        "Review {id} was persisted but the statistics update failed; the aggregate for {isbn} \
         now under-counts it: {source}",
        isbn = id.isbn()
    ))]
    StatsLagged {
        id: ReviewId,
        source: storage::Error,
    },
    #[snafu(display("Failed to update statistics for {isbn}: {source}"))]
    UpdateStats {
        isbn: Isbn,
        source: storage::Error,
    },
    #[snafu(display("Failed to look up review {id}: {source}"))]
    LookupReview {
        id: ReviewId,
        source: storage::Error,
    },
    #[snafu(display("Failed to update review {id}: {source}"))]
    UpdateReview {
        id: ReviewId,
        source: storage::Error,
    },
    #[snafu(display("Failed to delete review {id}: {source}"))]
    DeleteReview {
        id: ReviewId,
        source: storage::Error,
    },
    #[snafu(display("Failed to cascade-delete replies under {id}: {source}"))]
    DeleteReplies {
        id: ReviewId,
        source: storage::Error,
    },
    #[snafu(display("{source}"))]
    SelfLike { source: entities::Error },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           IsbnLocks                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A registry of per-ISBN async mutexes
///
/// Locks are created on first use and never reclaimed; the registry grows with the number of
/// distinct books mutated over the process lifetime, which is cheap (one `Arc<Mutex<()>>` per
/// ISBN). The inner map is guarded by a std mutex — it is only held long enough to clone an Arc,
/// never across an await.
#[derive(Default)]
pub struct IsbnLocks {
    inner: StdMutex<HashMap<Isbn, Arc<AsyncMutex<()>>>>,
}

impl IsbnLocks {
    pub fn new() -> IsbnLocks {
        IsbnLocks::default()
    }
    /// Acquire the serialization lock for `isbn`, waiting if another mutation holds it
    pub async fn acquire(&self, isbn: &Isbn) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .lock()
            .unwrap(/* only poisoned if a holder panicked while cloning an Arc */)
            .entry(isbn.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Submit                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Submit a new review
///
/// Under the ISBN's lock: resolve the book record (creating it from `seed` with zeroed statistics
/// if absent), create the review (the composite key makes a second review by the same author for
/// the same book collide), then fold the new rating into the aggregate. Returns the updated book.
///
/// If the final statistics write fails the review stays — that is the accepted inconsistency
/// window; the caller gets [Error::StatsLagged] and should surface a generic failure.
pub async fn submit(
    storage: &(dyn StorageBackend + Send + Sync),
    locks: &IsbnLocks,
    seed: &Book,
    review: Review,
) -> Result<Book> {
    let isbn = review.isbn().clone();
    let _guard = locks.acquire(&isbn).await;

    let mut book = match storage
        .get_book(&isbn)
        .await
        .context(ResolveBookSnafu { isbn: isbn.clone() })?
    {
        Some(book) => book,
        None => {
            debug!("First review for {}; creating its book record", isbn);
            storage
                .put_book(seed)
                .await
                .context(ResolveBookSnafu { isbn: isbn.clone() })?;
            seed.clone()
        }
    };

    let id = review.id().clone();
    let rating = review.rating();
    storage.add_review(&review).await.map_err(|err| match err {
        storage::Error::DuplicateReview { .. } => DuplicateReviewSnafu { id: id.clone() }.build(),
        err => PersistReviewSnafu { id: id.clone() }.into_error(err),
    })?;

    book.record_review(rating);
    storage
        .put_book(&book)
        .await
        .context(StatsLaggedSnafu { id })?;
    Ok(book)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Edit                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Edit an existing review's rating & comment
///
/// The aggregate delta is `new_rating − stored_rating` derived from the review as re-read under
/// the lock; `claimed_old` is only checked for agreement. The review count is unchanged by an
/// edit, so the recomputed average uses the stored count as-is (zero count yields average zero).
/// A missing book record is logged & skipped — it never blocks the review mutation.
pub async fn edit(
    storage: &(dyn StorageBackend + Send + Sync),
    locks: &IsbnLocks,
    id: &ReviewId,
    new_rating: Rating,
    new_comment: Comment,
    claimed_old: Option<Rating>,
) -> Result<Review> {
    let _guard = locks.acquire(id.isbn()).await;

    let mut review = storage
        .get_review(id)
        .await
        .context(LookupReviewSnafu { id: id.clone() })?
        .context(NoSuchReviewSnafu { id: id.clone() })?;
    let old = review.rating();
    if let Some(claimed) = claimed_old {
        if claimed != old {
            warn!(
                "Client claims review {} carried rating {} but the store says {}; using the \
                 stored value",
                id, claimed, old
            );
        }
    }

    match storage
        .get_book(id.isbn())
        .await
        .context(ResolveBookSnafu {
            isbn: id.isbn().clone(),
        })? {
        Some(mut book) => {
            book.amend_review(old, new_rating);
            storage.put_book(&book).await.context(UpdateStatsSnafu {
                isbn: id.isbn().clone(),
            })?;
        }
        None => warn!(
            "No book record for {}; skipping the statistics step of this edit",
            id.isbn()
        ),
    }

    review.amend(new_rating, new_comment, Utc::now());
    storage
        .update_review(&review)
        .await
        .context(UpdateReviewSnafu { id: id.clone() })?;
    Ok(review)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Delete                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Delete a review, backing it out of the aggregate & cascading to its replies
///
/// The statistics step is strictly best-effort here: a missing or unwritable book record is
/// logged and skipped, never allowed to block destruction of the review itself. Replies are
/// removed by explicit fan-out; they are meaningless once orphaned.
pub async fn delete(
    storage: &(dyn StorageBackend + Send + Sync),
    locks: &IsbnLocks,
    id: &ReviewId,
    claimed_rating: Option<Rating>,
) -> Result<()> {
    let _guard = locks.acquire(id.isbn()).await;

    let review = storage
        .get_review(id)
        .await
        .context(LookupReviewSnafu { id: id.clone() })?
        .context(NoSuchReviewSnafu { id: id.clone() })?;
    if let Some(claimed) = claimed_rating {
        if claimed != review.rating() {
            warn!(
                "Client claims review {} carried rating {} but the store says {}; using the \
                 stored value",
                id,
                claimed,
                review.rating()
            );
        }
    }

    match storage.get_book(id.isbn()).await {
        Ok(Some(mut book)) => {
            book.forget_review(review.rating());
            if let Err(err) = storage.put_book(&book).await {
                warn!(
                    "Statistics update for {} failed during review deletion ({}); deleting the \
                     review anyway",
                    id.isbn(),
                    err
                );
            }
        }
        Ok(None) => warn!(
            "No book record for {}; skipping the statistics step of this deletion",
            id.isbn()
        ),
        Err(err) => warn!(
            "Couldn't read the book record for {} ({}); deleting the review anyway",
            id.isbn(),
            err
        ),
    }

    storage
        .delete_replies_for_review(id)
        .await
        .context(DeleteRepliesSnafu { id: id.clone() })?;
    storage
        .delete_review(id)
        .await
        .context(DeleteReviewSnafu { id: id.clone() })?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Like                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Toggle `liker`'s membership in a review's like set; returns the resulting set
///
/// No book-record interaction, but the toggle is still a read-modify-write on the review, so it
/// runs under the same per-ISBN lock as edits to avoid clobbering a concurrent rating change.
pub async fn like(
    storage: &(dyn StorageBackend + Send + Sync),
    locks: &IsbnLocks,
    id: &ReviewId,
    liker: &UserId,
) -> Result<HashSet<UserId>> {
    let _guard = locks.acquire(id.isbn()).await;

    let mut review = storage
        .get_review(id)
        .await
        .context(LookupReviewSnafu { id: id.clone() })?
        .context(NoSuchReviewSnafu { id: id.clone() })?;
    review.toggle_like(liker).context(SelfLikeSnafu)?;
    storage
        .update_review(&review)
        .await
        .context(UpdateReviewSnafu { id: id.clone() })?;
    Ok(review.likes().clone())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             sorting                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn posted_or_epoch(review: &Review) -> DateTime<Utc> {
    review.posted().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Order reviews for listing
///
/// Both modes are total orders over (key, timestamp), and the underlying sort is stable, so
/// re-sorting already-sorted data is a no-op.
pub fn sort_reviews(reviews: &mut [Review], mode: SortMode) {
    match mode {
        SortMode::Latest => reviews.sort_by_key(|r| Reverse(posted_or_epoch(r))),
        SortMode::Popular => {
            reviews.sort_by_key(|r| (Reverse(r.likes().len()), Reverse(posted_or_epoch(r))))
        }
    }
}
