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

//! # storage
//!
//! The contract bookden requires from its document store.
//!
//! The store is an external collaborator: per-record CRUD plus simple equality querying, and *no*
//! multi-record atomicity. Anything the review engine needs beyond that (uniqueness of the
//! composite review key aside, which any reasonable store can do with a conditional insert) is the
//! engine's problem, not the backend's; see [stats] for how the engine copes.
//!
//! [stats]: crate::stats

use std::collections::HashSet;

use async_trait::async_trait;
use snafu::{prelude::*, Backtrace};

use crate::entities::{
    Book, Isbn, Notification, NotificationId, Reply, ReplyId, Review, ReviewId, Shelf, ShelfEntry,
    UserId,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The composite key already exists; one review per (user, book) pair
    #[snafu(display("A review by this user for {isbn} already exists", isbn = id.isbn()))]
    DuplicateReview { id: ReviewId, backtrace: Backtrace },
    #[snafu(display("No such {what}"))]
    NotFound { what: String, backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl Error {
    /// Wrap a backend-specific failure; implementations use this for anything that isn't one of
    /// the semantically-interesting variants above
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Backend {
            source: Box::new(err),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The bookden storage backend
///
/// One method per primitive store operation. Every operation is an independent network round trip
/// on a real backend; nothing here is transactional across methods, and the trait deliberately
/// offers no way to pretend otherwise.
#[async_trait]
pub trait Backend {
    ////////////////////////////////////////////////////////////////////////////////////////////////
    // books
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn get_book(&self, isbn: &Isbn) -> Result<Option<Book>>;
    /// Create or overwrite the book record; the only writer is the statistics reconciler
    async fn put_book(&self, book: &Book) -> Result<()>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // reviews
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn get_review(&self, id: &ReviewId) -> Result<Option<Review>>;
    /// Create-if-absent; fail with [Error::DuplicateReview] if the key is already present
    async fn add_review(&self, review: &Review) -> Result<()>;
    /// Overwrite an existing review; fail with [Error::NotFound] if it is missing
    async fn update_review(&self, review: &Review) -> Result<()>;
    /// Remove a review; returns whether anything was actually deleted
    async fn delete_review(&self, id: &ReviewId) -> Result<bool>;
    async fn reviews_for_book(&self, isbn: &Isbn) -> Result<Vec<Review>>;
    async fn reviews_by_user(&self, user: &UserId) -> Result<Vec<Review>>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // replies
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn get_reply(&self, id: &ReplyId) -> Result<Option<Reply>>;
    async fn add_reply(&self, reply: &Reply) -> Result<()>;
    async fn update_reply(&self, reply: &Reply) -> Result<()>;
    async fn delete_reply(&self, id: &ReplyId) -> Result<bool>;
    async fn replies_for_review(&self, review: &ReviewId) -> Result<Vec<Reply>>;
    async fn replies_by_user(&self, user: &UserId) -> Result<Vec<Reply>>;
    /// Fan-out delete of every reply under a review; part of the review's destruction contract
    async fn delete_replies_for_review(&self, review: &ReviewId) -> Result<usize>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // shelves
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn get_shelf_entry(
        &self,
        shelf: Shelf,
        user: &UserId,
        isbn: &Isbn,
    ) -> Result<Option<ShelfEntry>>;
    async fn put_shelf_entry(&self, shelf: Shelf, entry: &ShelfEntry) -> Result<()>;
    async fn delete_shelf_entry(&self, shelf: Shelf, user: &UserId, isbn: &Isbn) -> Result<bool>;
    async fn shelf_for_user(&self, shelf: Shelf, user: &UserId) -> Result<Vec<ShelfEntry>>;

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // notifications
    ////////////////////////////////////////////////////////////////////////////////////////////////

    async fn get_notification(&self, id: &NotificationId) -> Result<Option<Notification>>;
    async fn add_notification(&self, notification: &Notification) -> Result<()>;
    async fn delete_notification(&self, id: &NotificationId) -> Result<bool>;
    async fn notifications_for_user(&self, user: &UserId) -> Result<Vec<Notification>>;
    async fn delete_notifications_for_user(&self, user: &UserId) -> Result<usize>;
}

/// The ISBNs touched by a user's reviews; a convenience for the account-deletion cascade
pub async fn isbns_reviewed_by(
    storage: &(dyn Backend + Send + Sync),
    user: &UserId,
) -> Result<HashSet<Isbn>> {
    Ok(storage
        .reviews_by_user(user)
        .await?
        .into_iter()
        .map(|r| r.isbn().clone())
        .collect())
}
