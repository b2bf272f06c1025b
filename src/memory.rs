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

//! # memory
//!
//! [Backend] implementation over in-process hash maps.
//!
//! This is the backend `bookdend` selects for the `Memory` storage configuration, and the one
//! behind every test in the crate.
//! It intentionally mimics the *contract* of a managed document store, not its convenience: each
//! trait method takes & releases its lock independently, so a multi-step engine operation enjoys
//! no atomicity across calls here either. Tests that probe the engine's concurrency behavior
//! depend on that.
//!
//! [Backend]: crate::storage::Backend

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    entities::{
        Book, Isbn, Notification, NotificationId, Reply, ReplyId, Review, ReviewId, Shelf,
        ShelfEntry, UserId,
    },
    storage::{self, DuplicateReviewSnafu, NotFoundSnafu},
};

type Result<T> = std::result::Result<T, storage::Error>;

/// In-memory document store
#[derive(Default)]
pub struct Memory {
    books: RwLock<HashMap<Isbn, Book>>,
    reviews: RwLock<HashMap<ReviewId, Review>>,
    replies: RwLock<HashMap<ReplyId, Reply>>,
    shelves: RwLock<HashMap<(Shelf, UserId, Isbn), ShelfEntry>>,
    notifications: RwLock<HashMap<NotificationId, Notification>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }
}

#[async_trait]
impl storage::Backend for Memory {
    async fn get_book(&self, isbn: &Isbn) -> Result<Option<Book>> {
        Ok(self.books.read().await.get(isbn).cloned())
    }
    async fn put_book(&self, book: &Book) -> Result<()> {
        self.books
            .write()
            .await
            .insert(book.isbn().clone(), book.clone());
        Ok(())
    }

    async fn get_review(&self, id: &ReviewId) -> Result<Option<Review>> {
        Ok(self.reviews.read().await.get(id).cloned())
    }
    async fn add_review(&self, review: &Review) -> Result<()> {
        let mut reviews = self.reviews.write().await;
        if reviews.contains_key(review.id()) {
            return DuplicateReviewSnafu {
                id: review.id().clone(),
            }
            .fail();
        }
        reviews.insert(review.id().clone(), review.clone());
        Ok(())
    }
    async fn update_review(&self, review: &Review) -> Result<()> {
        let mut reviews = self.reviews.write().await;
        match reviews.get_mut(review.id()) {
            Some(slot) => {
                *slot = review.clone();
                Ok(())
            }
            None => NotFoundSnafu {
                what: format!("review {}", review.id()),
            }
            .fail(),
        }
    }
    async fn delete_review(&self, id: &ReviewId) -> Result<bool> {
        Ok(self.reviews.write().await.remove(id).is_some())
    }
    async fn reviews_for_book(&self, isbn: &Isbn) -> Result<Vec<Review>> {
        Ok(self
            .reviews
            .read()
            .await
            .values()
            .filter(|r| r.isbn() == isbn)
            .cloned()
            .collect())
    }
    async fn reviews_by_user(&self, user: &UserId) -> Result<Vec<Review>> {
        Ok(self
            .reviews
            .read()
            .await
            .values()
            .filter(|r| r.author() == user)
            .cloned()
            .collect())
    }

    async fn get_reply(&self, id: &ReplyId) -> Result<Option<Reply>> {
        Ok(self.replies.read().await.get(id).cloned())
    }
    async fn add_reply(&self, reply: &Reply) -> Result<()> {
        self.replies.write().await.insert(reply.id(), reply.clone());
        Ok(())
    }
    async fn update_reply(&self, reply: &Reply) -> Result<()> {
        let mut replies = self.replies.write().await;
        match replies.get_mut(&reply.id()) {
            Some(slot) => {
                *slot = reply.clone();
                Ok(())
            }
            None => NotFoundSnafu {
                what: format!("reply {}", reply.id()),
            }
            .fail(),
        }
    }
    async fn delete_reply(&self, id: &ReplyId) -> Result<bool> {
        Ok(self.replies.write().await.remove(id).is_some())
    }
    async fn replies_for_review(&self, review: &ReviewId) -> Result<Vec<Reply>> {
        Ok(self
            .replies
            .read()
            .await
            .values()
            .filter(|r| r.review() == review)
            .cloned()
            .collect())
    }
    async fn replies_by_user(&self, user: &UserId) -> Result<Vec<Reply>> {
        Ok(self
            .replies
            .read()
            .await
            .values()
            .filter(|r| r.author() == user)
            .cloned()
            .collect())
    }
    async fn delete_replies_for_review(&self, review: &ReviewId) -> Result<usize> {
        let mut replies = self.replies.write().await;
        let doomed: Vec<ReplyId> = replies
            .values()
            .filter(|r| r.review() == review)
            .map(|r| r.id())
            .collect();
        for id in &doomed {
            replies.remove(id);
        }
        Ok(doomed.len())
    }

    async fn get_shelf_entry(
        &self,
        shelf: Shelf,
        user: &UserId,
        isbn: &Isbn,
    ) -> Result<Option<ShelfEntry>> {
        Ok(self
            .shelves
            .read()
            .await
            .get(&(shelf, user.clone(), isbn.clone()))
            .cloned())
    }
    async fn put_shelf_entry(&self, shelf: Shelf, entry: &ShelfEntry) -> Result<()> {
        self.shelves.write().await.insert(
            (shelf, entry.user().clone(), entry.isbn().clone()),
            entry.clone(),
        );
        Ok(())
    }
    async fn delete_shelf_entry(&self, shelf: Shelf, user: &UserId, isbn: &Isbn) -> Result<bool> {
        Ok(self
            .shelves
            .write()
            .await
            .remove(&(shelf, user.clone(), isbn.clone()))
            .is_some())
    }
    async fn shelf_for_user(&self, shelf: Shelf, user: &UserId) -> Result<Vec<ShelfEntry>> {
        Ok(self
            .shelves
            .read()
            .await
            .iter()
            .filter(|((s, u, _), _)| *s == shelf && u == user)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn get_notification(&self, id: &NotificationId) -> Result<Option<Notification>> {
        Ok(self.notifications.read().await.get(id).cloned())
    }
    async fn add_notification(&self, notification: &Notification) -> Result<()> {
        self.notifications
            .write()
            .await
            .insert(notification.id(), notification.clone());
        Ok(())
    }
    async fn delete_notification(&self, id: &NotificationId) -> Result<bool> {
        Ok(self.notifications.write().await.remove(id).is_some())
    }
    async fn notifications_for_user(&self, user: &UserId) -> Result<Vec<Notification>> {
        Ok(self
            .notifications
            .read()
            .await
            .values()
            .filter(|n| n.target() == user)
            .cloned()
            .collect())
    }
    async fn delete_notifications_for_user(&self, user: &UserId) -> Result<usize> {
        let mut notifications = self.notifications.write().await;
        let doomed: Vec<NotificationId> = notifications
            .values()
            .filter(|n| n.target() == user)
            .map(|n| n.id())
            .collect();
        for id in &doomed {
            notifications.remove(id);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::{Comment, Rating};
    use crate::storage::Backend;
    use chrono::Utc;

    #[tokio::test]
    async fn review_uniqueness() {
        let store = Memory::new();
        let user = UserId::new("u1").unwrap();
        let isbn = Isbn::new("9783161484100").unwrap();
        let review = Review::new(
            &user,
            "bookworm",
            &isbn,
            Rating::new(4).unwrap(),
            Comment::new("good").unwrap(),
            Utc::now(),
        );
        store.add_review(&review).await.unwrap();
        assert!(matches!(
            store.add_review(&review).await,
            Err(storage::Error::DuplicateReview { .. })
        ));
        assert!(store.delete_review(review.id()).await.unwrap());
        assert!(!store.delete_review(review.id()).await.unwrap());
    }

    #[tokio::test]
    async fn shelf_isolation() {
        let store = Memory::new();
        let user = UserId::new("u1").unwrap();
        let isbn = Isbn::new("9783161484100").unwrap();
        let entry = ShelfEntry::new(&user, &isbn, "SICP", "Abelson", "");
        store
            .put_shelf_entry(Shelf::Wishlist, &entry)
            .await
            .unwrap();
        // membership on one shelf implies nothing about the other
        assert!(store
            .get_shelf_entry(Shelf::Wishlist, &user, &isbn)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_shelf_entry(Shelf::Reading, &user, &isbn)
            .await
            .unwrap()
            .is_none());
    }
}
