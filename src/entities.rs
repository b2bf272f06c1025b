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

//! # bookden models
//!
//! Refined types & records for the review engine. The refined newtypes ([Isbn], [Rating],
//! [Nickname] and so on) validate at construction, so once a value of one of these types exists
//! anywhere in the program it is known-good; `Deserialize` is implemented by hand where needed so
//! that invalid values are rejected at the HTTP boundary rather than deep in a handler.

use std::{
    collections::HashSet,
    fmt::Display,
    ops::Deref,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a thirteen-digit ISBN"))]
    BadIsbn { text: String, backtrace: Backtrace },
    #[snafu(display("Ratings run from one to five; got {value}"))]
    BadRating { value: u8, backtrace: Backtrace },
    #[snafu(display("Nicknames must be two to ten characters; got {text:?}"))]
    BadNickname { text: String, backtrace: Backtrace },
    #[snafu(display("Review comments may not be empty"))]
    EmptyComment { backtrace: Backtrace },
    #[snafu(display("{text} is not a well-formed review id"))]
    BadReviewId { text: String, backtrace: Backtrace },
    #[snafu(display("User ids may not be empty"))]
    EmptyUserId { backtrace: Backtrace },
    #[snafu(display("A review's author may not like their own review"))]
    SelfLike { backtrace: Backtrace },
    #[snafu(display("{text} is not a sort mode (expected \"latest\" or \"popular\")"))]
    BadSortMode { text: String, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{}", err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Declare a newtype struct wrapping [Uuid] for use as an opaque identifier.
///
/// The document store offers no auto-increment column, so opaque ids are assigned
/// application-side; a v4 UUID is the path of least resistance. One type per entity keeps a
/// [ReplyId] from ever being handed to a function expecting a [NotificationId].
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
            pub fn from_raw_string(s: &str) -> StdResult<$type_name, uuid::Error> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
    };
}

define_id!(ReplyId);
define_id!(NotificationId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             UserId                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The stable id the identity provider assigns a principal
///
/// Opaque to us; the only thing we insist on is that it be non-empty. It participates in the
/// composite review key, so it also shows up concatenated with an ISBN (see [ReviewId]).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: &str) -> Result<UserId> {
        (!s.is_empty())
            .then_some(UserId(s.to_owned()))
            .ok_or(EmptyUserIdSnafu.build())
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for UserId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `UserId`
impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        UserId::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        UserId::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(s: String) -> StdResult<Self, Self::Error> {
        if s.is_empty() {
            EmptyUserIdSnafu.fail()
        } else {
            Ok(UserId(s))
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Isbn                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

const ISBN_LENGTH: usize = 13;

lazy_static! {
    static ref ISBN_REGEX: Regex = Regex::new(r"^\d{13}$").unwrap(/* known good */);
}

fn check_isbn(s: &str) -> bool {
    ISBN_REGEX.is_match(s)
}

/// A canonical thirteen-digit ISBN
///
/// The catalog provider hands back ISBNs in assorted dress (hyphenated, space-separated, ISBN-10
/// alongside ISBN-13); [Isbn::new] strips hyphens & whitespace before validating. Everything
/// downstream of the boundary sees digits only, canonical length thirteen.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Isbn(String);

impl Isbn {
    pub fn new(text: &str) -> Result<Isbn> {
        let normalized: String = text
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .collect();
        check_isbn(&normalized).then_some(Isbn(normalized)).ok_or(
            BadIsbnSnafu {
                text: text.to_owned(),
            }
            .build(),
        )
    }
}

impl AsRef<str> for Isbn {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Isbn {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Isbn {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Isbn::new(&s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Isbn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Isbn {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Isbn::new(s)
    }
}

impl TryFrom<String> for Isbn {
    type Error = Error;

    fn try_from(s: String) -> StdResult<Self, Self::Error> {
        Isbn::new(&s)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Rating                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A star rating, one through five inclusive
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Result<Rating> {
        (1..=5)
            .contains(&value)
            .then_some(Rating(value))
            .ok_or(BadRatingSnafu { value }.build())
    }
    pub fn get(&self) -> u8 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = <u8 as serde::Deserialize>::deserialize(deserializer)?;
        Rating::new(value).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Nickname                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MIN_NICKNAME_LENGTH: usize = 2;
const MAX_NICKNAME_LENGTH: usize = 10;

// "Characters" here means Unicode graphemes, not bytes; a nickname written in Hangul or CJK
// should get the same budget as one in ASCII.
fn check_nickname(s: &str) -> bool {
    let count = UnicodeSegmentation::graphemes(s, true).count();
    (MIN_NICKNAME_LENGTH..=MAX_NICKNAME_LENGTH).contains(&count)
}

/// A display name, two to ten graphemes
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Nickname(String);

impl Nickname {
    pub fn new(text: &str) -> Result<Nickname> {
        check_nickname(text)
            .then_some(Nickname(text.to_owned()))
            .ok_or(
                BadNicknameSnafu {
                    text: text.to_owned(),
                }
                .build(),
            )
    }
}

impl AsRef<str> for Nickname {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Nickname {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Nickname {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Nickname::new(&s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Nickname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Comment                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Free-text review or reply body; non-empty after trimming
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Comment(String);

impl Comment {
    pub fn new(text: &str) -> Result<Comment> {
        (!text.trim().is_empty())
            .then_some(Comment(text.to_owned()))
            .ok_or(EmptyCommentSnafu.build())
    }
}

impl AsRef<str> for Comment {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Comment {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Comment {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Comment::new(&s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Comment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            ReviewId                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The composite review key: author id & book ISBN
///
/// One review per (user, book) is an invariant of the system. Deriving the key from the two
/// natural keys makes the invariant structural: two reviews by the same user for the same book
/// would collide on the key, and the storage layer's create-if-absent turns the collision into
/// [DuplicateReview]. The wire form is `"{user_id}_{isbn}"`; since an ISBN is exactly thirteen
/// digits, the string parses unambiguously from the right even when the user id itself contains
/// underscores.
///
/// [DuplicateReview]: crate::storage::Error::DuplicateReview
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ReviewId {
    user: UserId,
    isbn: Isbn,
}

impl ReviewId {
    pub fn from_parts(user: &UserId, isbn: &Isbn) -> ReviewId {
        ReviewId {
            user: user.clone(),
            isbn: isbn.clone(),
        }
    }
    pub fn parse(text: &str) -> Result<ReviewId> {
        let bad = || {
            BadReviewIdSnafu {
                text: text.to_owned(),
            }
            .build()
        };
        // thirteen ISBN digits plus the separating underscore
        if text.len() < ISBN_LENGTH + 2 {
            return Err(bad());
        }
        let (user, isbn) = text.split_at(text.len() - ISBN_LENGTH - 1);
        let isbn = isbn.strip_prefix('_').ok_or_else(bad)?;
        Ok(ReviewId {
            user: UserId::new(user).map_err(|_| bad())?,
            isbn: Isbn::new(isbn).map_err(|_| bad())?,
        })
    }
    pub fn user_id(&self) -> &UserId {
        &self.user
    }
    pub fn isbn(&self) -> &Isbn {
        &self.isbn
    }
}

impl Display for ReviewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.user, self.isbn)
    }
}

impl FromStr for ReviewId {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        ReviewId::parse(s)
    }
}

impl Serialize for ReviewId {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> StdResult<S::Ok, S::Error> {
        ser.serialize_str(&format!("{}", self))
    }
}

impl<'de> Deserialize<'de> for ReviewId {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        ReviewId::parse(&s).map_err(mk_serde_de_err::<'de, D>)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Principal                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The authenticated identity of a client, as vended by the identity provider
///
/// The display name is carried as a plain [String] rather than a [Nickname]: we did not mint it,
/// and refusing to serve a user because their provider-side display name runs long would be
/// obnoxious. [Nickname]'s rules are enforced only where *we* accept a new name (update-nickname).
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub email_verified: bool,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Book                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A book record: display metadata plus the denormalized aggregate statistics
///
/// `average_rating` is deliberately *not* a field. The at-rest invariant is that the average
/// equals `rating_sum / review_count`; deriving it on read makes the invariant structural rather
/// than something every writer must remember to maintain.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Book {
    isbn: Isbn,
    title: String,
    author: String,
    publisher: String,
    image: String,
    review_count: u32,
    rating_sum: u32,
}

impl Book {
    /// A freshly-resolved book has no reviews and zeroed statistics
    pub fn new(isbn: &Isbn, title: &str, author: &str, publisher: &str, image: &str) -> Book {
        Book {
            isbn: isbn.clone(),
            title: title.to_owned(),
            author: author.to_owned(),
            publisher: publisher.to_owned(),
            image: image.to_owned(),
            review_count: 0,
            rating_sum: 0,
        }
    }
    pub fn isbn(&self) -> &Isbn {
        &self.isbn
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn publisher(&self) -> &str {
        &self.publisher
    }
    pub fn image(&self) -> &str {
        &self.image
    }
    pub fn review_count(&self) -> u32 {
        self.review_count
    }
    pub fn rating_sum(&self) -> u32 {
        self.rating_sum
    }
    /// `rating_sum / review_count`; 0.0 when there are no reviews (never a division fault)
    pub fn average_rating(&self) -> f64 {
        if self.review_count == 0 {
            0.0
        } else {
            f64::from(self.rating_sum) / f64::from(self.review_count)
        }
    }
    /// One-decimal display rounding of [Book::average_rating]
    pub fn display_rating(&self) -> f64 {
        (self.average_rating() * 10.0).round() / 10.0
    }
    /// Fold a newly-submitted review into the aggregate
    pub fn record_review(&mut self, rating: Rating) {
        self.review_count += 1;
        self.rating_sum += u32::from(rating.get());
    }
    /// Adjust the aggregate for an edited review; the count is unchanged by an edit
    pub fn amend_review(&mut self, old: Rating, new: Rating) {
        let sum = i64::from(self.rating_sum) - i64::from(old.get()) + i64::from(new.get());
        self.rating_sum = sum.max(0) as u32;
    }
    /// Back a deleted review out of the aggregate, flooring both fields at zero
    pub fn forget_review(&mut self, rating: Rating) {
        self.review_count = self.review_count.saturating_sub(1);
        self.rating_sum = self.rating_sum.saturating_sub(u32::from(rating.get()));
        if self.review_count == 0 {
            // A zeroed count with a non-zero sum would poison the next average; clamp.
            self.rating_sum = 0;
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Review                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One user's review of one book
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Review {
    id: ReviewId,
    author_nickname: String,
    rating: Rating,
    comment: Comment,
    // Legacy records imported from the old store can lack a timestamp; they sort as epoch zero.
    posted: Option<DateTime<Utc>>,
    likes: HashSet<UserId>,
}

impl Review {
    pub fn new(
        author: &UserId,
        author_nickname: &str,
        isbn: &Isbn,
        rating: Rating,
        comment: Comment,
        posted: DateTime<Utc>,
    ) -> Review {
        Review {
            id: ReviewId::from_parts(author, isbn),
            author_nickname: author_nickname.to_owned(),
            rating,
            comment,
            posted: Some(posted),
            likes: HashSet::new(),
        }
    }
    pub fn id(&self) -> &ReviewId {
        &self.id
    }
    pub fn author(&self) -> &UserId {
        self.id.user_id()
    }
    pub fn author_nickname(&self) -> &str {
        &self.author_nickname
    }
    pub fn isbn(&self) -> &Isbn {
        self.id.isbn()
    }
    pub fn rating(&self) -> Rating {
        self.rating
    }
    pub fn comment(&self) -> &Comment {
        &self.comment
    }
    pub fn posted(&self) -> Option<DateTime<Utc>> {
        self.posted
    }
    pub fn likes(&self) -> &HashSet<UserId> {
        &self.likes
    }
    /// Apply an edit: new rating & comment, timestamp refreshed
    pub fn amend(&mut self, rating: Rating, comment: Comment, now: DateTime<Utc>) {
        self.rating = rating;
        self.comment = comment;
        self.posted = Some(now);
    }
    pub fn rename_author(&mut self, nickname: &Nickname) {
        self.author_nickname = nickname.to_string();
    }
    /// Toggle `liker`'s membership in the like set; true means they now like the review
    ///
    /// An author may never appear in their own like set.
    pub fn toggle_like(&mut self, liker: &UserId) -> Result<bool> {
        if liker == self.author() {
            return SelfLikeSnafu.fail();
        }
        if self.likes.remove(liker) {
            Ok(false)
        } else {
            self.likes.insert(liker.clone());
            Ok(true)
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Reply                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A reply beneath a review; displayed in timestamp-ascending order
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Reply {
    id: ReplyId,
    review: ReviewId,
    author: UserId,
    author_nickname: String,
    content: Comment,
    posted: DateTime<Utc>,
}

impl Reply {
    pub fn new(
        review: &ReviewId,
        author: &UserId,
        author_nickname: &str,
        content: Comment,
        posted: DateTime<Utc>,
    ) -> Reply {
        Reply {
            id: ReplyId::new(),
            review: review.clone(),
            author: author.clone(),
            author_nickname: author_nickname.to_owned(),
            content,
            posted,
        }
    }
    pub fn id(&self) -> ReplyId {
        self.id
    }
    pub fn review(&self) -> &ReviewId {
        &self.review
    }
    pub fn author(&self) -> &UserId {
        &self.author
    }
    pub fn author_nickname(&self) -> &str {
        &self.author_nickname
    }
    pub fn content(&self) -> &Comment {
        &self.content
    }
    pub fn posted(&self) -> DateTime<Utc> {
        self.posted
    }
    pub fn set_content(&mut self, content: Comment) {
        self.content = content;
    }
    pub fn rename_author(&mut self, nickname: &Nickname) {
        self.author_nickname = nickname.to_string();
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Shelf                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The two per-user shelves
///
/// Wishlist & Reading have identical shape & semantics; everything that operates on a shelf is
/// parametrized by this enum rather than duplicated per shelf.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shelf {
    Wishlist,
    Reading,
}

impl Shelf {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shelf::Wishlist => "wishlist",
            Shelf::Reading => "reading",
        }
    }
    /// The response field name clients expect for this shelf's membership flag
    pub fn membership_field(&self) -> &'static str {
        match self {
            Shelf::Wishlist => "isWished",
            Shelf::Reading => "isReading",
        }
    }
}

impl Display for Shelf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Membership of one book on one user's shelf, with denormalized display fields
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ShelfEntry {
    user: UserId,
    isbn: Isbn,
    title: String,
    author: String,
    image: String,
}

impl ShelfEntry {
    pub fn new(user: &UserId, isbn: &Isbn, title: &str, author: &str, image: &str) -> ShelfEntry {
        ShelfEntry {
            user: user.clone(),
            isbn: isbn.clone(),
            title: title.to_owned(),
            author: author.to_owned(),
            image: image.to_owned(),
        }
    }
    pub fn user(&self) -> &UserId {
        &self.user
    }
    pub fn isbn(&self) -> &Isbn {
        &self.isbn
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn image(&self) -> &str {
        &self.image
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Notification                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A note to a user that something happened to one of their reviews
///
/// Created when somebody else replies to your review; destroyed on explicit dismissal,
/// independently of every other entity's lifecycle.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Notification {
    id: NotificationId,
    target: UserId,
    message: String,
    link: String,
    read: bool,
    posted: DateTime<Utc>,
}

impl Notification {
    pub fn new(target: &UserId, message: &str, link: &str, posted: DateTime<Utc>) -> Notification {
        Notification {
            id: NotificationId::new(),
            target: target.clone(),
            message: message.to_owned(),
            link: link.to_owned(),
            read: false,
            posted,
        }
    }
    pub fn id(&self) -> NotificationId {
        self.id
    }
    pub fn target(&self) -> &UserId {
        &self.target
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    pub fn link(&self) -> &str {
        &self.link
    }
    pub fn read(&self) -> bool {
        self.read
    }
    pub fn posted(&self) -> DateTime<Utc> {
        self.posted
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            SortMode                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Review-listing sort modes
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Timestamp descending; a missing timestamp sorts as epoch zero
    #[default]
    Latest,
    /// Like count descending, ties broken by timestamp descending
    Popular,
}

impl FromStr for SortMode {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s {
            "latest" => Ok(SortMode::Latest),
            "popular" => Ok(SortMode::Popular),
            _ => BadSortModeSnafu { text: s.to_owned() }.fail(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn isbn() {
        assert!(Isbn::new("").is_err());
        assert!(Isbn::new("123").is_err());
        assert!(Isbn::new("978316148410x").is_err());
        assert!(Isbn::new("9783161484100").is_ok());
        // hyphenated & spaced forms normalize
        assert_eq!(
            Isbn::new("978-3-16-148410-0").unwrap().as_ref(),
            "9783161484100"
        );
        assert_eq!(
            Isbn::new("978 3 16 148410 0").unwrap().as_ref(),
            "9783161484100"
        );
        // ISBN-10 is *not* silently promoted
        assert!(Isbn::new("3-16-148410-X").is_err());
    }

    #[test]
    fn rating() {
        assert!(Rating::new(0).is_err());
        assert!(Rating::new(6).is_err());
        for value in 1..=5 {
            assert_eq!(Rating::new(value).unwrap().get(), value);
        }
    }

    #[test]
    fn nickname() {
        assert!(Nickname::new("").is_err());
        assert!(Nickname::new("x").is_err());
        assert!(Nickname::new("elevenchars").is_err());
        assert!(Nickname::new("jo").is_ok());
        assert!(Nickname::new("bookworm").is_ok());
        // grapheme count, not byte count
        assert!(Nickname::new("책벌레").is_ok());
    }

    #[test]
    fn review_id_round_trips() {
        let user = UserId::new("abc_123_def").unwrap();
        let isbn = Isbn::new("9783161484100").unwrap();
        let id = ReviewId::from_parts(&user, &isbn);
        let parsed = ReviewId::parse(&format!("{}", id)).unwrap();
        assert_eq!(parsed.user_id(), &user);
        assert_eq!(parsed.isbn(), &isbn);
        assert!(ReviewId::parse("no-underscore").is_err());
        assert!(ReviewId::parse("_9783161484100").is_err());
    }

    #[test]
    fn aggregate_arithmetic() {
        let isbn = Isbn::new("9783161484100").unwrap();
        let mut book = Book::new(&isbn, "SICP", "Abelson", "MIT", "");
        assert_eq!(book.average_rating(), 0.0);

        book.record_review(Rating::new(4).unwrap());
        assert_eq!((book.review_count(), book.rating_sum()), (1, 4));
        book.record_review(Rating::new(2).unwrap());
        assert_eq!((book.review_count(), book.rating_sum()), (2, 6));
        assert_eq!(book.average_rating(), 3.0);

        book.amend_review(Rating::new(4).unwrap(), Rating::new(5).unwrap());
        assert_eq!((book.review_count(), book.rating_sum()), (2, 7));
        assert_eq!(book.display_rating(), 3.5);

        book.forget_review(Rating::new(2).unwrap());
        assert_eq!((book.review_count(), book.rating_sum()), (1, 5));
        assert_eq!(book.average_rating(), 5.0);

        // deleting the last review drives everything to zero, not a division fault
        book.forget_review(Rating::new(5).unwrap());
        assert_eq!((book.review_count(), book.rating_sum()), (0, 0));
        assert_eq!(book.average_rating(), 0.0);
    }

    #[test]
    fn like_toggle() {
        let author = UserId::new("author").unwrap();
        let liker = UserId::new("liker").unwrap();
        let isbn = Isbn::new("9783161484100").unwrap();
        let mut review = Review::new(
            &author,
            "bookworm",
            &isbn,
            Rating::new(5).unwrap(),
            Comment::new("magisterial").unwrap(),
            Utc::now(),
        );
        assert!(review.toggle_like(&author).is_err());
        assert!(review.toggle_like(&liker).unwrap());
        assert_eq!(review.likes().len(), 1);
        assert!(!review.toggle_like(&liker).unwrap());
        assert!(review.likes().is_empty());
    }
}
