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

//! # bookden
//!
//! A self-hostable book-review service: search a third-party catalog, rate & review books, keep
//! wishlist and currently-reading shelves, get notified when someone replies to your review.
//!
//! The interesting part of the codebase is the review/statistics consistency engine in [stats]:
//! every review mutation must keep the denormalized aggregate on the book record honest, and the
//! backing document store offers no multi-record atomicity.

pub mod accounts;
pub mod authn;
pub mod catalog;
pub mod entities;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod notifications;
pub mod reviews;
pub mod shelves;
pub mod stats;
pub mod storage;
