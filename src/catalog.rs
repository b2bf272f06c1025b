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

//! # catalog
//!
//! The book-metadata provider: a third-party search API we treat strictly as an external
//! collaborator. It may be down or rate-limiting us at any moment; a failed lookup is fatal to
//! the single operation that needed it (you can't review a book we've never heard of without
//! metadata) and to nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tracing::{debug, error};
use url::Url;

use crate::{
    counter_add,
    entities::Isbn,
    http::{Bookden, ErrorResponseBody},
    metrics::{self, Sort},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The book catalog is unavailable: {source}"))]
    Upstream {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The book catalog answered {code}"))]
    UpstreamStatus {
        code: StatusCode,
        backtrace: Backtrace,
    },
    #[snafu(display("Couldn't decode the catalog response: {source}"))]
    Decode {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No book with ISBN {isbn} in the catalog"))]
    UnknownIsbn { isbn: Isbn, backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Validation { source: crate::entities::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            // Distinguishable from a generic 500 so clients know a retry may help
            Error::Upstream { .. } | Error::UpstreamStatus { .. } | Error::Decode { .. } => {
                (StatusCode::BAD_GATEWAY, format!("{}", self))
            }
            Error::UnknownIsbn { .. } => (StatusCode::NOT_FOUND, format!("{}", self)),
            Error::Validation { source } => (StatusCode::BAD_REQUEST, format!("{}", source)),
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
//                                        the Catalog trait                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Display metadata for one book, as the catalog knows it
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BookMeta {
    pub isbn: Isbn,
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub image: String,
}

/// Catalog search ordering, passed through to the provider
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSort {
    #[default]
    Accuracy,
    Latest,
}

impl SearchSort {
    fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Accuracy => "accuracy",
            SearchSort::Latest => "latest",
        }
    }
}

/// One page of search results
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub books: Vec<BookMeta>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_results: u32,
}

/// The book-metadata provider, behind a trait so tests can stub it
#[async_trait]
pub trait Catalog {
    /// Resolve one ISBN; `Ok(None)` means the catalog has never heard of it
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookMeta>>;
    /// Free-text search, paginated; pages are numbered from one
    async fn search(&self, query: &str, sort: SearchSort, page: u32) -> Result<SearchPage>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          HttpCatalog                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

// The provider's wire format: a flat item list plus a grand total.
#[derive(Debug, Deserialize)]
struct UpstreamItem {
    #[serde(default)]
    isbn: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    publisher: String,
    #[serde(default)]
    image: String,
}

#[derive(Debug, Deserialize)]
struct UpstreamSearchRsp {
    total: u32,
    items: Vec<UpstreamItem>,
}

impl UpstreamItem {
    /// Items whose ISBN won't normalize to thirteen digits are dropped, not fatal; the provider
    /// mixes ISBN-10-only records into its results
    fn into_meta(self) -> Option<BookMeta> {
        match Isbn::new(&self.isbn) {
            Ok(isbn) => Some(BookMeta {
                isbn,
                title: self.title,
                author: self.author,
                publisher: self.publisher,
                image: self.image,
            }),
            Err(_) => {
                debug!("Dropping a search result with unusable ISBN {:?}", self.isbn);
                None
            }
        }
    }
}

/// [Catalog] implementation over the provider's HTTP API
pub struct HttpCatalog {
    http: reqwest::Client,
    base: Url,
    page_size: u32,
}

impl HttpCatalog {
    pub fn new(http: reqwest::Client, base: Url, page_size: u32) -> HttpCatalog {
        HttpCatalog {
            http,
            base,
            page_size,
        }
    }
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let mut url = self.base.clone();
        url.set_path(path);
        for (k, v) in params {
            url.query_pairs_mut().append_pair(k, v);
        }
        let rsp = self.http.get(url).send().await.context(UpstreamSnafu)?;
        let code = rsp.status();
        if !code.is_success() {
            return UpstreamStatusSnafu { code }.fail();
        }
        rsp.json().await.context(DecodeSnafu)
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookMeta>> {
        let rsp: UpstreamSearchRsp = self
            .get_json("/search", &[("query", isbn.as_ref()), ("size", "1")])
            .await?;
        Ok(rsp.items.into_iter().find_map(UpstreamItem::into_meta))
    }
    async fn search(&self, query: &str, sort: SearchSort, page: u32) -> Result<SearchPage> {
        let page = page.max(1);
        let rsp: UpstreamSearchRsp = self
            .get_json(
                "/search",
                &[
                    ("query", query),
                    ("sort", sort.as_str()),
                    ("page", &page.to_string()),
                    ("size", &self.page_size.to_string()),
                ],
            )
            .await?;
        let total_pages = rsp.total.div_ceil(self.page_size);
        Ok(SearchPage {
            books: rsp
                .items
                .into_iter()
                .filter_map(UpstreamItem::into_meta)
                .collect(),
            current_page: page,
            total_pages,
            total_results: rsp.total,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `/api/book-detail`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("catalog.lookups", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
struct BookDetailReq {
    isbn: String,
}

async fn book_detail(
    State(state): State<Arc<Bookden>>,
    Query(req): Query<BookDetailReq>,
) -> axum::response::Response {
    async fn book_detail1(state: &Bookden, req: &BookDetailReq) -> Result<BookMeta> {
        let isbn = Isbn::new(&req.isbn).context(ValidationSnafu)?;
        // Prefer our own record: it carries the same display metadata and spares the upstream a
        // round trip (and us their rate limiter)
        if let Ok(Some(book)) = state.storage.get_book(&isbn).await {
            return Ok(BookMeta {
                isbn: book.isbn().clone(),
                title: book.title().to_owned(),
                author: book.author().to_owned(),
                publisher: book.publisher().to_owned(),
                image: book.image().to_owned(),
            });
        }
        state
            .catalog
            .lookup(&isbn)
            .await?
            .context(UnknownIsbnSnafu { isbn })
    }

    match book_detail1(&state, &req).await {
        Ok(meta) => {
            counter_add!(state.instruments, "catalog.lookups", 1, &[]);
            (StatusCode::OK, Json(meta)).into_response()
        }
        Err(err) => {
            if !matches!(err, Error::UnknownIsbn { .. }) {
                error!("{:#?}", err);
            }
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `/api/search`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("catalog.searches", Sort::IntegralCounter) }

#[derive(Debug, Deserialize)]
struct SearchReq {
    query: String,
    #[serde(default)]
    sort: SearchSort,
    #[serde(default)]
    page: Option<u32>,
}

async fn search(
    State(state): State<Arc<Bookden>>,
    Query(req): Query<SearchReq>,
) -> axum::response::Response {
    match state
        .catalog
        .search(&req.query, req.sort, req.page.unwrap_or(1))
        .await
    {
        Ok(page) => {
            counter_add!(state.instruments, "catalog.searches", 1, &[]);
            (StatusCode::OK, Json(page)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            err.into_response()
        }
    }
}

/// Return a router for the catalog API
pub fn make_router(state: Arc<Bookden>) -> Router<Arc<Bookden>> {
    Router::new()
        .route("/api/book-detail", get(book_detail))
        .route("/api/search", get(search))
        .with_state(state)
}
