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

//! End-to-end exercises of the bookden API: real routers, real middleware, the in-process store,
//! and a canned catalog.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use bookden::{
    accounts::make_router as make_accounts_router,
    authn::{authenticate, mint_token},
    catalog::{make_router as make_catalog_router, BookMeta, Catalog, SearchPage, SearchSort},
    entities::{Isbn, Shelf},
    http::Bookden,
    memory::Memory,
    metrics::Instruments,
    notifications::make_router as make_notifications_router,
    reviews::make_router as make_reviews_router,
    shelves::make_router as make_shelves_router,
    stats::IsbnLocks,
};

const ISSUER: &str = "https://id.example.com";
const SECRET: &[u8] = b"an-adequately-long-test-secret";
const ISBN: &str = "9783161484100";
const OTHER_ISBN: &str = "9780262510875";

/// A catalog that knows exactly two books
struct CannedCatalog;

#[async_trait]
impl Catalog for CannedCatalog {
    async fn lookup(
        &self,
        isbn: &Isbn,
    ) -> Result<Option<BookMeta>, bookden::catalog::Error> {
        Ok([ISBN, OTHER_ISBN]
            .contains(&isbn.as_ref())
            .then(|| BookMeta {
                isbn: isbn.clone(),
                title: "SICP".to_owned(),
                author: "Abelson".to_owned(),
                publisher: "MIT".to_owned(),
                image: "".to_owned(),
            }))
    }
    async fn search(
        &self,
        _query: &str,
        _sort: SearchSort,
        page: u32,
    ) -> Result<SearchPage, bookden::catalog::Error> {
        let isbn = Isbn::new(ISBN).unwrap();
        Ok(SearchPage {
            books: vec![BookMeta {
                isbn,
                title: "SICP".to_owned(),
                author: "Abelson".to_owned(),
                publisher: "MIT".to_owned(),
                image: "".to_owned(),
            }],
            current_page: page,
            total_pages: 1,
            total_results: 1,
        })
    }
}

fn key() -> Hmac<Sha256> {
    Hmac::new_from_slice(SECRET).unwrap()
}

fn app() -> Router {
    let state = Arc::new(Bookden {
        storage: Arc::new(Memory::new()),
        catalog: Arc::new(CannedCatalog),
        locks: IsbnLocks::new(),
        instruments: Instruments::new("bookden"),
        registry: prometheus::Registry::new(),
        token_key: key(),
        token_issuer: ISSUER.to_owned(),
    });
    Router::new()
        .merge(make_catalog_router(state.clone()))
        .merge(make_reviews_router(state.clone()))
        .merge(make_notifications_router(state.clone()))
        .merge(make_accounts_router(state.clone()))
        .nest(
            "/api/wishlist",
            make_shelves_router(state.clone(), Shelf::Wishlist),
        )
        .nest(
            "/api/reading",
            make_shelves_router(state.clone(), Shelf::Reading),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        .with_state(state)
}

fn token(sub: &str) -> String {
    mint_token(&key(), ISSUER, sub, "a@b.c", sub, true, 300).unwrap()
}

fn unverified_token(sub: &str) -> String {
    mint_token(&key(), ISSUER, sub, "a@b.c", sub, false, 300).unwrap()
}

fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(rsp: axum::response::Response) -> Value {
    let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn submit_review(app: &Router, user: &str, rating: u8) -> Value {
    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-submit",
            Some(&token(user)),
            Some(json!({"isbn": ISBN, "rating": rating, "comment": "fine work"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    body_json(rsp).await
}

#[tokio::test]
async fn submit_requires_a_verified_account() {
    let app = app();

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-submit",
            None,
            Some(json!({"isbn": ISBN, "rating": 4, "comment": "x"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::UNAUTHORIZED);

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-submit",
            Some(&unverified_token("userA")),
            Some(json!({"isbn": ISBN, "rating": 4, "comment": "x"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn submit_then_list() {
    let app = app();
    let body = submit_review(&app, "userA", 4).await;
    assert_eq!(body["reviewId"], format!("userA_{}", ISBN));
    assert_eq!(body["reviewCount"], 1);
    assert_eq!(body["ratingSum"], 4);
    assert_eq!(body["averageRating"], 4.0);

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/reviews?isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    let body = body_json(rsp).await;
    assert_eq!(body["reviewCount"], 1);
    let reviews = body["reviews"].as_array().unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0]["userId"], "userA");
    assert_eq!(reviews[0]["rating"], 4);
}

#[tokio::test]
async fn duplicate_submission_is_rejected() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-submit",
            Some(&token("userA")),
            Some(json!({"isbn": ISBN, "rating": 5, "comment": "again"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(rsp).await;
    assert!(body["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn unknown_isbn_is_a_client_error() {
    let app = app();
    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-submit",
            Some(&token("userA")),
            Some(json!({"isbn": "9999999999999", "rating": 4, "comment": "x"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn edit_rederives_the_delta_server_side() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    submit_review(&app, "userB", 2).await;

    // the claimed old rating is wrong on purpose; the stored value must win
    let rsp = app
        .clone()
        .oneshot(request(
            "PUT",
            "/api/review-edit",
            Some(&token("userA")),
            Some(json!({
                "reviewId": format!("userA_{}", ISBN),
                "newRating": 5,
                "newComment": "even better on re-read",
                "oldRating": 1,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/reviews?isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert_eq!(body["reviewCount"], 2);
    assert_eq!(body["averageRating"], 3.5);
}

#[tokio::test]
async fn only_the_author_may_edit_or_delete() {
    let app = app();
    submit_review(&app, "userA", 4).await;

    let rsp = app
        .clone()
        .oneshot(request(
            "PUT",
            "/api/review-edit",
            Some(&token("userB")),
            Some(json!({
                "reviewId": format!("userA_{}", ISBN),
                "newRating": 1,
                "newComment": "vandalism",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::FORBIDDEN);

    let rsp = app
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/review-delete?reviewId=userA_{}", ISBN),
            Some(&token("userB")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn delete_backs_the_review_out_of_the_statistics() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    submit_review(&app, "userB", 2).await;

    let rsp = app
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/review-delete?reviewId=userB_{}&deletedRating=2", ISBN),
            Some(&token("userB")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/reviews?isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert_eq!(body["reviewCount"], 1);
    assert_eq!(body["averageRating"], 4.0);
}

#[tokio::test]
async fn like_toggles_and_self_like_is_rejected() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    let review_id = format!("userA_{}", ISBN);

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-like",
            Some(&token("userB")),
            Some(json!({"reviewId": review_id, "userId": "userB"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    let body = body_json(rsp).await;
    assert_eq!(body["likes"], json!(["userB"]));

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-like",
            Some(&token("userB")),
            Some(json!({"reviewId": review_id})),
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert_eq!(body["likes"], json!([]));

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-like",
            Some(&token("userA")),
            Some(json!({"reviewId": review_id})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn replies_notify_the_review_author() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    let review_id = format!("userA_{}", ISBN);

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-reply",
            Some(&token("userB")),
            Some(json!({"reviewId": review_id, "content": "disagree"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    let rsp = app
        .clone()
        .oneshot(request("GET", "/api/notifications", Some(&token("userA")), None))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    let notifications = body["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0]["message"]
        .as_str()
        .unwrap()
        .contains("disagree"));
    let notification_id = notifications[0]["notificationId"].as_str().unwrap().to_owned();

    // only the target may dismiss
    let rsp = app
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/notification-dismiss?notificationId={}", notification_id),
            Some(&token("userB")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::FORBIDDEN);

    let rsp = app
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/notification-dismiss?notificationId={}", notification_id),
            Some(&token("userA")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    let rsp = app
        .clone()
        .oneshot(request("GET", "/api/notifications", Some(&token("userA")), None))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert!(body["notifications"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn replying_to_your_own_review_stays_quiet() {
    let app = app();
    submit_review(&app, "userA", 4).await;

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/review-reply",
            Some(&token("userA")),
            Some(json!({"reviewId": format!("userA_{}", ISBN), "content": "addendum"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    let rsp = app
        .clone()
        .oneshot(request("GET", "/api/notifications", Some(&token("userA")), None))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert!(body["notifications"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_review_cascades_to_its_replies() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    let review_id = format!("userA_{}", ISBN);

    app.clone()
        .oneshot(request(
            "POST",
            "/api/review-reply",
            Some(&token("userB")),
            Some(json!({"reviewId": review_id, "content": "disagree"})),
        ))
        .await
        .unwrap();

    app.clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/review-delete?reviewId={}", review_id),
            Some(&token("userA")),
            None,
        ))
        .await
        .unwrap();

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/reviews?isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert!(body["reviews"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn shelves_toggle_independently() {
    let app = app();

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/wishlist/toggle",
            Some(&token("userA")),
            Some(json!({"isbn": ISBN})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    let body = body_json(rsp).await;
    assert_eq!(body, json!({"isWished": true}));

    // same book, other shelf, untouched
    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/reading/check?userId=userA&isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert_eq!(body, json!({"isReading": false}));

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            "/api/wishlist/my",
            Some(&token("userA")),
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    let books = body["books"].as_array().unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0]["isbn"], ISBN);
    assert_eq!(books[0]["title"], "SICP");

    // toggling again removes it
    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/wishlist/toggle",
            Some(&token("userA")),
            Some(json!({"isbn": ISBN})),
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert_eq!(body, json!({"isWished": false}));
}

/// A book the catalog doesn't know can still be shelved from client-supplied display fields
#[tokio::test]
async fn shelf_toggle_accepts_client_supplied_metadata() {
    let app = app();
    let uncatalogued = "9780131103627";

    // no local record, no catalog entry, no fields: nothing to build an entry from
    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/wishlist/toggle",
            Some(&token("userA")),
            Some(json!({"isbn": uncatalogued})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);

    let rsp = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/wishlist/toggle",
            Some(&token("userA")),
            Some(json!({
                "isbn": uncatalogued,
                "title": "The C Programming Language",
                "author": "Kernighan"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    let body = body_json(rsp).await;
    assert_eq!(body, json!({"isWished": true}));

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            "/api/wishlist/my",
            Some(&token("userA")),
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    let books = body["books"].as_array().unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0]["title"], "The C Programming Language");
    assert_eq!(books[0]["author"], "Kernighan");
    assert_eq!(books[0]["image"], "");
}

#[tokio::test]
async fn search_and_book_detail() {
    let app = app();

    let rsp = app
        .clone()
        .oneshot(request("GET", "/api/search?query=sicp", None, None))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    let body = body_json(rsp).await;
    assert_eq!(body["totalResults"], 1);
    assert_eq!(body["books"][0]["title"], "SICP");

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/book-detail?isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    let body = body_json(rsp).await;
    assert_eq!(body["title"], "SICP");

    let rsp = app
        .clone()
        .oneshot(request("GET", "/api/book-detail?isbn=9999999999999", None, None))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn account_deletion_fans_out() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    submit_review(&app, "userB", 2).await;

    // userA also shelves a book and replies to userB's review
    app.clone()
        .oneshot(request(
            "POST",
            "/api/wishlist/toggle",
            Some(&token("userA")),
            Some(json!({"isbn": OTHER_ISBN})),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(request(
            "POST",
            "/api/review-reply",
            Some(&token("userA")),
            Some(json!({"reviewId": format!("userB_{}", ISBN), "content": "hm"})),
        ))
        .await
        .unwrap();

    let rsp = app
        .clone()
        .oneshot(request(
            "DELETE",
            "/api/delete-account",
            Some(&token("userA")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    // userA's review is gone & the aggregate reflects only userB's
    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/reviews?isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert_eq!(body["reviewCount"], 1);
    assert_eq!(body["averageRating"], 2.0);
    let reviews = body["reviews"].as_array().unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0]["userId"], "userB");
    // userA's reply under userB's review went with the account
    assert!(reviews[0]["replies"].as_array().unwrap().is_empty());

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            "/api/wishlist/my",
            Some(&token("userA")),
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    assert!(body["books"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn nickname_update_restamps_content() {
    let app = app();
    submit_review(&app, "userA", 4).await;
    app.clone()
        .oneshot(request(
            "POST",
            "/api/review-reply",
            Some(&token("userA")),
            Some(json!({"reviewId": format!("userA_{}", ISBN), "content": "addendum"})),
        ))
        .await
        .unwrap();

    let rsp = app
        .clone()
        .oneshot(request(
            "PUT",
            "/api/update-nickname",
            Some(&token("userA")),
            Some(json!({"newNickname": "bookworm"})),
        ))
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    let rsp = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/reviews?isbn={}", ISBN),
            None,
            None,
        ))
        .await
        .unwrap();
    let body = body_json(rsp).await;
    let reviews = body["reviews"].as_array().unwrap();
    assert_eq!(reviews[0]["nickname"], "bookworm");
    assert_eq!(reviews[0]["replies"][0]["nickname"], "bookworm");
}
