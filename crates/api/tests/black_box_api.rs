use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use agrotrack_api::app::{AppServices, build_router};
use agrotrack_auth::{HashCost, TokenClaims};
use agrotrack_core::UserId;
use agrotrack_infra::config::AppConfig;
use agrotrack_infra::rate_limit::RateLimitConfig;

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(RateLimitConfig::default()).await
    }

    async fn spawn_with(rate_limits: RateLimitConfig) -> Self {
        let config = AppConfig {
            jwt_secret: JWT_SECRET.to_string(),
            hash_cost: HashCost::minimal(),
            rate_limits,
            ..AppConfig::default()
        };
        // Same router as prod, in-memory stores, ephemeral port.
        let services = Arc::new(AppServices::in_memory(&config).expect("services"));
        let app = build_router(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a user and return `(user id, token)`.
    async fn register(&self, national_id: &str) -> (String, String) {
        let res = self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({ "name": "Rancher", "nationalId": national_id, "password": "secret-pass" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        (
            body["data"]["id"].as_str().unwrap().to_string(),
            body["data"]["token"].as_str().unwrap().to_string(),
        )
    }

    async fn create_animal(&self, token: &str, tag: &str) -> Value {
        let res = self
            .client
            .post(self.url("/animals"))
            .bearer_auth(token)
            .json(&animal_body(tag))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        body["data"].clone()
    }

    async fn create_production(&self, token: &str, animal_id: &str, kind: &str, quantity: f64) -> Value {
        let res = self
            .client
            .post(self.url("/production"))
            .bearer_auth(token)
            .json(&json!({ "animalId": animal_id, "kind": kind, "quantity": quantity }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        body["data"].clone()
    }

    async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn animal_body(tag: &str) -> Value {
    json!({
        "externalTag": tag,
        "breed": "Holstein",
        "birthDate": "2021-04-12",
        "sex": "Female",
        "weight": 450.5,
    })
}

fn mint_jwt(sub: UserId) -> String {
    let claims = TokenClaims::new(sub, Utc::now(), ChronoDuration::minutes(10));
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.client.get(srv.url("/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn missing_or_malformed_bearer_is_unauthenticated() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/animals")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let res = srv
        .client
        .get(srv.url("/animals"))
        .header("Authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.get("/animals", "not-a-jwt").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_token_for_vanished_identity_is_rejected() {
    let srv = TestServer::spawn().await;
    let res = srv.get("/animals", &mint_jwt(UserId::new())).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "user no longer exists");
}

#[tokio::test]
async fn register_login_and_profile() {
    let srv = TestServer::spawn().await;
    let (id, token) = srv.register("V-1001").await;

    let res = srv
        .client
        .post(srv.url("/auth/register"))
        .json(&json!({ "name": "Other", "nationalId": "V-1001", "password": "another-pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({ "nationalId": "V-1001", "password": "secret-pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["id"], id.as_str());

    for (nid, pw) in [("V-1001", "wrong-pass"), ("V-9999", "secret-pass")] {
        let res = srv
            .client
            .post(srv.url("/auth/login"))
            .json(&json!({ "nationalId": nid, "password": pw }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["message"], "invalid credentials");
    }

    let res = srv.get("/auth/profile", &token).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["nationalId"], "V-1001");
    assert!(body["data"].get("credentialHash").is_none());
}

#[tokio::test]
async fn animal_round_trip_is_owner_only() {
    let srv = TestServer::spawn().await;
    let (u1_id, u1) = srv.register("V-2001").await;
    let (_, u2) = srv.register("V-2002").await;

    let created = srv.create_animal(&u1, "G001").await;
    let id = created["id"].as_str().unwrap();
    assert_eq!(created["ownerId"], u1_id.as_str());
    assert_eq!(created["status"], "Active");

    let res = srv.get(&format!("/animals/{id}"), &u2).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert!(!body.to_string().contains(&u1_id));

    let res = srv.get(&format!("/animals/{id}"), &u1).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["externalTag"], "G001");
    assert_eq!(body["data"]["breed"], "Holstein");
    assert_eq!(body["data"]["sex"], "Female");
    assert_eq!(body["data"]["weight"], 450.5);

    let res = srv
        .client
        .put(srv.url(&format!("/animals/{id}")))
        .bearer_auth(&u2)
        .json(&json!({ "weight": 1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .client
        .delete(srv.url(&format!("/animals/{id}")))
        .bearer_auth(&u2)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv.get(&format!("/animals/{}", UserId::new()), &u1).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv.get("/animals/not-an-id", &u1).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn client_supplied_owner_is_ignored_and_owner_cannot_be_updated() {
    let srv = TestServer::spawn().await;
    let (u1_id, u1) = srv.register("V-3001").await;
    let (u2_id, _) = srv.register("V-3002").await;

    let mut body = animal_body("G010");
    body["ownerId"] = json!(u2_id);
    let res = srv
        .client
        .post(srv.url("/animals"))
        .bearer_auth(&u1)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["data"]["ownerId"], u1_id.as_str());
    let id = created["data"]["id"].as_str().unwrap();

    let res = srv
        .client
        .put(srv.url(&format!("/animals/{id}")))
        .bearer_auth(&u1)
        .json(&json!({ "ownerId": u2_id, "status": "Sold" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["data"]["ownerId"], u1_id.as_str());
    assert_eq!(updated["data"]["status"], "Sold");
}

#[tokio::test]
async fn production_ownership_is_derived_from_the_animal() {
    let srv = TestServer::spawn().await;
    let (_, u1) = srv.register("V-4001").await;
    let (_, u2) = srv.register("V-4002").await;

    let animal = srv.create_animal(&u1, "G100").await;
    let animal_id = animal["id"].as_str().unwrap();
    let record = srv.create_production(&u1, animal_id, "milk", 21.5).await;
    let record_id = record["id"].as_str().unwrap();
    assert_eq!(record["animal"]["externalTag"], "G100");

    let res = srv.get(&format!("/production/{record_id}"), &u2).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let res = srv.get(&format!("/production/{record_id}"), &u1).await;
    assert_eq!(res.status(), StatusCode::OK);

    // Attaching a record to someone else's animal.
    let res = srv
        .client
        .post(srv.url("/production"))
        .bearer_auth(&u2)
        .json(&json!({ "animalId": animal_id, "kind": "milk", "quantity": 3.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // No animal reference at all.
    let res = srv
        .client
        .post(srv.url("/production"))
        .bearer_auth(&u2)
        .json(&json!({ "kind": "milk", "quantity": 3.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .client
        .put(srv.url(&format!("/production/{record_id}")))
        .bearer_auth(&u2)
        .json(&json!({ "quantity": 0.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Deleting the animal takes its records with it.
    let res = srv
        .client
        .delete(srv.url(&format!("/animals/{animal_id}")))
        .bearer_auth(&u1)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = srv.get(&format!("/production/{record_id}"), &u1).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lists_are_owner_scoped_under_any_filter() {
    let srv = TestServer::spawn().await;
    let (u1_id, u1) = srv.register("V-5001").await;
    let (_, u2) = srv.register("V-5002").await;

    let a1 = srv.create_animal(&u1, "U1-A").await;
    srv.create_production(&u1, a1["id"].as_str().unwrap(), "milk", 10.0).await;
    let a2 = srv.create_animal(&u2, "U2-A").await;
    srv.create_production(&u2, a2["id"].as_str().unwrap(), "meat", 250.0).await;

    for query in ["", "?breed=Holstein", "?sex=Female&status=Active", "?sort=weight:asc"] {
        let res = srv.get(&format!("/animals{query}"), &u1).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["count"], 1);
        for a in body["data"].as_array().unwrap() {
            assert_eq!(a["ownerId"], u1_id.as_str());
        }
    }

    let res = srv.get("/animals", &u1).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"][0]["production"].as_array().unwrap().len(), 1);

    // Naming a foreign animal narrows to nothing instead of widening.
    let res = srv
        .get(&format!("/production?animalId={}", a2["id"].as_str().unwrap()), &u1)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["count"], 0);

    let res = srv.get("/production?kind=meat", &u1).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["count"], 0);

    let res = srv.get("/production", &u2).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["kind"], "meat");
}

#[tokio::test]
async fn unknown_sort_fields_are_rejected() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.register("V-5501").await;

    let res = srv.get("/animals?sort=ownerId:asc", &token).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = srv.get("/production?sort=quantity:sideways", &token).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn concurrent_duplicate_tags_yield_one_winner() {
    let srv = TestServer::spawn().await;
    let (_, u1) = srv.register("V-6001").await;
    let (_, u2) = srv.register("V-6002").await;

    let post = |token: String| {
        let client = srv.client.clone();
        let url = srv.url("/animals");
        async move {
            client
                .post(url)
                .bearer_auth(token)
                .json(&animal_body("RACE-1"))
                .send()
                .await
                .unwrap()
                .status()
        }
    };
    let (a, b) = tokio::join!(post(u1), post(u2));

    let mut statuses = [a, b];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::BAD_REQUEST]);
}

#[tokio::test]
async fn deep_or_large_payloads_are_rejected() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.register("V-7001").await;

    let mut deep = String::from("1");
    for _ in 0..11 {
        deep = format!("{{\"x\":{deep}}}");
    }
    let res = srv
        .client
        .post(srv.url("/animals"))
        .bearer_auth(&token)
        .header("Content-Type", "application/json")
        .body(deep)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let mut big = animal_body("BIG-1");
    big["notes"] = json!("x".repeat(101 * 1024));
    let res = srv
        .client
        .post(srv.url("/animals"))
        .bearer_auth(&token)
        .json(&big)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn general_tier_limits_the_101st_request() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.register("V-8001").await;
    let (_, other) = srv.register("V-8002").await;

    for i in 0..100 {
        let res = srv.get("/animals", &token).await;
        assert_eq!(res.status(), StatusCode::OK, "request {} was limited", i + 1);
        if i == 0 {
            assert_eq!(res.headers()["ratelimit-limit"], "100");
        }
    }

    let res = srv.get("/animals", &token).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["retryAfter"], 5);

    // Same IP, different identity: separate budget.
    let res = srv.get("/animals", &other).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_tier_is_keyed_by_ip() {
    let mut limits = RateLimitConfig::default();
    limits.auth.max = 2;
    limits.auth.window = Duration::from_secs(60);
    let srv = TestServer::spawn_with(limits).await;

    for _ in 0..2 {
        let res = srv
            .client
            .post(srv.url("/auth/login"))
            .json(&json!({ "nationalId": "nobody", "password": "whatever" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({ "nationalId": "nobody", "password": "whatever" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["retryAfter"], 1);
}

#[tokio::test]
async fn report_without_animals_is_empty_with_notice() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.register("V-9001").await;

    let res = srv.get("/production/report?period=monthly&kind=milk", &token).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["reporte"], json!([]));
    assert!(body["data"]["alerta"].is_string());
}

#[tokio::test]
async fn report_aggregates_only_owned_records() {
    let srv = TestServer::spawn().await;
    let (_, u1) = srv.register("V-9101").await;
    let (_, u2) = srv.register("V-9102").await;

    let a = srv.create_animal(&u1, "R-1").await;
    let b = srv.create_animal(&u1, "R-2").await;
    let foreign = srv.create_animal(&u2, "R-3").await;
    srv.create_production(&u1, a["id"].as_str().unwrap(), "milk", 10.0).await;
    srv.create_production(&u1, b["id"].as_str().unwrap(), "milk", 30.0).await;
    srv.create_production(&u2, foreign["id"].as_str().unwrap(), "milk", 999.0).await;

    let res = srv.get("/production/report?period=daily&kind=milk", &u1).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let rows = body["data"]["reporte"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["totalProduction"], 40.0);
    assert_eq!(rows[0]["animalCount"], 2);
    assert_eq!(rows[0]["averageProduction"], 20.0);
    assert!(body["data"]["alerta"].is_null());

    let res = srv.get("/production/report?period=yearly&kind=milk", &u1).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_method_on_known_route_uses_the_envelope() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .patch(srv.url("/auth/login"))
        .json(&json!({ "nationalId": "V-1", "password": "secret-pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let res = srv.client.get(srv.url("/auth/register")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);

    let (_, token) = srv.register("V-405").await;
    let res = srv
        .client
        .delete(srv.url("/animals"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn failed_authentication_counts_against_the_tier() {
    let mut limits = RateLimitConfig::default();
    limits.general.max = 3;
    let srv = TestServer::spawn_with(limits).await;
    let (_, token) = srv.register("V-8101").await;

    for _ in 0..3 {
        let res = srv.get("/animals", "garbage").await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    let res = srv.get("/animals", "garbage").await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["retryAfter"], 5);

    // The budget is per IP, so a valid token from the same address waits too.
    let res = srv.get("/animals", &token).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other tiers keep their own budget.
    let res = srv.get("/production", &token).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn profile_sits_behind_the_auth_tier() {
    let srv = TestServer::spawn().await;

    for i in 0..30 {
        let res = srv.get("/auth/profile", "garbage").await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "request {} was limited", i + 1);
    }

    let res = srv.get("/auth/profile", "garbage").await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["retryAfter"], 15);
}

#[tokio::test]
async fn successful_requests_do_not_spend_the_failure_budget() {
    let mut limits = RateLimitConfig::default();
    limits.general.max = 3;
    let srv = TestServer::spawn_with(limits).await;
    let (_, alice) = srv.register("V-8201").await;
    let (_, bob) = srv.register("V-8202").await;

    for _ in 0..3 {
        assert_eq!(srv.get("/animals", &alice).await.status(), StatusCode::OK);
    }
    // Alice has used her own budget; Bob and unauthenticated callers have not.
    assert_eq!(srv.get("/animals", &alice).await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(srv.get("/animals", &bob).await.status(), StatusCode::OK);
    assert_eq!(srv.get("/animals", "garbage").await.status(), StatusCode::UNAUTHORIZED);
}
