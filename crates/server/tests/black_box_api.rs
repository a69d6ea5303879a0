use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use hive_auth::{AccessClaims, BcryptHasher, PermissionSeed, RbacSeed, RoleSeed, UserSeed};
use hive_core::UserId;
use hive_infra::config::Config;
use hive_server::context::{ProcessContext, ProcessRole};
use hive_server::worker::{UrlConnector, Worker};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    worker: Worker,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, on an ephemeral port with in-memory backends.
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: Some(0),
            jwt_secret: JWT_SECRET.to_string(),
            ..Config::default()
        };

        let mut seed = RbacSeed::builtin();
        seed.permissions.push(PermissionSeed::new("Report", "read"));
        seed.roles.push(RoleSeed::new("viewer", [("read", "User")]));
        seed.users.push(UserSeed::new("alice", "wonderland", ["viewer"]));

        let mut worker = Worker::new(
            ProcessContext::new(config, ProcessRole::Main),
            Arc::new(UrlConnector),
        )
        .with_seed(seed)
        .with_hasher(Arc::new(BcryptHasher::new(4)));
        worker.start().await.expect("worker failed to start");

        let addr = worker.local_addr().expect("worker is listening");
        Self {
            base_url: format!("http://{addr}"),
            worker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn login(client: &reqwest::Client, srv: &TestServer, username: &str, password: &str) -> String {
    let res = client
        .post(srv.url("/auth/token"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK, "login as {username} failed");
    let body: serde_json::Value = res.json().await.unwrap();
    body["access_token"].as_str().unwrap().to_string()
}

async fn check(client: &reqwest::Client, srv: &TestServer, token: &str, action: &str, subject: &str) -> bool {
    let res = client
        .get(srv.url("/authz/check"))
        .query(&[("action", action), ("subject", subject)])
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    body["granted"].as_bool().unwrap()
}

fn mint_jwt(secret: &str, sub: UserId, expires_in: ChronoDuration) -> String {
    let now = Utc::now();
    let claims = AccessClaims {
        sub,
        issued_at: now - ChronoDuration::minutes(1),
        expires_at: now + expires_in,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn health_is_public_and_whoami_is_not() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for (username, password) in [("alice", "wrong"), ("mallory", "wonderland")] {
        let res = client
            .post(srv.url("/auth/token"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "invalid_credentials");
    }
}

#[tokio::test]
async fn whoami_reports_the_token_subject() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = login(&client, &srv, "alice", "wonderland").await;

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["username"], "alice");
    assert_eq!(body["roles"], json!(["viewer"]));
}

#[tokio::test]
async fn viewer_reads_but_cannot_update_users() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = login(&client, &srv, "alice", "wonderland").await;

    assert!(check(&client, &srv, &token, "read", "User").await);
    assert!(!check(&client, &srv, &token, "update", "User").await);
    assert!(!check(&client, &srv, &token, "read", "Report").await);

    let res = client
        .get(srv.url("/authz/explain"))
        .query(&[("action", "update"), ("subject", "User")])
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["granted"], false);
    assert_eq!(body["denial"], "no_granting_role");

    let res = client
        .get(srv.url("/authz/explain"))
        .query(&[("action", "fly"), ("subject", "Plane")])
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["denial"], "unknown_permission");

    let res = client
        .put(srv.url("/users/alice/roles"))
        .bearer_auth(&token)
        .json(&json!({ "roles": ["user-admin"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn role_changes_take_effect_on_the_next_request() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, "superuser", "superuser").await;
    let alice = login(&client, &srv, "alice", "wonderland").await;

    let res = client
        .put(srv.url("/users/alice/roles"))
        .bearer_auth(&admin)
        .json(&json!({ "roles": ["no-such-role"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .put(srv.url("/users/alice/roles"))
        .bearer_auth(&admin)
        .json(&json!({ "roles": ["user-admin"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert!(check(&client, &srv, &alice, "update", "User").await);

    let res = client
        .put(srv.url("/users/alice/roles"))
        .bearer_auth(&admin)
        .json(&json!({ "roles": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert!(!check(&client, &srv, &alice, "read", "User").await);
}

#[tokio::test]
async fn deleted_user_loses_token_and_login() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, "superuser", "superuser").await;
    let alice = login(&client, &srv, "alice", "wonderland").await;

    let res = client
        .delete(srv.url("/users/alice"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(srv.url("/whoami")).bearer_auth(&alice).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/auth/token"))
        .json(&json!({ "username": "alice", "password": "wonderland" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .delete(srv.url("/users/alice"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forged_and_expired_tokens_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = login(&client, &srv, "alice", "wonderland").await;

    let res = client.get(srv.url("/whoami")).bearer_auth(&token).send().await.unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    let alice_id: UserId = body["id"].as_str().unwrap().parse().unwrap();

    let forged = mint_jwt("not-the-secret", alice_id, ChronoDuration::minutes(10));
    let res = client.get(srv.url("/whoami")).bearer_auth(forged).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let expired = mint_jwt(JWT_SECRET, alice_id, ChronoDuration::seconds(-30));
    let res = client.get(srv.url("/whoami")).bearer_auth(expired).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let valid = mint_jwt(JWT_SECRET, alice_id, ChronoDuration::minutes(10));
    let res = client.get(srv.url("/whoami")).bearer_auth(valid).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn stream_delivers_user_notifications() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, "superuser", "superuser").await;

    let mut stream = client
        .get(srv.url("/stream"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    let res = client
        .delete(srv.url("/users/alice"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let mut received = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !received.contains("user.deleted") {
        let chunk = tokio::time::timeout_at(deadline, stream.chunk())
            .await
            .expect("no notification within timeout")
            .unwrap()
            .expect("stream ended early");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert!(received.contains("event: user.deleted"));
    assert!(received.contains("\"username\":\"alice\""));
}

#[tokio::test]
async fn stop_ends_open_streams_and_closes_the_listener() {
    let mut srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, "superuser", "superuser").await;

    let mut stream = client
        .get(srv.url("/stream"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(15), srv.worker.stop())
        .await
        .expect("stop did not complete");

    // The stream drains and ends instead of hanging.
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.chunk().await {
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
    })
    .await;
    assert!(ended.is_ok());

    let fresh = reqwest::Client::new();
    assert!(fresh.get(srv.url("/health")).send().await.is_err());
}
