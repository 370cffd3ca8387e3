//! End-to-end tests: the portal router served on a local port, with Logto and
//! the Turing API played by one mock server.

use httpmock::prelude::*;
use portal_lib::{
    config::Config,
    web::{router, state::AppState},
};
use reqwest::{header, redirect::Policy, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Portal {
    base: String,
    client: reqwest::Client,
}

impl Portal {
    async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(format!("{}{}", self.base, path));
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        request.send().await.unwrap()
    }
}

async fn start_portal(upstream: &MockServer) -> Portal {
    let vars: HashMap<&str, String> = HashMap::from([
        ("BASE_URL", "http://portal.test".to_string()),
        ("TURING_API", upstream.base_url()),
        ("LOGTO_ENDPOINT", upstream.base_url()),
        ("LOGTO_APP_ID", "portal-app".to_string()),
        ("LOGTO_APP_SECRET", "portal-secret".to_string()),
        ("LOGTO_API_RESOURCE", "https://api.turing.test".to_string()),
        ("EXPIRY_REDIRECT_DELAY_MS", "10".to_string()),
    ]);
    let config = Config::from_lookup(|name| vars.get(name).cloned()).unwrap();
    let app_state = Arc::new(AppState::from_config(config).unwrap());
    let app = router(app_state).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Portal {
        base: format!("http://{}", addr),
        client: reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap(),
    }
}

async fn mock_identity(upstream: &MockServer) {
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/oidc/token");
            then.status(200).json_body(json!({
                "access_token": "api-token",
                "refresh_token": "refresh-1",
                "id_token": "id-1",
                "expires_in": 3600
            }));
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/oidc/me");
            then.status(200)
                .json_body(json!({ "sub": "user-1", "email": "ada@example.test" }));
        })
        .await;
}

/// Runs the sign-in round trip and returns the `name=value` session cookie.
async fn sign_in(portal: &Portal) -> String {
    let response = portal.get("/api/logto/sign-in?returnTo=/projects", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = reqwest::Url::parse(response.headers()[header::LOCATION].to_str().unwrap())
        .unwrap();
    let state = location
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let response = portal
        .get(
            &format!("/api/logto/sign-in-callback?code=abc&state={}", state),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/projects");
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

fn dataset_json(id: &str, filename: &str) -> Value {
    json!({
        "id": id,
        "filename": filename,
        "size": 120,
        "uploadedAt": "2024-03-01T12:00:00Z"
    })
}

#[tokio::test]
async fn protected_routes_require_a_session() {
    let upstream = MockServer::start_async().await;
    let portal = start_portal(&upstream).await;

    let response = portal.get("/api/projects", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = portal
        .get("/api/projects", Some("portal_session=not-a-session"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = portal.get("/api/logto/token", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let user: Value = portal.get("/api/logto/user", None).await.json().await.unwrap();
    assert_eq!(user["isAuthenticated"], false);
}

#[tokio::test]
async fn sign_in_redirects_to_logto_for_the_api_resource() {
    let upstream = MockServer::start_async().await;
    let portal = start_portal(&upstream).await;

    let response = portal.get("/api/logto/sign-in", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let location = reqwest::Url::parse(response.headers()[header::LOCATION].to_str().unwrap())
        .unwrap();
    assert_eq!(location.path(), "/oidc/auth");
    let params: HashMap<String, String> = location.query_pairs().into_owned().collect();
    assert_eq!(params["client_id"], "portal-app");
    assert_eq!(params["resource"], "https://api.turing.test");
    assert_eq!(
        params["redirect_uri"],
        "http://portal.test/api/logto/sign-in-callback"
    );
    assert!(params["scope"].contains("offline_access"));
}

#[tokio::test]
async fn callback_rejects_an_unknown_state() {
    let upstream = MockServer::start_async().await;
    let portal = start_portal(&upstream).await;

    let response = portal
        .get("/api/logto/sign-in-callback?code=abc&state=forged", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_in_user_gets_claims_token_and_projects() {
    let upstream = MockServer::start_async().await;
    mock_identity(&upstream).await;
    let projects = upstream
        .mock_async(|when, then| {
            when.method(GET)
                .path("/projects")
                .header("authorization", "Bearer api-token");
            then.status(200).json_body(json!([{
                "id": 7,
                "name": "Survey",
                "status": "running",
                "createdAt": "2024-03-01T12:00:00Z",
                "updatedAt": "2024-03-02T12:00:00Z",
                "datasetCount": 1
            }]));
        })
        .await;
    let portal = start_portal(&upstream).await;
    let cookie = sign_in(&portal).await;

    let user: Value = portal
        .get("/api/logto/user", Some(&cookie))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(user["isAuthenticated"], true);
    assert_eq!(user["claims"]["email"], "ada@example.test");

    let token: Value = portal
        .get("/api/logto/token", Some(&cookie))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(token["accessToken"], "api-token");

    let response = portal.get("/api/projects", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body[0]["id"], "7");
    assert_eq!(body[0]["statusLabel"], "Running");

    // Served from the query cache the second time.
    let response = portal.get("/api/projects/7", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    projects.assert_calls_async(1).await;

    let response = portal.get("/api/projects/8", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_backend_token_sends_the_browser_to_sign_out() {
    let upstream = MockServer::start_async().await;
    mock_identity(&upstream).await;
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/projects/p1/activities");
            then.status(401).body("Signature has expired");
        })
        .await;
    let portal = start_portal(&upstream).await;
    let cookie = sign_in(&portal).await;

    let response = portal.get("/api/projects/p1/activities", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/api/logto/sign-out");

    // The expiry notice marks the session, so every protected route now redirects.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = portal.get("/api/projects", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/api/logto/sign-out");

    // That redirect evicted the session; the stale cookie no longer finds one.
    let response = portal.get("/api/projects", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sign_out_drops_the_session() {
    let upstream = MockServer::start_async().await;
    mock_identity(&upstream).await;
    let portal = start_portal(&upstream).await;
    let cookie = sign_in(&portal).await;

    let response = portal.get("/api/logto/sign-out", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(&format!("{}/oidc/session/end", upstream.base_url())));
    assert!(location.contains("id_token_hint=id-1"));
    let cleared = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));

    let response = portal.get("/api/projects", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn upload_answers_with_a_pending_placeholder() {
    let upstream = MockServer::start_async().await;
    mock_identity(&upstream).await;
    upstream
        .mock_async(|when, then| {
            when.method(POST)
                .path("/uploads/")
                .header("tus-resumable", "1.0.0")
                .header("upload-length", "8");
            then.status(201).header("location", "/uploads/u1");
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(PATCH).path("/uploads/u1");
            then.status(204).header("upload-offset", "8");
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/projects/p1/files");
            then.status(200).json_body(json!([]));
        })
        .await;
    let portal = start_portal(&upstream).await;
    let cookie = sign_in(&portal).await;

    let body = "--XBOUNDARY\r\n\
                Content-Disposition: form-data; name=\"file\"; filename=\"data.csv\"\r\n\
                Content-Type: text/csv\r\n\
                \r\n\
                a,b\n1,2\n\r\n\
                --XBOUNDARY--\r\n";
    let response = portal
        .client
        .post(format!("{}/api/projects/p1/datasets", portal.base))
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["placeholder"]["filename"], "data.csv");
    assert_eq!(accepted["placeholder"]["size"], 8);
    assert_eq!(accepted["placeholder"]["pending"], true);

    // The backend has not listed the file yet, so the placeholder is shown.
    let listed: Value = portal
        .get("/api/projects/p1/datasets", Some(&cookie))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], accepted["placeholder"]["id"]);
}

#[tokio::test]
async fn finished_upload_leaves_only_the_confirmed_dataset() {
    let upstream = MockServer::start_async().await;
    mock_identity(&upstream).await;
    let started = chrono::Utc::now();
    upstream
        .mock_async(|when, then| {
            when.method(POST).path("/uploads/");
            then.status(201).header("location", "/uploads/u2");
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(PATCH).path("/uploads/u2");
            then.status(204)
                .header("upload-offset", "8")
                .delay(Duration::from_secs(3));
        })
        .await;
    // The backend dates the record well after the upload was accepted, but
    // close to when the slow transfer finished.
    let confirmed_at = (started + chrono::Duration::seconds(12)).to_rfc3339();
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/projects/p1/files");
            then.status(200).json_body(json!([{
                "id": "f9",
                "filename": "data.csv",
                "size": 8,
                "uploadedAt": confirmed_at
            }]));
        })
        .await;
    let portal = start_portal(&upstream).await;
    let cookie = sign_in(&portal).await;

    let body = "--XBOUNDARY\r\n\
                Content-Disposition: form-data; name=\"file\"; filename=\"data.csv\"\r\n\
                Content-Type: text/csv\r\n\
                \r\n\
                a,b\n1,2\n\r\n\
                --XBOUNDARY--\r\n";
    let response = portal
        .client
        .post(format!("{}/api/projects/p1/datasets", portal.base))
        .header(header::COOKIE, &cookie)
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: Value = response.json().await.unwrap();
    let placeholder_id = accepted["placeholder"]["id"].clone();

    // While the transfer runs both entries are listed.
    let listed: Value = portal
        .get("/api/projects/p1/datasets", Some(&cookie))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let mut listed = Value::Null;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        listed = portal
            .get("/api/projects/p1/datasets", Some(&cookie))
            .await
            .json()
            .await
            .unwrap();
        if listed.as_array().unwrap().len() == 1 {
            break;
        }
    }
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], "f9");
    assert_ne!(listed[0]["id"], placeholder_id);
    assert_eq!(listed[0]["pending"], false);
}

#[tokio::test]
async fn dataset_deletes_hide_entries_and_restore_them_on_failure() {
    let upstream = MockServer::start_async().await;
    mock_identity(&upstream).await;
    upstream
        .mock_async(|when, then| {
            when.method(GET).path("/projects/p1/files");
            then.status(200).json_body(json!([
                dataset_json("42", "keep.csv"),
                dataset_json("43", "stubborn.csv")
            ]));
        })
        .await;
    let deleted = upstream
        .mock_async(|when, then| {
            when.method(DELETE).path("/projects/p1/files/42");
            then.status(204);
        })
        .await;
    upstream
        .mock_async(|when, then| {
            when.method(DELETE).path("/projects/p1/files/43");
            then.status(500).body("disk on fire");
        })
        .await;
    let portal = start_portal(&upstream).await;
    let cookie = sign_in(&portal).await;

    let delete = |id: &str| {
        portal
            .client
            .delete(format!("{}/api/projects/p1/datasets/{}", portal.base, id))
            .header(header::COOKIE, &cookie)
            .send()
    };

    assert_eq!(delete("42").await.unwrap().status(), StatusCode::NO_CONTENT);
    deleted.assert_async().await;
    assert_eq!(delete("43").await.unwrap().status(), StatusCode::BAD_GATEWAY);

    // Never reached the backend: placeholders are removed locally.
    assert_eq!(
        delete("optimistic-unknown").await.unwrap().status(),
        StatusCode::NO_CONTENT
    );

    // The listing still returns 42, but the confirmed delete stays hidden until it disappears.
    let listed: Value = portal
        .get("/api/projects/p1/datasets", Some(&cookie))
        .await
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["43"]);
}
