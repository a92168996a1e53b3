use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Form, Json, Router};
use rkinit::cloud::{CloudClient, CloudError, StsRequest, TokenExchange};
use rkinit::config::CloudConfig;
use serde_json::{Value, json};

const RANDOM_KEY: &str = "0123456789abcdef";

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn settings(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let nonce = headers
        .get("Terminus-Nonce")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !nonce.starts_with("appservice:") || nonce.len() <= "appservice:".len() {
        return (StatusCode::UNAUTHORIZED, Json(json!({"code": 401})));
    }
    if body["op"] != "getAccount" || body["data"] != "settings-account-space" {
        return (
            StatusCode::OK,
            Json(json!({"code": 1, "message": "unknown op"})),
        );
    }
    let value = json!({"email": "a@b.c", "userid": "u1", "token": "t1", "expired": 0});
    (
        StatusCode::OK,
        Json(json!({
            "code": 0,
            "message": "",
            "data": {"name": "settings-account-space", "value": value.to_string()}
        })),
    )
}

async fn sts(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
    if form.get("bucket").map(String::as_str) == Some("missing") {
        return Json(json!({"code": 404, "message": "bucket not found"}));
    }
    Json(json!({
        "code": 200,
        "message": "success",
        "data": {
            "cloud": "AWS",
            "bucket": form["bucket"],
            "st": format!("{}-next", form["st"]),
            "prefix": form["bucketPrefix"],
            "sk": format!("{}-next", form["sk"]),
            "ak": format!("{}-next", form["ak"]),
            "expiration": form["durationSeconds"],
            "region": form["clusterId"],
        }
    }))
}

async fn client() -> CloudClient {
    let app = Router::new()
        .route("/user-space-alice/api/account", post(settings))
        .route("/v1/resource/stsToken/setup", post(sts));
    let addr = serve(app).await;
    let cfg = CloudConfig {
        sts_url: format!("http://{addr}/v1/resource/stsToken/setup"),
        settings_url_template: format!("http://{addr}/user-space-{{admin}}/api/account"),
        ..Default::default()
    };
    CloudClient::new(cfg, Some(RANDOM_KEY.to_string()))
}

fn request(bucket: &str) -> StsRequest {
    StsRequest {
        cluster_id: "c-42".into(),
        access_key: "ak".into(),
        secret_key: "sk".into(),
        session_token: "st".into(),
        bucket: bucket.into(),
        prefix: "c-42".into(),
        duration_secs: 43200,
    }
}

#[tokio::test]
async fn settings_lookup_returns_admin_account() {
    let account = client().await.fetch_account("alice").await.unwrap();
    assert_eq!(account.userid, "u1");
    assert_eq!(account.token, "t1");
}

#[tokio::test]
async fn settings_lookup_of_unknown_admin_fails_on_status() {
    let err = client().await.fetch_account("bob").await.unwrap_err();
    assert!(matches!(err, CloudError::Status { status, .. } if status == StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn sts_exchange_posts_form() {
    let bundle = client().await.exchange(&request("olares")).await.unwrap();
    assert_eq!(bundle.access_key, "ak-next");
    assert_eq!(bundle.secret_key, "sk-next");
    assert_eq!(bundle.session_token, "st-next");
    assert_eq!(bundle.prefix, "c-42");
    assert_eq!(bundle.expiration, "43200");
    assert_eq!(bundle.region, "c-42");
}

#[tokio::test]
async fn sts_exchange_rejects_non_200_code() {
    let err = client().await.exchange(&request("missing")).await.unwrap_err();
    assert!(matches!(err, CloudError::Code { code: 404, ref message } if message == "bucket not found"));
}

#[tokio::test]
async fn settings_lookup_times_out() {
    let app = Router::new().route(
        "/user-space-slow/api/account",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({"code": 0}))
        }),
    );
    let addr = serve(app).await;
    let cfg = CloudConfig {
        settings_url_template: format!("http://{addr}/user-space-{{admin}}/api/account"),
        settings_timeout_secs: 1,
        ..Default::default()
    };
    let client = CloudClient::new(cfg, Some(RANDOM_KEY.to_string()));
    match client.fetch_account("slow").await {
        Err(CloudError::Http(e)) => assert!(e.is_timeout()),
        other => panic!("unexpected {other:?}"),
    }
}
