use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use ldapdict::directory::{DirectoryEntry, MemoryConnector, MemoryDirectory};
use ldapdict::server;
use ldapdict::{DictOptions, DictSettings, LdapDict};
use serde_json::Value as JsonValue;
use tower::ServiceExt;

const SETTINGS: &str = r#"
uri = "ldap://directory.test"
base_dn = "dc=example,dc=com"

[[map]]
pattern = "shared/quota/$user"
filter = "(uid=%{user})"
value_attribute = "quota"
attributes = ["user"]
"#;

fn setup() -> (Router, MemoryDirectory) {
    let connector = MemoryConnector::new();
    let directory = connector.directory("ldap://directory.test");
    let settings = DictSettings::from_toml_str(SETTINGS).expect("settings ok");
    let dict = LdapDict::open("dict.toml", settings, &DictOptions::new("svc"), &connector).expect("dict opens");
    (server::router(Arc::new(dict)), directory)
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, JsonValue) {
    let resp = app.oneshot(request).await.expect("router answers");
    let status = resp.status();
    let bytes = resp.into_body().collect().await.expect("collect body").to_bytes();
    let json: JsonValue = serde_json::from_slice(&bytes).expect("valid JSON response");
    (status, json)
}

fn get(key: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/v1/lookup?key={key}"))
        .body(Body::empty())
        .expect("request builds")
}

fn elapsed(json: &JsonValue) -> f64 {
    json.get("elapsed_ms").and_then(|v| v.as_f64()).expect("elapsed_ms")
}

#[tokio::test]
async fn overlapping_lookups_share_one_driver() {
    let (app, directory) = setup();
    directory
        .respond_after("(uid=alice)", Duration::from_millis(200), vec![DirectoryEntry::new("uid=alice").with("quota", &["100M"])])
        .respond_after("(uid=bob)", Duration::from_millis(10), vec![DirectoryEntry::new("uid=bob").with("quota", &["2G"])]);

    let ((slow_status, slow), (fast_status, fast), (missing_status, missing)) = tokio::join!(
        call(app.clone(), get("shared/quota/alice")),
        call(app.clone(), get("shared/quota/bob")),
        call(app.clone(), get("shared/unknown/carol")),
    );

    assert_eq!(slow_status, StatusCode::OK);
    assert_eq!(slow.get("status").and_then(|v| v.as_str()), Some("found"));
    assert_eq!(slow.get("value").and_then(|v| v.as_str()), Some("100M"));

    assert_eq!(fast_status, StatusCode::OK);
    assert_eq!(fast.get("value").and_then(|v| v.as_str()), Some("2G"));
    // the fast answer did not wait for the slow one
    assert!(elapsed(&fast) < elapsed(&slow), "fast {fast} slow {slow}");

    assert_eq!(missing_status, StatusCode::NOT_FOUND);
    assert_eq!(missing.get("status").and_then(|v| v.as_str()), Some("error"));
    assert!(missing.get("value").is_none());

    assert_eq!(directory.searches().len(), 2);
}

#[tokio::test]
async fn sequential_lookups_keep_working() {
    let (app, directory) = setup();
    directory.respond("(uid=alice)", vec![DirectoryEntry::new("uid=alice").with("quota", &["100M"])]);
    for _ in 0..3 {
        let (status, json) = call(app.clone(), get("shared/quota/alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.get("value").and_then(|v| v.as_str()), Some("100M"));
    }
    let (status, json) = call(app.clone(), get("shared/quota/nobody")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("not_found"));
}

#[tokio::test]
async fn failing_directory_is_a_bad_gateway() {
    let (app, directory) = setup();
    directory.fail("(uid=alice)", "server down");
    let (status, json) = call(app, get("shared/quota/alice")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json.get("error").and_then(|v| v.as_str()).expect("error text").contains("server down"));
}

#[tokio::test]
async fn set_is_not_implemented() {
    let (app, _directory) = setup();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/set")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"key":"shared/quota/alice","value":"1G"}"#))
        .expect("request builds");
    let (status, json) = call(app, request).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("error"));
}
