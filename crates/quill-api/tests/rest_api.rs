//! REST surface tests over in-memory ports: round trips, conditional GET,
//! quota enforcement, tenant isolation, credential management.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use quill_api::{routes, AppState};
use quill_auth::{digest_key, generate_api_key};
use quill_config::AppConfig;
use quill_hub::LocalBus;
use quill_index::HashEmbedder;
use quill_quota::MemoryQuota;
use quill_store::MemoryStore;
use quill_types::{ApiKeyStore, Role};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestBed {
    router: Router,
    store: Arc<MemoryStore>,
    _snapshots: tempfile::TempDir,
}

async fn testbed(requests_per_minute: u64) -> (TestBed, String) {
    let snapshots = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.snapshot_dir = snapshots.path().to_path_buf();
    config.quotas.requests_per_minute = requests_per_minute;

    let store = Arc::new(MemoryStore::new());
    store.seed_tenant("org1", "Acme", None);
    store.seed_user("u-owner", "org1", "owner@acme.test", Role::Owner);
    store.seed_user("u-viewer", "org1", "viewer@acme.test", Role::Viewer);

    let state = AppState::assemble(
        config,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(MemoryQuota::new()),
        Arc::new(LocalBus::new()),
        Arc::new(HashEmbedder::new(32)),
    )
    .unwrap();

    let api_key = mint_key(&store, "org1").await;
    (
        TestBed {
            router: routes::rest_router(state),
            store,
            _snapshots: snapshots,
        },
        api_key,
    )
}

async fn mint_key(store: &MemoryStore, org_id: &str) -> String {
    let secret = generate_api_key();
    store
        .create_key(org_id, "test", &digest_key(&secret), None)
        .await
        .unwrap();
    secret
}

fn request(method: Method, uri: &str, api_key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    match body {
        Some(value) => {
            let bytes = value.to_string();
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_LENGTH, bytes.len())
                .body(Body::from(bytes))
                .unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_get_patch_round_trip() {
    let (bed, key) = testbed(1000).await;

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/notes",
            Some(&key),
            Some(json!({"title": "T", "body": "B"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let note_id = created["note_id"].as_str().unwrap().to_string();
    assert_eq!(created["version"], 1);

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/v1/notes/{note_id}"),
            Some(&key),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["title"], "T");
    assert_eq!(fetched["body"], "B");
    assert_eq!(fetched["version"], 1);

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/v1/notes/{note_id}"),
            Some(&key),
            Some(json!({"title": "T2"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["version"], 2);

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/v1/notes/{note_id}"),
            Some(&key),
            None,
        ))
        .await
        .unwrap();
    let fetched = body_json(response).await;
    assert_eq!(fetched["title"], "T2");
    assert_eq!(fetched["body"], "B");
    assert_eq!(fetched["version"], 2);
}

#[tokio::test]
async fn conditional_get_returns_304_on_matching_etag() {
    let (bed, key) = testbed(1000).await;

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/notes",
            Some(&key),
            Some(json!({"title": "T", "body": "B"})),
        ))
        .await
        .unwrap();
    let note_id = body_json(response).await["note_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/v1/notes/{note_id}"),
            Some(&key),
            None,
        ))
        .await
        .unwrap();
    let etag = response
        .headers()
        .get(header::ETAG)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(etag, "W/\"1\"");

    let mut conditional = request(
        Method::GET,
        &format!("/v1/notes/{note_id}"),
        Some(&key),
        None,
    );
    conditional
        .headers_mut()
        .insert(header::IF_NONE_MATCH, etag.parse().unwrap());
    let response = bed.router.clone().oneshot(conditional).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn stale_if_match_patch_reports_current_version() {
    let (bed, key) = testbed(1000).await;

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/notes",
            Some(&key),
            Some(json!({"title": "T", "body": "B"})),
        ))
        .await
        .unwrap();
    let note_id = body_json(response).await["note_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Bump to version 2
    bed.router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/v1/notes/{note_id}"),
            Some(&key),
            Some(json!({"body": "B2"})),
        ))
        .await
        .unwrap();

    let mut guarded = request(
        Method::PATCH,
        &format!("/v1/notes/{note_id}"),
        Some(&key),
        Some(json!({"title": "stale"})),
    );
    guarded
        .headers_mut()
        .insert(header::IF_MATCH, "W/\"1\"".parse().unwrap());
    let response = bed.router.clone().oneshot(guarded).await.unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "version-mismatch");
    assert_eq!(body["error"]["current_version"], 2);
}

#[tokio::test]
async fn quota_denies_the_third_request_with_headers() {
    let (bed, key) = testbed(2).await;

    for _ in 0..2 {
        let response = bed
            .router
            .clone()
            .oneshot(request(Method::GET, "/v1/notes", Some(&key), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = bed
        .router
        .clone()
        .oneshot(request(Method::GET, "/v1/notes", Some(&key), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(
        response.headers().get("x-ratelimit-limit").unwrap(),
        "2"
    );
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "0"
    );
    assert!(response.headers().contains_key("x-ratelimit-bytesremaining"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "quota-exceeded");
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let (bed, _key) = testbed(1000).await;

    let response = bed
        .router
        .clone()
        .oneshot(request(Method::GET, "/v1/notes", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthenticated");
}

#[tokio::test]
async fn health_probe_is_public() {
    let (bed, _key) = testbed(1000).await;
    let response = bed
        .router
        .clone()
        .oneshot(request(Method::GET, "/healthz", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let (bed, key_one) = testbed(1000).await;
    bed.store.seed_tenant("org2", "Rival", None);
    bed.store
        .seed_user("u2-owner", "org2", "owner@rival.test", Role::Owner);
    let key_two = mint_key(&bed.store, "org2").await;

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/notes",
            Some(&key_one),
            Some(json!({"title": "secret plan", "body": "pricing"})),
        ))
        .await
        .unwrap();
    let note_id = body_json(response).await["note_id"]
        .as_str()
        .unwrap()
        .to_string();

    // The other tenant's key sees 404, not 403: existence is not revealed
    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/v1/notes/{note_id}"),
            Some(&key_two),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/search",
            Some(&key_two),
            Some(json!({"query": "secret plan\n\npricing"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["results"], json!([]));
}

#[tokio::test]
async fn search_surfaces_the_matching_note_first() {
    let (bed, key) = testbed(1000).await;

    let fruit = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/notes",
            Some(&key),
            Some(json!({"title": "apples and oranges", "body": "fruit basket"})),
        ))
        .await
        .unwrap();
    let fruit_id = body_json(fruit).await["note_id"].as_str().unwrap().to_string();

    bed.router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/notes",
            Some(&key),
            Some(json!({"title": "bicycle repair", "body": "chain and gears"})),
        ))
        .await
        .unwrap();

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/search",
            Some(&key),
            Some(json!({"query": "apples and oranges\n\nfruit basket", "top_k": 2})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["note_id"], Value::String(fruit_id));
    assert!(results[0]["similarity"].as_f64().unwrap() >= results[1]["similarity"].as_f64().unwrap());
    assert!(results[0].get("snippet").is_some());
}

#[tokio::test]
async fn validation_errors_are_bad_requests() {
    let (bed, key) = testbed(1000).await;

    for uri in ["/v1/notes?limit=0", "/v1/notes?limit=2000", "/v1/notes?skip=-1"] {
        let response = bed
            .router
            .clone()
            .oneshot(request(Method::GET, uri, Some(&key), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/search",
            Some(&key),
            Some(json!({"query": "x", "top_k": 101})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/search",
            Some(&key),
            Some(json!({"query": "   "})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn soft_delete_is_terminal() {
    let (bed, key) = testbed(1000).await;

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/notes",
            Some(&key),
            Some(json!({"title": "T", "body": "B"})),
        ))
        .await
        .unwrap();
    let note_id = body_json(response).await["note_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::DELETE,
            &format!("/v1/notes/{note_id}"),
            Some(&key),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["deleted"], true);

    for method in [Method::GET, Method::DELETE] {
        let response = bed
            .router
            .clone()
            .oneshot(request(
                method,
                &format!("/v1/notes/{note_id}"),
                Some(&key),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/search",
            Some(&key),
            Some(json!({"query": "T\n\nB"})),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["results"], json!([]));
}

#[tokio::test]
async fn api_key_lifecycle_and_role_enforcement() {
    let (bed, owner_key) = testbed(1000).await;

    // Create: the secret appears exactly once
    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/api-keys",
            Some(&owner_key),
            Some(json!({"name": "ci"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let secret = created["api_key"].as_str().unwrap().to_string();
    let key_id = created["key_id"].as_str().unwrap().to_string();
    assert!(secret.starts_with("qk_"));

    // The minted key authenticates
    let response = bed
        .router
        .clone()
        .oneshot(request(Method::GET, "/v1/notes", Some(&secret), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Listing never exposes secrets or digests
    let response = bed
        .router
        .clone()
        .oneshot(request(Method::GET, "/v1/api-keys", Some(&owner_key), None))
        .await
        .unwrap();
    let listed = body_json(response).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    for entry in listed {
        assert!(entry.get("api_key").is_none());
        assert!(entry.get("digest").is_none());
    }

    // A viewer bearer token cannot manage keys
    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/auth/token",
            Some(&owner_key),
            Some(json!({"email": "viewer@acme.test"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    let mut forbidden = request(
        Method::POST,
        "/v1/api-keys",
        None,
        Some(json!({"name": "sneaky"})),
    );
    forbidden.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    let response = bed.router.clone().oneshot(forbidden).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Delete
    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::DELETE,
            &format!("/v1/api-keys/{key_id}"),
            Some(&owner_key),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["deleted"], true);

    let response = bed
        .router
        .clone()
        .oneshot(request(Method::GET, "/v1/notes", Some(&secret), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_rebuild_reports_the_indexed_count() {
    let (bed, key) = testbed(1000).await;

    for i in 0..3 {
        bed.router
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/notes",
                Some(&key),
                Some(json!({"title": format!("note {i}"), "body": "text"})),
            ))
            .await
            .unwrap();
    }

    let response = bed
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/v1/admin/search/rebuild",
            Some(&key),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["indexed"], 3);
}

#[tokio::test]
async fn usage_is_recorded_for_authenticated_requests() {
    let (bed, key) = testbed(1000).await;

    bed.router
        .clone()
        .oneshot(request(Method::GET, "/v1/notes", Some(&key), None))
        .await
        .unwrap();

    let mut recorded = Vec::new();
    for _ in 0..100 {
        recorded = bed.store.usage_records();
        if !recorded.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(!recorded.is_empty());
    assert_eq!(recorded[0].org_id, "org1");
    assert_eq!(recorded[0].endpoint, "/v1/notes");
}
