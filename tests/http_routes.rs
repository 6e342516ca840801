mod common;

use actix_web::{App, http::StatusCode, test, web};
use serde_json::{Value, json};

use common::{ADMIN_KEY, Harness, READER_KEY};
use erp_gateway_server::{configure_public_routes, configure_routes};

macro_rules! app {
    ($harness:expr) => {{
        let harness = $harness;
        test::init_service(
            App::new()
                .app_data(web::Data::new(harness.dispatcher))
                .app_data(web::Data::from(harness.jwt))
                .configure(configure_public_routes)
                .configure(configure_routes),
        )
        .await
    }};
}

#[actix_web::test]
async fn health_bypasses_authentication() {
    let app = app!(Harness::builder().build());
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cache"]["backend"], "memory");
}

#[actix_web::test]
async fn rest_read_maps_statuses() {
    let app = app!(Harness::builder().build());

    let req = test::TestRequest::get().uri("/resources/invoices/INV-001").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/resources/invoices/INV-001")
        .insert_header(("X-API-Key", READER_KEY))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"], "miss");
    assert_eq!(body["payload"]["id"], "INV-001");

    let req = test::TestRequest::get()
        .uri("/resources/ledgers")
        .insert_header(("X-API-Key", READER_KEY))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri("/resources/invoices?limit=abc")
        .insert_header(("X-API-Key", READER_KEY))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/tools/delete_invoice")
        .insert_header(("Authorization", format!("ApiKey {}", READER_KEY)))
        .set_json(json!({"invoice_id": "INV-001"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn rate_limited_response_carries_retry_after() {
    let app = app!(Harness::builder().per_minute(1).build());
    let read = || {
        test::TestRequest::get()
            .uri("/resources/customers")
            .insert_header(("X-API-Key", READER_KEY))
            .to_request()
    };

    assert_eq!(test::call_service(&app, read()).await.status(), StatusCode::OK);
    let resp = test::call_service(&app, read()).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("Retry-After"));
}

#[actix_web::test]
async fn protocol_endpoint_reads_resources_by_uri() {
    let app = app!(Harness::builder().build());

    let req = test::TestRequest::post()
        .uri("/mcp/request")
        .set_json(json!({"method": "initialize", "id": 1}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "1.0");

    let req = test::TestRequest::post()
        .uri("/mcp/request")
        .insert_header(("X-API-Key", ADMIN_KEY))
        .set_json(json!({"method": "readResource", "params": {"uri": "erp://invoices/INV-002"}, "id": "r1"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"], "miss");
    let text = body["result"]["contents"][0]["text"].as_str().unwrap();
    let invoice: Value = serde_json::from_str(text).unwrap();
    assert_eq!(invoice["id"], "INV-002");

    let req = test::TestRequest::post()
        .uri("/mcp/request")
        .insert_header(("X-API-Key", ADMIN_KEY))
        .set_json(json!({"method": "dropTables", "id": 2}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["kind"], "unknown_operation");
}

#[actix_web::test]
async fn token_exchange_requires_static_key() {
    let app = app!(Harness::builder().build());

    let req = test::TestRequest::post()
        .uri("/auth/token")
        .insert_header(("X-API-Key", READER_KEY))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let token = body["access_token"].as_str().unwrap().to_string();
    assert_eq!(body["token_type"], "Bearer");

    let req = test::TestRequest::get()
        .uri("/tools")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // A signed token cannot mint further tokens
    let req = test::TestRequest::post()
        .uri("/auth/token")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn capabilities_count_as_one_request() {
    let app = app!(Harness::builder().per_minute(2).build());
    let capabilities = || {
        test::TestRequest::get()
            .uri("/capabilities")
            .insert_header(("X-API-Key", READER_KEY))
            .to_request()
    };

    let resp = test::call_service(&app, capabilities()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["server"]["protocolVersion"], "1.0");
    assert!(body["resources"].as_array().is_some());

    assert_eq!(test::call_service(&app, capabilities()).await.status(), StatusCode::OK);
    assert_eq!(
        test::call_service(&app, capabilities()).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[actix_web::test]
async fn metrics_are_exposed_for_prometheus() {
    let app = app!(Harness::builder().build());

    let req = test::TestRequest::get()
        .uri("/resources/invoices/INV-001")
        .insert_header(("X-API-Key", READER_KEY))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains(r#"erp_gateway_requests_total{operation="resource:invoices",outcome="ok"} 1"#));
    assert!(body.contains(r#"erp_gateway_cache_lookups_total{result="miss"} 1"#));
    assert!(body.contains("erp_gateway_upstream_calls_total 1"));
}
