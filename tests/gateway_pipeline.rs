mod common;

use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{ADMIN_KEY, FailingStore, Harness, READER_KEY, api_key, request};
use erp_gateway_server::error::{AuthError, GatewayError, UpstreamError};
use erp_gateway_server::models::{CacheProvenance, OperationClass, Permission, PresentedCredential};

#[tokio::test]
async fn repeated_read_is_served_from_cache() {
    let harness = Harness::builder().build();
    let read = || request(OperationClass::Resource, "invoices", json!({"id": "INV-001"}), api_key(READER_KEY));

    let first = harness.dispatcher.execute(read()).await.unwrap();
    assert_eq!(first.cache, CacheProvenance::Miss);
    assert_eq!(first.payload["id"], "INV-001");
    assert_eq!(harness.erp.calls(), 1);

    let second = harness.dispatcher.execute(read()).await.unwrap();
    assert_eq!(second.cache, CacheProvenance::Hit);
    assert_eq!(second.payload, first.payload);
    assert_eq!(harness.erp.calls(), 1);
}

#[tokio::test]
async fn per_minute_ceiling_rejects_then_window_rolls() {
    let harness = Harness::builder().per_minute(60).build();
    let read = || request(OperationClass::Resource, "invoices", json!({}), api_key(READER_KEY));

    for _ in 0..60 {
        harness.dispatcher.execute(read()).await.unwrap();
    }

    match harness.dispatcher.execute(read()).await {
        Err(GatewayError::RateLimited(e)) => {
            assert!(e.retry_after <= Duration::from_secs(60));
            assert!(e.retry_after > Duration::ZERO);
        }
        other => panic!("expected a rate limit rejection, got {:?}", other),
    }

    harness.clock.advance(ChronoDuration::seconds(60));
    assert!(harness.dispatcher.execute(read()).await.is_ok());
}

#[tokio::test]
async fn create_invoice_invalidates_cached_listing() {
    let harness = Harness::builder().build();
    let list = || request(OperationClass::Resource, "invoices", json!({}), api_key(ADMIN_KEY));

    let before = harness.dispatcher.execute(list()).await.unwrap();
    assert_eq!(before.payload["invoices"].as_array().unwrap().len(), 2);
    assert_eq!(harness.dispatcher.execute(list()).await.unwrap().cache, CacheProvenance::Hit);

    let created = harness
        .dispatcher
        .execute(request(
            OperationClass::Tool,
            "create_invoice",
            json!({"customer_id": "C-9", "amount": 42.0}),
            api_key(ADMIN_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(created.payload["success"], true);
    assert_eq!(created.payload["result"]["id"], "INV-003");

    let after = harness.dispatcher.execute(list()).await.unwrap();
    assert_eq!(after.cache, CacheProvenance::Miss);
    let ids: Vec<&str> = after.payload["invoices"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|invoice| invoice["id"].as_str())
        .collect();
    assert!(ids.contains(&"INV-003"));
}

#[tokio::test]
async fn create_leaves_unrelated_entries_cached() {
    let harness = Harness::builder().build();
    let item = || request(OperationClass::Resource, "invoices", json!({"id": "INV-001"}), api_key(ADMIN_KEY));
    let customers = || request(OperationClass::Resource, "customers", json!({}), api_key(ADMIN_KEY));

    harness.dispatcher.execute(item()).await.unwrap();
    harness.dispatcher.execute(customers()).await.unwrap();

    harness
        .dispatcher
        .execute(request(
            OperationClass::Tool,
            "create_invoice",
            json!({"customer_id": "C-9", "amount": 10}),
            api_key(ADMIN_KEY),
        ))
        .await
        .unwrap();

    // Creation only touches listings, so the existing item stays cached
    assert_eq!(harness.dispatcher.execute(item()).await.unwrap().cache, CacheProvenance::Hit);
    assert_eq!(harness.dispatcher.execute(customers()).await.unwrap().cache, CacheProvenance::Hit);
}

#[tokio::test]
async fn rejected_tokens_do_not_consume_quota() {
    let harness = Harness::builder().per_minute(1).build();
    let permissions = [Permission::read("invoices")];

    let expired = harness
        .jwt
        .issue_at("alice", &permissions, Utc::now() - ChronoDuration::hours(3))
        .unwrap();
    for _ in 0..3 {
        let err = harness
            .dispatcher
            .execute(request(
                OperationClass::Resource,
                "invoices",
                json!({}),
                PresentedCredential::Bearer(expired.clone()),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Auth(AuthError::Expired));
    }

    let err = harness
        .dispatcher
        .execute(request(
            OperationClass::Resource,
            "invoices",
            json!({}),
            PresentedCredential::Bearer("not.a.token".into()),
        ))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Auth(AuthError::InvalidSignature));

    // The single allowed request is still available to alice
    let valid = harness.jwt.issue("alice", &permissions).unwrap();
    let done = harness
        .dispatcher
        .execute(request(
            OperationClass::Resource,
            "invoices",
            json!({}),
            PresentedCredential::Bearer(valid),
        ))
        .await;
    assert!(done.is_ok());
    assert_eq!(harness.erp.calls(), 1);
}

#[tokio::test]
async fn forbidden_requests_do_not_consume_quota() {
    let harness = Harness::builder().per_minute(1).build();

    for _ in 0..2 {
        let err = harness
            .dispatcher
            .execute(request(
                OperationClass::Tool,
                "create_invoice",
                json!({"customer_id": "C-1", "amount": 1}),
                api_key(READER_KEY),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(AuthError::Forbidden { .. })));
    }

    let read = request(OperationClass::Resource, "invoices", json!({}), api_key(READER_KEY));
    assert!(harness.dispatcher.execute(read).await.is_ok());
}

#[tokio::test]
async fn cache_outage_never_fails_requests() {
    let harness = Harness::builder().primary_store(Arc::new(FailingStore)).build();
    let read = || request(OperationClass::Resource, "invoices", json!({"id": "INV-002"}), api_key(READER_KEY));

    let first = harness.dispatcher.execute(read()).await.unwrap();
    assert_eq!(first.cache, CacheProvenance::Miss);

    // Served from the in-process fallback while the backend is down
    let second = harness.dispatcher.execute(read()).await.unwrap();
    assert_eq!(second.cache, CacheProvenance::Hit);
    assert_eq!(harness.erp.calls(), 1);

    let stats = harness.cache.stats().await;
    assert!(stats.degraded);
    assert_eq!(stats.backend, "memory");
}

#[tokio::test]
async fn tools_never_read_the_cache() {
    let harness = Harness::builder().build();
    let details = || {
        request(
            OperationClass::Tool,
            "get_invoice_details",
            json!({"invoice_id": "INV-001"}),
            api_key(READER_KEY),
        )
    };

    for _ in 0..2 {
        let done = harness.dispatcher.execute(details()).await.unwrap();
        assert_eq!(done.cache, CacheProvenance::Miss);
        assert_eq!(done.payload["result"]["id"], "INV-001");
    }
    assert_eq!(harness.erp.calls(), 2);
}

#[tokio::test]
async fn invalid_arguments_never_reach_upstream() {
    let harness = Harness::builder().build();

    let err = harness
        .dispatcher
        .execute(request(OperationClass::Resource, "financial", json!({"id": "2025-13"}), api_key(ADMIN_KEY)))
        .await
        .unwrap_err();
    match err {
        GatewayError::Validation(e) => assert_eq!(e.field, "id"),
        other => panic!("expected a validation error, got {:?}", other),
    }

    let err = harness
        .dispatcher
        .execute(request(
            OperationClass::Tool,
            "create_invoice",
            json!({"customer_id": "C-1"}),
            api_key(ADMIN_KEY),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
    assert_eq!(harness.erp.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_upstream_times_out() {
    let harness = Harness::builder().build();
    harness.erp.slow_down(Duration::from_secs(10));

    let err = harness
        .dispatcher
        .execute(request(OperationClass::Resource, "invoices", json!({"id": "INV-001"}), api_key(READER_KEY)))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Upstream(UpstreamError::Timeout));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn upstream_rejection_is_not_retryable() {
    let harness = Harness::builder().build();
    let err = harness
        .dispatcher
        .execute(request(OperationClass::Resource, "invoices", json!({"id": "INV-404"}), api_key(READER_KEY)))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Upstream(UpstreamError::Rejected { status: 404, .. })));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn prompt_fetches_supporting_data_through_the_cache() {
    let harness = Harness::builder().build();
    let prompt = || {
        request(
            OperationClass::Prompt,
            "analyze_invoice",
            json!({"invoice_id": "INV-001"}),
            api_key(ADMIN_KEY),
        )
    };

    let first = harness.dispatcher.execute(prompt()).await.unwrap();
    let messages = first.payload["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert!(messages[1]["content"].as_str().unwrap().contains("INV-001"));

    harness.dispatcher.execute(prompt()).await.unwrap();
    assert_eq!(harness.erp.calls(), 1);
}

#[tokio::test]
async fn prompt_requires_read_access_to_its_data() {
    let harness = Harness::builder().build();
    let err = harness
        .dispatcher
        .execute(request(
            OperationClass::Prompt,
            "analyze_invoice",
            json!({"invoice_id": "INV-001"}),
            api_key(READER_KEY),
        ))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Auth(AuthError::Forbidden {
            permission: "prompts:read".into()
        })
    );
}

#[tokio::test]
async fn sanitized_arguments_are_forwarded() {
    let harness = Harness::builder().build();
    let done = harness
        .dispatcher
        .execute(request(
            OperationClass::Tool,
            "create_invoice",
            json!({"customer_id": "C-1", "amount": 5, "notes": "<b>rush</b>; ship"}),
            api_key(ADMIN_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(done.payload["result"]["notes"], "&lt;b&gt;rush&lt;/b&gt; ship");
}

#[tokio::test]
async fn full_cache_still_serves_reads() {
    let harness = Harness::builder().fallback_capacity(1).build();
    let item = |id: &str| request(OperationClass::Resource, "invoices", json!({ "id": id }), api_key(READER_KEY));

    let first = harness.dispatcher.execute(item("INV-001")).await.unwrap();
    assert_eq!(first.payload["id"], "INV-001");

    // No room left: the read succeeds but nothing is cached
    for _ in 0..2 {
        let done = harness.dispatcher.execute(item("INV-002")).await.unwrap();
        assert_eq!(done.cache, CacheProvenance::Miss);
        assert_eq!(done.payload["id"], "INV-002");
    }
    assert_eq!(harness.erp.calls(), 3);

    let again = harness.dispatcher.execute(item("INV-001")).await.unwrap();
    assert_eq!(again.cache, CacheProvenance::Hit);
    assert_eq!(harness.cache.stats().await.entry_count, 1);
}
