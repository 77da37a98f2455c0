use std::net::TcpListener;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use httpmock::Method::{DELETE, GET, PATCH, POST, PUT};
use httpmock::MockServer;
use medsync_core::storage::LocalStore;
use medsync_core::sync::{drain, HttpTransport, SenderRegistry};
use medsync_core::{NewMutation, OutboxQueue};
use reqwest::multipart::Form;
use serde_json::json;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn queue() -> OutboxQueue {
    OutboxQueue::new(Arc::new(LocalStore::open_in_memory().unwrap()))
}

fn registry_for(server: &MockServer) -> SenderRegistry {
    let transport = HttpTransport::new(&server.url("/api/"))
        .unwrap()
        .with_token("secret-token");
    SenderRegistry::with_http_defaults(Arc::new(transport))
}

#[tokio::test]
async fn json_rows_are_replayed_with_headers() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let assign = server.mock(|when, then| {
        when.method(POST)
            .path("/api/beds/assign")
            .header("authorization", "Bearer secret-token")
            .header("content-type", "application/json")
            .header("idempotency-key", "row-1")
            .json_body(json!({"patientId": "p1", "bed": "A1"}));
        then.status(201);
    });
    let discharge = server.mock(|when, then| {
        when.method(DELETE)
            .path("/api/beds/A1")
            .header("idempotency-key", "row-2");
        then.status(204);
    });

    let q = queue();
    q.enqueue(NewMutation::with_id(
        "row-1",
        "beds",
        "beds/assign",
        "POST",
        json!({"patientId": "p1", "bed": "A1"}),
    ))
    .unwrap();
    q.enqueue(NewMutation::with_id(
        "row-2",
        "beds",
        "beds/A1",
        "DELETE",
        serde_json::Value::Null,
    ))
    .unwrap();

    let report = drain(&q, &registry_for(&server)).await.unwrap();

    assign.assert();
    discharge.assert();
    assert_eq!(report.processed_count, 2);
    assert_eq!(report.per_collection_success.get("beds"), Some(&2));
    assert!(q.is_empty().unwrap());
}

#[tokio::test]
async fn rooted_endpoint_stays_under_base_path() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let assign = server.mock(|when, then| {
        when.method(POST)
            .path("/api/assign")
            .json_body(json!({"patientId": "p1"}));
        then.status(200);
    });

    let q = queue();
    q.enqueue(
        NewMutation::with_id("1", "bedAssign", "/assign", "POST", json!({"patientId": "p1"}))
            .sender("json"),
    )
    .unwrap();

    // Base URL without a trailing slash, as usually configured
    let transport = HttpTransport::new(&server.url("/api")).unwrap();
    let registry = SenderRegistry::with_http_defaults(Arc::new(transport));

    let report = drain(&q, &registry).await.unwrap();

    assign.assert();
    assert_eq!(report.processed_count, 1);
    assert_eq!(report.dropped, 0);
    assert!(q.dead_letters().unwrap().is_empty());
    assert!(q.is_empty().unwrap());
}

#[tokio::test]
async fn client_errors_are_dropped_and_server_errors_kept() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(POST).path("/api/patients");
        then.status(422).body("missing mrn");
    });
    let mut unavailable = server.mock(|when, then| {
        when.method(PUT).path("/api/ot/7");
        then.status(503).body("maintenance");
    });

    let q = queue();
    q.enqueue(NewMutation::with_id("bad", "patients", "patients", "POST", json!({})))
        .unwrap();
    q.enqueue(NewMutation::with_id("later", "ot", "ot/7", "PUT", json!({"room": 2})))
        .unwrap();
    let registry = registry_for(&server);

    let first = drain(&q, &registry).await.unwrap();

    rejected.assert();
    unavailable.assert();
    assert_eq!(first.processed_count, 0);
    assert_eq!(first.dropped, 1);
    assert_eq!(first.retained, 1);

    let letters = q.dead_letters().unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].status, Some(422));
    assert!(letters[0].error.contains("missing mrn"));

    let kept = q.get("later").unwrap().unwrap();
    assert_eq!(kept.retries, 1);
    assert!(kept.last_error.unwrap().contains("503"));

    unavailable.delete();
    let recovered = server.mock(|when, then| {
        when.method(PUT).path("/api/ot/7");
        then.status(200);
    });

    let second = drain(&q, &registry).await.unwrap();

    recovered.assert();
    assert_eq!(second.processed_count, 1);
    assert_eq!(second.per_collection_success.get("ot"), Some(&1));
    assert!(q.is_empty().unwrap());
}

#[tokio::test]
async fn rate_limited_rows_are_retained() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/beds");
        then.status(429);
    });

    let q = queue();
    q.enqueue(NewMutation::with_id("1", "beds", "beds", "POST", json!({})))
        .unwrap();

    let report = drain(&q, &registry_for(&server)).await.unwrap();

    assert_eq!(report.retained, 1);
    assert!(q.dead_letters().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_server_is_transient() {
    let transport = HttpTransport::new("http://127.0.0.1:1/api/").unwrap();
    let registry = SenderRegistry::with_http_defaults(Arc::new(transport));

    let q = queue();
    q.enqueue(NewMutation::with_id("1", "beds", "beds", "POST", json!({})))
        .unwrap();

    let report = drain(&q, &registry).await.unwrap();

    assert_eq!(report.retained, 1);
    let row = q.get("1").unwrap().unwrap();
    assert_eq!(row.retries, 1);
    assert!(row.last_error.is_some());
}

#[tokio::test]
async fn tagged_multipart_is_rebuilt() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(POST)
            .path("/api/scans")
            .header_exists("content-type")
            .body_contains("name=\"ward\"")
            .body_contains("filename=\"xray.png\"")
            .body_contains("png-bytes");
        then.status(201);
    });

    let q = queue();
    q.enqueue(NewMutation::with_id(
        "scan-1",
        "scans",
        "scans",
        "POST",
        json!({
            "__multipart": true,
            "parts": [
                {"kind": "field", "name": "ward", "value": "A"},
                {
                    "kind": "file",
                    "name": "scan",
                    "filename": "xray.png",
                    "mime": "image/png",
                    "data": STANDARD.encode(b"png-bytes"),
                }
            ]
        }),
    ))
    .unwrap();

    let report = drain(&q, &registry_for(&server)).await.unwrap();

    upload.assert();
    assert_eq!(report.processed_count, 1);
}

#[tokio::test]
async fn legacy_payload_is_flattened() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let admit = server.mock(|when, then| {
        when.method(POST)
            .path("/api/admissions")
            .body_contains("name=\"patient[address][city]\"")
            .body_contains("Pune")
            .body_contains("name=\"consent\"")
            .body_contains("%PDF");
        then.status(200);
    });

    let q = queue();
    q.enqueue(NewMutation::with_id(
        "adm-1",
        "admissions",
        "admissions",
        "POST",
        json!({
            "data": {"patient": {"address": {"city": "Pune"}}},
            "files": [
                {"field": "consent", "filename": "consent.pdf", "mime": "application/pdf", "data": STANDARD.encode(b"%PDF-1.4")}
            ]
        }),
    ))
    .unwrap();

    drain(&q, &registry_for(&server)).await.unwrap();

    admit.assert();
    assert!(q.is_empty().unwrap());
}

#[tokio::test]
async fn method_override_sender_posts() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let tunnelled = server.mock(|when, then| {
        when.method(POST)
            .path("/api/beds/A1")
            .header("x-http-method-override", "ASSIGN");
        then.status(200);
    });

    let q = queue();
    q.enqueue(
        NewMutation::with_id("1", "beds", "beds/A1", "assign", json!({"patientId": "p1"}))
            .sender("method-override"),
    )
    .unwrap();

    let report = drain(&q, &registry_for(&server)).await.unwrap();

    tunnelled.assert();
    assert_eq!(report.processed_count, 1);
}

#[tokio::test]
async fn patch_is_sent_natively() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let patched = server.mock(|when, then| {
        when.method(PATCH).path("/api/patients/9");
        then.status(200);
    });

    let q = queue();
    q.enqueue(NewMutation::with_id("1", "patients", "patients/9", "PATCH", json!({"ward": "B"})))
        .unwrap();

    drain(&q, &registry_for(&server)).await.unwrap();

    patched.assert();
}

#[tokio::test]
async fn live_form_is_sent_unchanged() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(POST)
            .path("/api/notes")
            .body_contains("name=\"text\"")
            .body_contains("vitals stable");
        then.status(201);
    });

    let transport = HttpTransport::new(&server.url("/api/")).unwrap();
    let form = Form::new().text("text", "vitals stable");
    transport.send_form("POST", "notes", form).await.unwrap();

    upload.assert();
}

#[tokio::test]
async fn probe_treats_any_response_as_online() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/");
        then.status(404);
    });

    let online = HttpTransport::new(&server.url("/api/")).unwrap();
    assert!(online.probe().await);

    let offline = HttpTransport::new("http://127.0.0.1:1/").unwrap();
    assert!(!offline.probe().await);
}
