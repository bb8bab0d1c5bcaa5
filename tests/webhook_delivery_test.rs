use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mockito::Server;
use serde_json::json;

use pixgate::crypto;
use pixgate::services::dispatcher::{backoff_delay, DeliveryClient};

#[tokio::test]
async fn test_delivery_success() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("POST", "/hook")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let url = format!("{}/hook", server.url());
    let client = DeliveryClient::new(Duration::from_secs(2)).expect("client build");

    let body = json!({"event": "payment.completed"}).to_string();
    let sig = crypto::sign("secret", body.as_bytes());

    let response = client.post(&url, &sig, None, body).await.expect("send");
    assert!(response.is_success());
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "ok");
}

#[tokio::test]
async fn test_delivery_sends_signature_header() {
    let mut server = Server::new_async().await;

    let body = json!({"event": "payment.completed", "amount_cents": 37500}).to_string();
    let sig = crypto::sign("sub-secret", body.as_bytes());

    let m = server
        .mock("POST", "/signed")
        .match_header("x-signature", sig.as_str())
        .match_header("content-type", "application/json")
        .with_status(200)
        .create_async()
        .await;

    let url = format!("{}/signed", server.url());
    let client = DeliveryClient::new(Duration::from_secs(2)).expect("client build");
    let response = client.post(&url, &sig, None, body).await.expect("send");

    assert!(response.is_success());
    m.assert_async().await;
}

#[tokio::test]
async fn test_delivery_forwards_custom_headers() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("POST", "/custom")
        .match_header("x-merchant-ref", "link-42")
        .with_status(204)
        .create_async()
        .await;

    let url = format!("{}/custom", server.url());
    let client = DeliveryClient::new(Duration::from_secs(2)).expect("client build");

    let custom = json!({"X-Merchant-Ref": "link-42"});
    let response = client
        .post(&url, "sig", Some(&custom), "{}".to_string())
        .await
        .expect("send");

    assert!(response.is_success());
    m.assert_async().await;
}

#[tokio::test]
async fn test_delivery_non_2xx_is_not_success() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("POST", "/fail")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let url = format!("{}/fail", server.url());
    let client = DeliveryClient::new(Duration::from_secs(2)).expect("client build");
    let response = client.post(&url, "sig", None, "{}".to_string()).await.expect("send");

    assert!(!response.is_success());
    assert_eq!(response.status, 500);
    assert_eq!(response.body, "boom");
}

#[tokio::test]
async fn test_delivery_timeout_is_an_error() {
    // Plain TCP listener that accepts and stalls past the client timeout.
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf);
        thread::sleep(Duration::from_secs(2));
        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK");
    });

    let url = format!("http://{}:{}/slow", addr.ip(), addr.port());
    let client = DeliveryClient::new(Duration::from_millis(200)).expect("client build");

    let start = Instant::now();
    let result = client.post(&url, "sig", None, "{}".to_string()).await;
    let elapsed = start.elapsed();

    assert!(result.is_err());
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_concurrent_deliveries() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("POST", "/concurrent")
        .with_status(200)
        .expect(10)
        .create_async()
        .await;

    let url = format!("{}/concurrent", server.url());
    let client = Arc::new(DeliveryClient::new(Duration::from_secs(2)).expect("client build"));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let c = client.clone();
        let u = url.clone();
        handles.push(tokio::spawn(async move {
            c.post(&u, "sig", None, "{}".to_string()).await
        }));
    }

    for h in handles {
        let response = h.await.expect("task").expect("send");
        assert!(response.is_success());
    }
}

#[test]
fn test_retry_schedule_stays_bounded() {
    // Five attempts at base 5s: 5, 10, 20, 40, 80 (+ jitter < 5 each).
    let base = Duration::from_secs(5);
    let mut total = Duration::ZERO;
    for attempt in 0..5 {
        total += backoff_delay(base, attempt);
    }
    assert!(total >= Duration::from_secs(155));
    assert!(total < Duration::from_secs(180));
}
