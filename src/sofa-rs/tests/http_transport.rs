//! End-to-end checks of the reqwest transport against a one-shot local responder.

use std::net::SocketAddr;

use serde_json::json;
use sofa_rs::{Body, ClientError, Connection, Document, PutOptions, ERROR_BODY_LIMIT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, capture the raw request, answer with `reply`.
async fn serve_once(reply: Vec<u8>) -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(head_end) = find(&request, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + length {
                    break;
                }
            }
        }

        // The client may hang up early on capped bodies
        let _ = socket.write_all(&reply).await;
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });

    (addr, handle)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn http_reply(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut reply = format!(
        "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    )
    .into_bytes();
    reply.extend_from_slice(body);
    reply
}

#[tokio::test]
async fn json_response_is_decoded() {
    let body = json!({"db_name": "app", "doc_count": 7, "update_seq": "7-abc"}).to_string();
    let (addr, server) = serve_once(http_reply("200 OK", "application/json", body.as_bytes())).await;

    let db = Connection::new("127.0.0.1", addr.port()).unwrap().db("app");
    let info = db.info().await.unwrap();

    assert_eq!(info.db_name, "app");
    assert_eq!(info.doc_count, 7);

    let request = server.await.unwrap().to_lowercase();
    assert!(request.starts_with("get /app http/1.1"));
    assert!(request.contains("accept: application/json"));
    assert!(request.contains(&format!("host: 127.0.0.1:{}", addr.port())));
}

#[tokio::test]
async fn put_sends_json_body() {
    let reply = json!({"ok": true, "id": "a b", "rev": "1-abc"}).to_string();
    let (addr, server) = serve_once(http_reply("201 Created", "application/json", reply.as_bytes())).await;

    let db = Connection::new("127.0.0.1", addr.port()).unwrap().db("app");
    let doc = Document::new("a b").with_field("n", 1);
    let result = db.put_doc(&doc, PutOptions::default()).await.unwrap();

    assert!(result.ok);
    assert_eq!(result.rev.as_deref(), Some("1-abc"));

    let request = server.await.unwrap();
    assert!(request.starts_with("PUT /app/a%20b HTTP/1.1"));
    assert!(request.to_lowercase().contains("content-type: application/json"));
    assert!(request.ends_with(r#"{"_id":"a b","n":1}"#));
}

#[tokio::test]
async fn error_body_is_capped() {
    let big = vec![b'e'; ERROR_BODY_LIMIT * 2];
    let (addr, _server) = serve_once(http_reply("500 Internal Server Error", "text/plain", &big)).await;

    let db = Connection::new("127.0.0.1", addr.port()).unwrap().db("app");
    let err = db.get_doc("x").await.unwrap_err();

    match err {
        ClientError::Status { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body.len(), ERROR_BODY_LIMIT);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_success_streams() {
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let (addr, _server) =
        serve_once(http_reply("200 OK", "application/octet-stream", &payload)).await;

    let conn = Connection::new("127.0.0.1", addr.port()).unwrap();
    let url = conn.endpoint().url(&["app", "doc", "blob.bin"], &[]);
    let response = conn.get(url).await.unwrap();

    assert!(matches!(response.body, Body::Stream(_)));
    assert!(response.json.is_none());
    let bytes = response.bytes().await.unwrap();
    assert_eq!(bytes.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn malformed_json_is_decode_error() {
    let (addr, _server) = serve_once(http_reply("200 OK", "application/json", b"{\"truncated\":")).await;

    let db = Connection::new("127.0.0.1", addr.port()).unwrap().db("app");
    let err = db.get_doc("x").await.unwrap_err();

    assert!(matches!(err, ClientError::Decode(_)));
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let db = Connection::new("127.0.0.1", port).unwrap().db("app");
    let err = db.info().await.unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn redirect_is_reported_not_followed() {
    let body = b"moved elsewhere";
    let mut reply = format!(
        "HTTP/1.1 302 Found\r\nlocation: http://127.0.0.1:1/other\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    reply.extend_from_slice(body);
    let (addr, server) = serve_once(reply).await;

    let conn = Connection::new("127.0.0.1", addr.port()).unwrap();
    let response = conn.get(conn.endpoint().url(&["app"], &[])).await.unwrap();

    assert_eq!(response.status(), 302);
    assert_eq!(response.text(), "moved elsewhere");
    assert!(server.await.unwrap().starts_with("GET /app HTTP/1.1"));
}

#[tokio::test]
async fn redirected_keys_query_is_a_status_error() {
    let reply = b"HTTP/1.1 303 See Other\r\nlocation: http://127.0.0.1:1/elsewhere\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_vec();
    let (addr, server) = serve_once(reply).await;

    let db = Connection::new("127.0.0.1", addr.port()).unwrap().db("app");
    let err = db.all_docs_keys(&["a"]).await.unwrap_err();

    assert_eq!(err.status(), Some(303));
    assert!(server.await.unwrap().starts_with("POST /app/_all_docs HTTP/1.1"));
}
