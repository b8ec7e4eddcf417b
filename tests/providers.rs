//! Hosted provider behavior against a scripted local HTTP server.

use std::sync::Arc;
use std::time::Duration;

use paper_index::config::{EmbeddingConfig, ProviderKind};
use paper_index::embedding::{EmbeddingProvider, HostedProvider, RetryPolicy};
use paper_index::error::EmbeddingError;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

struct Recorded {
    path: String,
    authorization: Option<String>,
    body: Value,
}

/// Answers each request with the next scripted `(status, body)`, then 500.
struct MockServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockServer {
    async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Some(request) = read_request(&mut stream).await else {
                    continue;
                };
                recorded.lock().await.push(request);
                let (status, body) = responses
                    .next()
                    .unwrap_or((500, "script exhausted".to_string()));
                let response = format!(
                    "HTTP/1.1 {} Mock\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{}/v1", addr),
            requests,
        }
    }

    async fn requests(&self) -> tokio::sync::MutexGuard<'_, Vec<Recorded>> {
        self.requests.lock().await
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let mut content_length = 0;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().ok()?,
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);

    Some(Recorded {
        path,
        authorization,
        body,
    })
}

fn embeddings_body(vectors: &[(usize, [f32; 3])]) -> String {
    let data: Vec<Value> = vectors
        .iter()
        .map(|(index, v)| json!({ "object": "embedding", "index": index, "embedding": v }))
        .collect();
    json!({ "object": "list", "data": data, "model": "test" }).to_string()
}

fn config(provider: ProviderKind, base_url: &str, key_env: &str) -> EmbeddingConfig {
    std::env::set_var(key_env, "test-key");
    EmbeddingConfig {
        provider,
        dims: Some(3),
        batch_size: Some(2),
        base_url: Some(base_url.to_string()),
        api_key_env: Some(key_env.to_string()),
        ..EmbeddingConfig::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        factor: 2,
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("passage {}", i)).collect()
}

#[tokio::test]
async fn test_voyage_sends_document_and_query_input_types() {
    let server = MockServer::start(vec![
        (200, embeddings_body(&[(0, [1.0, 0.0, 0.0]), (1, [0.0, 1.0, 0.0])])),
        (200, embeddings_body(&[(0, [0.0, 0.0, 1.0])])),
    ])
    .await;
    let provider = HostedProvider::new(&config(
        ProviderKind::Voyage,
        &server.base_url,
        "PAPERX_TEST_VOYAGE_TYPES",
    ))
    .unwrap();

    let vectors = provider.embed_batch(&texts(2)).await.unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    let query = provider.embed_query("what is attention?").await.unwrap();
    assert_eq!(query, vec![0.0, 0.0, 1.0]);

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].path, "/v1/embeddings");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-key"));
    assert_eq!(requests[0].body["input_type"], "document");
    assert_eq!(requests[0].body["model"], "voyage-2");
    assert_eq!(requests[0].body["input"], json!(["passage 0", "passage 1"]));
    assert_eq!(requests[1].body["input_type"], "query");
}

#[tokio::test]
async fn test_openai_splits_batches_and_reorders_by_index() {
    let server = MockServer::start(vec![
        (200, embeddings_body(&[(1, [0.0, 1.0, 0.0]), (0, [1.0, 0.0, 0.0])])),
        (200, embeddings_body(&[(0, [0.0, 0.0, 1.0])])),
    ])
    .await;
    let provider = HostedProvider::new(&config(
        ProviderKind::OpenAI,
        &server.base_url,
        "PAPERX_TEST_OPENAI_BATCH",
    ))
    .unwrap();

    let vectors = provider.embed_batch(&texts(3)).await.unwrap();
    assert_eq!(
        vectors,
        vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]
    );

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body["model"], "text-embedding-3-small");
    assert!(requests[0].body.get("input_type").is_none());
    assert_eq!(requests[1].body["input"], json!(["passage 2"]));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start(vec![
        (503, "overloaded".to_string()),
        (429, "slow down".to_string()),
        (200, embeddings_body(&[(0, [1.0, 0.0, 0.0])])),
    ])
    .await;
    let provider = HostedProvider::new(&config(
        ProviderKind::Voyage,
        &server.base_url,
        "PAPERX_TEST_VOYAGE_RETRY",
    ))
    .unwrap()
    .with_retry_policy(fast_retry());

    let vector = provider.embed_query("q").await.unwrap();
    assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    assert_eq!(server.requests().await.len(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start(vec![(500, "down".to_string()); 10]).await;
    let provider = HostedProvider::new(&config(
        ProviderKind::Voyage,
        &server.base_url,
        "PAPERX_TEST_VOYAGE_BOUNDED",
    ))
    .unwrap()
    .with_retry_policy(fast_retry());

    let err = provider.embed_query("q").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(server.requests().await.len(), 4);
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let server = MockServer::start(vec![(401, "bad key".to_string())]).await;
    let provider = HostedProvider::new(&config(
        ProviderKind::OpenAI,
        &server.base_url,
        "PAPERX_TEST_OPENAI_AUTH",
    ))
    .unwrap()
    .with_retry_policy(fast_retry());

    let err = provider.embed_query("q").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Authentication { .. }));
    assert_eq!(server.requests().await.len(), 1);
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let server = MockServer::start(vec![(400, "input too long".to_string())]).await;
    let provider = HostedProvider::new(&config(
        ProviderKind::Voyage,
        &server.base_url,
        "PAPERX_TEST_VOYAGE_BAD_REQUEST",
    ))
    .unwrap()
    .with_retry_policy(fast_retry());

    let err = provider.embed_batch(&texts(1)).await.unwrap_err();
    assert!(matches!(err, EmbeddingError::InvalidRequest { status: 400, .. }));
    assert_eq!(server.requests().await.len(), 1);
}

#[tokio::test]
async fn test_wrong_dimension_is_malformed() {
    let body = json!({ "data": [{ "index": 0, "embedding": [1.0, 0.0] }] }).to_string();
    let server = MockServer::start(vec![(200, body)]).await;
    let provider = HostedProvider::new(&config(
        ProviderKind::Voyage,
        &server.base_url,
        "PAPERX_TEST_VOYAGE_DIMS",
    ))
    .unwrap()
    .with_retry_policy(fast_retry());

    let err = provider.embed_query("q").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::MalformedResponse { .. }));
    assert_eq!(server.requests().await.len(), 1);
}

#[tokio::test]
async fn test_missing_key_fails_before_any_request() {
    let server = MockServer::start(Vec::new()).await;
    let config = EmbeddingConfig {
        provider: ProviderKind::Voyage,
        base_url: Some(server.base_url.clone()),
        api_key_env: Some("PAPERX_TEST_KEY_NEVER_SET".to_string()),
        ..EmbeddingConfig::default()
    };
    let provider = HostedProvider::new(&config).unwrap();
    assert_eq!(provider.dims(), 1024);

    let err = provider.embed_query("q").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Configuration(ref m) if m.contains("PAPERX_TEST_KEY_NEVER_SET")));
    assert!(server.requests().await.is_empty());
}
