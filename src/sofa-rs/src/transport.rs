use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::completion::Completion;
use crate::{BoxError, ClientError, Result};

/// Live response body, yielded chunk by chunk
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, BoxError>>;

/// A fully built request, ready to go on the wire
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Status line and headers of an answered request, body still unread
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

/// Transport trait for delivering one request and returning its raw response
///
/// An `Err` means no response was obtained at all (refused, reset, timed out).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> std::result::Result<RawResponse, BoxError>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client that never follows redirects, so 3xx answers reach the
    /// caller as status errors
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClientError::Transport(Box::new(e)))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client
    ///
    /// The client's redirect policy is left alone. Callers that want 3xx
    /// statuses reported rather than followed must disable redirects themselves.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: PreparedRequest) -> std::result::Result<RawResponse, BoxError> {
        let (completion, resolver) = Completion::new();
        let client = self.client.clone();

        // Driven on its own task so the exchange completes even if the caller
        // stops polling; the guard answers for a task torn down mid-flight.
        tokio::spawn(async move {
            let _guard = resolver.on_drop(|| {
                Err::<RawResponse, BoxError>("request task ended before a response arrived".into())
            });

            let mut builder = client
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let outcome = match builder.send().await {
                Ok(response) => Ok(RawResponse {
                    status: response.status(),
                    headers: response.headers().clone(),
                    body: response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(|e| Box::new(e) as BoxError))
                        .boxed(),
                }),
                Err(e) => Err(Box::new(e) as BoxError),
            };
            resolver.resolve(outcome);
        });

        completion
            .wait()
            .await
            .unwrap_or_else(|| Err("request task exited without resolving".into()))
    }
}
