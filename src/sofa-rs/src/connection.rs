use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, HOST};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

use sofa_core::config::Config;

use crate::database::Database;
use crate::transport::{BodyStream, HttpTransport, PreparedRequest, RawResponse, Transport};
use crate::{ClientError, Result};

/// Bytes of an error response kept for diagnostics
pub const ERROR_BODY_LIMIT: usize = 8192;

const APPLICATION_JSON: &str = "application/json";

/// Endpoint is the target server. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    base: Url,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let base = Url::parse(&format!("http://{}:{}/", host, port))?;
        Ok(Self { host, port, base })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build a URL from path segments, each percent-escaped on its own,
    /// followed by already-encoded query pairs.
    pub fn url<S: AsRef<str>>(&self, segments: &[S], query: &[(String, String)]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(segments.iter().map(|segment| segment.as_ref()));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    fn host_header(&self) -> Result<HeaderValue> {
        Ok(HeaderValue::from_str(&format!("{}:{}", self.host, self.port))?)
    }
}

/// Request payload before encoding
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Serialized to JSON; content-type defaults to application/json
    Json(Value),
    /// Sent as UTF-8 bytes
    Text(String),
    /// Sent as-is
    Bytes(Bytes),
}

/// Response body: buffered when it was read for diagnostics or decoding,
/// otherwise still streaming from the server.
pub enum Body {
    Buffered(Bytes),
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Response represents the interpreted result of one HTTP exchange
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    pub json: Option<Value>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok()
    }

    /// Buffered body as text; empty while the body is still streaming
    pub fn text(&self) -> String {
        match &self.body {
            Body::Buffered(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Body::Stream(_) => String::new(),
        }
    }

    /// Decode the JSON body into `T`. A missing body decodes as `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.json.clone().unwrap_or(Value::Null)).map_err(ClientError::Decode)
    }

    pub fn into_stream(self) -> BodyStream {
        match self.body {
            Body::Stream(stream) => stream,
            Body::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
        }
    }

    /// Collect the whole body, reading the stream to its end if needed
    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Stream(mut stream) => Ok(read_body(&mut stream, None).await?.0),
        }
    }

    /// Build a `Status` error carrying the body
    ///
    /// A body still streaming is read up to [`ERROR_BODY_LIMIT`] bytes first.
    pub async fn status_error(self, context: impl Into<String>) -> ClientError {
        let context = context.into();
        let status = self.status();
        let body = match self.body {
            Body::Buffered(bytes) => bytes,
            Body::Stream(mut stream) => match read_body(&mut stream, Some(ERROR_BODY_LIMIT)).await {
                Ok((bytes, _)) => bytes,
                Err(e) => return e,
            },
        };

        ClientError::Status {
            status,
            context,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }
}

/// Connection builds requests against an endpoint and interprets responses
#[derive(Clone)]
pub struct Connection {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
}

impl Connection {
    /// Connect to `host:port` over plain HTTP
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Ok(Self::with_transport(
            Endpoint::new(host, port)?,
            Arc::new(HttpTransport::new()?),
        ))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.host.clone(), config.port)
    }

    pub fn with_transport(endpoint: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Handle for the named database
    pub fn db(&self, name: impl Into<String>) -> Database {
        Database::new(self.clone(), name)
    }

    /// Send one request and interpret its response
    ///
    /// Error statuses (>= 300) buffer at most [`ERROR_BODY_LIMIT`] bytes of
    /// body. Successful JSON responses are read fully and decoded. Anything
    /// else comes back unread as [`Body::Stream`].
    #[tracing::instrument(skip_all, fields(method = %method, url = %url))]
    pub async fn request(
        &self,
        method: Method,
        url: Url,
        headers: Option<HeaderMap>,
        body: RequestBody,
    ) -> Result<Response> {
        let request = self.prepare(method, url, headers.unwrap_or_default(), body)?;
        let raw = self
            .transport
            .send(request)
            .await
            .map_err(ClientError::Transport)?;

        tracing::debug!(status = raw.status.as_u16(), "response received");
        interpret(raw).await
    }

    pub async fn get(&self, url: Url) -> Result<Response> {
        self.request(Method::GET, url, None, RequestBody::Empty).await
    }

    pub async fn delete(&self, url: Url) -> Result<Response> {
        self.request(Method::DELETE, url, None, RequestBody::Empty).await
    }

    pub async fn put(&self, url: Url, body: RequestBody) -> Result<Response> {
        self.request(Method::PUT, url, None, body).await
    }

    pub async fn post(&self, url: Url, body: RequestBody) -> Result<Response> {
        self.request(Method::POST, url, None, body).await
    }

    fn prepare(
        &self,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: RequestBody,
    ) -> Result<PreparedRequest> {
        headers.insert(HOST, self.endpoint.host_header()?);
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        }

        let body = match body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
                }
                Some(Bytes::from(
                    serde_json::to_vec(&value).map_err(ClientError::Encode)?,
                ))
            }
            RequestBody::Text(text) => Some(Bytes::from(text.into_bytes())),
            RequestBody::Bytes(bytes) => Some(bytes),
        };

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|media| media.trim().eq_ignore_ascii_case(APPLICATION_JSON))
        .unwrap_or(false)
}

async fn interpret(raw: RawResponse) -> Result<Response> {
    let RawResponse {
        status,
        headers,
        body: mut stream,
    } = raw;
    let json_body = is_json(&headers);

    if status.as_u16() >= 300 {
        let (bytes, truncated) = read_body(&mut stream, Some(ERROR_BODY_LIMIT)).await?;
        // A cut-off error body is kept as text only
        let json = if json_body && !truncated {
            Some(decode(&bytes)?)
        } else {
            None
        };
        return Ok(Response {
            status,
            headers,
            body: Body::Buffered(bytes),
            json,
        });
    }

    if json_body {
        let (bytes, _) = read_body(&mut stream, None).await?;
        let json = decode(&bytes)?;
        return Ok(Response {
            status,
            headers,
            body: Body::Buffered(bytes),
            json: Some(json),
        });
    }

    Ok(Response {
        status,
        headers,
        body: Body::Stream(stream),
        json: None,
    })
}

fn decode(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(ClientError::Decode)
}

/// Read the stream, stopping at `limit` bytes. Returns whether data was cut off.
async fn read_body(stream: &mut BodyStream, limit: Option<usize>) -> Result<(Bytes, bool)> {
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ClientError::Transport)?;
        match limit {
            Some(limit) => {
                let room = limit - buffer.len();
                if chunk.len() > room {
                    buffer.extend_from_slice(&chunk[..room]);
                    return Ok((buffer.freeze(), true));
                }
                buffer.extend_from_slice(&chunk);
            }
            None => buffer.extend_from_slice(&chunk),
        }
    }

    Ok((buffer.freeze(), false))
}
