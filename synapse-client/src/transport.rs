//! HTTP transport seam.
//!
//! [`RemoteClient`](crate::RemoteClient) speaks to the backend through
//! [`HttpTransport`], so tests can script responses without a network.

use crate::error::ClientError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A request relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ClientError> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ClientError>>;

/// An open streaming response.
pub struct StreamResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and read the whole body. Only transport failures are
    /// errors; any status code is a response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError>;

    /// Send a request and hand back the body as it arrives.
    async fn open_stream(&self, request: HttpRequest) -> Result<StreamResponse, ClientError>;
}

/// [`HttpTransport`] over reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Config(err.to_string()))?;
        // Streams stay open indefinitely; only the connect phase is bounded.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|err| ClientError::Config(err.to_string()))?;
        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn build(&self, client: &reqwest::Client, request: HttpRequest) -> Result<reqwest::RequestBuilder, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => client.get(url),
            Method::Post => client.post(url),
            Method::Put => client.put(url),
            Method::Delete => client.delete(url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ClientError::Config(format!("invalid header name: {}", err)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| ClientError::Config(format!("invalid header value: {}", err)))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body);
        }
        Ok(builder)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let timeout_ms = self.timeout_ms;
        let response = self
            .build(&self.client, request)?
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|err| ClientError::from_reqwest(err, timeout_ms))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::from_reqwest(err, timeout_ms))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamResponse, ClientError> {
        let timeout_ms = self.timeout_ms;
        let response = self
            .build(&self.stream_client, request)?
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await
            .map_err(|err| ClientError::from_reqwest(err, timeout_ms))?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(move |err| ClientError::from_reqwest(err, timeout_ms))
            .boxed();
        Ok(StreamResponse { status, body })
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::get("/api/backtest/status")
            .with_query("run_id", "run42")
            .with_header("Authorization", "Bearer t");
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query_value("run_id"), Some("run42"));
        assert_eq!(request.header("authorization"), Some("Bearer t"));
        assert!(request.body.is_none());
    }

    #[test]
    fn test_json_body() {
        let request = HttpRequest::new(Method::Post, "/api/traders")
            .with_json(&serde_json::json!({"name": "alpha"}))
            .unwrap();
        assert_eq!(request.body.as_deref(), Some(br#"{"name":"alpha"}"#.as_slice()));
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_reqwest_transport_trims_base_url() {
        let transport = ReqwestTransport::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.base_url, "http://localhost:8080");
    }
}
