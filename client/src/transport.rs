//! Raw HTTPS channel to MoSAPI.
//!
//! One layer below the session-aware client: takes a fully-built URI, method,
//! headers and optional body, returns status + headers + body text. The only
//! response processing done here is transparent decompression when the server
//! answers a `gzip`/`deflate` content encoding. No retries at this layer.

use flate2::read::{GzDecoder, ZlibDecoder};
use http::header::CONTENT_ENCODING;
use http::{HeaderMap, Method, StatusCode};
use std::io::Read;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid TLS client material: {0}")]
    Tls(String),

    #[error("failed to decompress response body: {0}")]
    Decompress(String),

    #[error("response body is not valid UTF-8")]
    Encoding,
}

/// A fully-collected HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// HTTPS channel presenting the operator's client certificate on every
/// connection. Cheap to clone; the TLS context is built once and shared.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
}

impl Transport {
    /// Builds a channel that authenticates with the given PEM key pair.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, TransportError> {
        let identity = crate::tls::client_identity(cert_pem, key_pem)?;
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Transport { client })
    }

    /// Builds a channel without a client certificate. Useful against test
    /// servers; production MoSAPI will reject it at the handshake.
    pub fn without_client_cert() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Transport { client })
    }

    /// Executes one request and collects the whole response.
    pub async fn execute(
        &self,
        method: Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<String>,
    ) -> Result<RawResponse, TransportError> {
        let mut request = self
            .client
            .request(method, url.clone())
            .headers(headers.clone());
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let raw_body = response.bytes().await?;

        let body = decode_body(&response_headers, &raw_body)?;

        Ok(RawResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

fn decode_body(headers: &HeaderMap, raw: &[u8]) -> Result<String, TransportError> {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());

    let bytes = match encoding.as_deref() {
        Some("gzip") => {
            let mut decoder = GzDecoder::new(raw);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| TransportError::Decompress(e.to_string()))?;
            out
        }
        Some("deflate") => {
            let mut decoder = ZlibDecoder::new(raw);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| TransportError::Decompress(e.to_string()))?;
            out
        }
        _ => raw.to_vec(),
    };

    String::from_utf8(bytes).map_err(|_| TransportError::Encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use http::header::{ACCEPT_ENCODING, HeaderValue};
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn passes_headers_and_collects_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("X-Test", "yes"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let transport = Transport::without_client_cert().unwrap();
        let url = Url::parse(&format!("{}/ping", server.uri())).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("X-Test", HeaderValue::from_static("yes"));

        let response = transport
            .execute(Method::GET, &url, &headers, None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "pong");
    }

    #[tokio::test]
    async fn decompresses_gzip_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/report"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_bytes(gzip(br#"{"tld":"example"}"#)),
            )
            .mount(&server)
            .await;

        let transport = Transport::without_client_cert().unwrap();
        let url = Url::parse(&format!("{}/report", server.uri())).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));

        let response = transport
            .execute(Method::GET, &url, &headers, None)
            .await
            .unwrap();
        assert_eq!(response.body, r#"{"tld":"example"}"#);
    }

    #[tokio::test]
    async fn corrupt_gzip_is_a_decompress_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Encoding", "gzip")
                    .set_body_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]),
            )
            .mount(&server)
            .await;

        let transport = Transport::without_client_cert().unwrap();
        let url = Url::parse(&format!("{}/bad", server.uri())).unwrap();

        let err = transport
            .execute(Method::GET, &url, &HeaderMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decompress(_)));
    }

    #[tokio::test]
    async fn connection_failure_is_a_transport_error() {
        let transport = Transport::without_client_cert().unwrap();
        // Reserved TEST-NET-1 address; nothing listens there.
        let url = Url::parse("http://192.0.2.1:1/x").unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.execute(Method::GET, &url, &HeaderMap::new(), None),
        )
        .await;
        if let Ok(inner) = result {
            assert!(matches!(inner.unwrap_err(), TransportError::Http(_)));
        }
    }
}
