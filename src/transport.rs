use std::{fmt, time::Duration};

use log::trace;
use reqwest::blocking::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 標頭查詢結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderValue<'a> {
    Missing,
    Single(&'a str),
    /// 同名標頭出現多次，無法判斷該採用哪一個。
    Repeated(usize),
}

fn lookup<'a>(headers: &'a [(String, String)], name: &str) -> HeaderValue<'a> {
    let mut values = headers
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str());

    match (values.next(), values.count()) {
        (None, _) => HeaderValue::Missing,
        (Some(value), 0) => HeaderValue::Single(value),
        (Some(_), rest) => HeaderValue::Repeated(rest + 1),
    }
}

/// 送往 ACME 伺服器的 HTTP 請求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header_value(&self, name: &str) -> HeaderValue<'_> {
        lookup(&self.headers, name)
    }
}

/// 伺服器回應，保留標頭原始順序與重複項。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 不分大小寫查詢標頭。
    pub fn header_value(&self, name: &str) -> HeaderValue<'_> {
        lookup(&self.headers, name)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP 傳輸能力。
///
/// 引擎只透過這個介面送出請求；測試可替換為腳本化的實作。
pub trait HttpTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// 觀察工作階段的每一次 HTTP 交換，例如轉存到外部紀錄。
///
/// 回呼期間工作階段仍被佔用，實作中不可再呼叫同一個 [`crate::client::Acme`]。
pub trait HttpWatcher {
    fn on_request(&self, _request: &HttpRequest) {}

    fn on_response(&self, _request: &HttpRequest, _response: &HttpResponse) {}
}

/// 以 `reqwest::blocking` 實作的預設傳輸層。
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes()?.to_vec();
        trace!("{} {} -> {status}", request.method, request.url);

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200)
            .header("Replay-Nonce", "abc")
            .header("content-type", "application/json");

        assert_eq!(
            response.header_value("replay-nonce"),
            HeaderValue::Single("abc")
        );
        assert_eq!(
            response.header_value("Content-Type"),
            HeaderValue::Single("application/json")
        );
        assert_eq!(response.header_value("Location"), HeaderValue::Missing);
    }

    #[test]
    fn test_repeated_header_is_reported() {
        let response = HttpResponse::new(200)
            .header("Link", "<a>;rel=up")
            .header("link", "<b>;rel=up")
            .header("LINK", "<c>;rel=index");

        assert_eq!(response.header_value("Link"), HeaderValue::Repeated(3));
    }

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::new(Method::Post, "https://acme.test/new-order")
            .header("Content-Type", "application/jose+json")
            .body("{}");

        assert_eq!(request.method.as_str(), "POST");
        assert_eq!(
            request.header_value("content-type"),
            HeaderValue::Single("application/jose+json")
        );
        assert_eq!(request.body.as_deref(), Some("{}"));
    }
}
