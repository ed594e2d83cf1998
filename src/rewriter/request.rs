//! Intercepted request model.
//!
//! Headers are kept as an ordered list of name/value pairs rather than an
//! `http::HeaderMap`: the exact receipt order, duplicate names and original
//! casing all matter to the fingerprint and must survive untouched.

use std::fmt;

use bytes::Bytes;
use http::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Network endpoint a request is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpService {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl HttpService {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }
}

impl fmt::Display for HttpService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

/// An outbound request as captured by the host proxy.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    method: Method,
    url: String,
    service: Option<HttpService>,
    headers: Vec<HttpHeader>,
    body: Bytes,
}

impl InterceptedRequest {
    /// `url` is the declared destination, absolute form.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            service: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = HttpHeader>,
    {
        self.headers = headers.into_iter().collect();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Deliver the request to `service` instead of the host named in the URL.
    pub fn with_service(mut self, service: HttpService) -> Self {
        self.service = Some(service);
        self
    }

    /// Append a header after all existing ones; same-named headers are kept.
    pub fn with_added_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HttpHeader::new(name, value));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Explicit delivery endpoint, if one was set.
    pub fn service(&self) -> Option<&HttpService> {
        self.service.as_ref()
    }

    pub fn headers(&self) -> &[HttpHeader] {
        &self.headers
    }

    pub fn header_names(&self) -> Vec<String> {
        self.headers.iter().map(|header| header.name.clone()).collect()
    }

    /// Values of every header called `name`, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
