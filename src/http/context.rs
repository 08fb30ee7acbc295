//! Request context handed to key extractors and exclusion predicates.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, Method, Uri};

/// The parts of an HTTP request rules are allowed to look at.
///
/// Built from an incoming request before evaluation so extractors never need
/// access to the body.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Socket peer address, when the server was started with connect info
    pub peer: Option<SocketAddr>,
}

impl RequestContext {
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            peer: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Best guess at the originating client.
    ///
    /// Prefers the first `X-Forwarded-For` entry, then `X-Real-IP`, then the
    /// socket peer.
    pub fn client_ip(&self) -> Option<String> {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next().map(str::trim) {
                if !first.is_empty() {
                    return Some(first.to_string());
                }
            }
        }

        if let Some(real_ip) = self.header("x-real-ip").map(str::trim) {
            if !real_ip.is_empty() {
                return Some(real_ip.to_string());
            }
        }

        self.peer.map(|addr| addr.ip().to_string())
    }
}
