//! HTTP/1.1 protocol plumbing: the request data model, the incremental
//! parser and the response builder.

pub mod parser;
pub mod request;
pub mod response;

pub use self::parser::Parser;
pub use self::request::{Request, RequestState, UploadedFile};

/// Request methods understood by the engine.
///
/// Anything else on the wire is stored as `Unknown` and rejected by the
/// parser with a 400 before it reaches the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
    Unknown,
}

impl Method {
    pub fn parse(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Unknown => "UNKNOWN",
        }
    }
}

/// Canonical reason phrase for a status code, `"Unknown"` when the code is
/// outside the registered range.
pub fn status_text(code: u16) -> &'static str {
    ::http::StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown")
}
