//! Parsed request data.
//!
//! A `Request` is filled in incrementally by [`super::Parser`]; the rest of
//! the engine only ever sees it once `state()` reports `Complete` (or
//! `Error`, in which case `error()` carries the status to answer with).

use std::collections::HashMap;

use super::Method;

/// Where the parser currently stands for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    ParsingRequestLine,
    ParsingHeaders,
    ParsingBody,
    Complete,
    Error,
}

/// One file part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field_name: String,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Fatal protocol error recorded on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Raw request target as it appeared on the request line.
    pub uri: String,
    pub version: String,
    /// Header names are stored lowercased; a repeated name overwrites the
    /// previous value.
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Host/port from an absolute-form target, defaults otherwise.
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query_string: String,
    pub uploaded_files: Vec<UploadedFile>,
    pub form_fields: HashMap<String, String>,
    state: RequestState,
    error: Option<RequestError>,
}

impl Request {
    pub fn new() -> Request {
        Request {
            method: Method::Unknown,
            uri: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            host: String::new(),
            port: 80,
            path: String::new(),
            query_string: String::new(),
            uploaded_files: Vec::new(),
            form_fields: HashMap::new(),
            state: RequestState::ParsingRequestLine,
            error: None,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| &v[..])
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Value of `Content-Length`, if present and numeric. The parser has
    /// already rejected non-digit values, so a `None` here means the header
    /// is absent.
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type().starts_with("multipart/form-data")
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn set_state(&mut self, state: RequestState) {
        self.state = state;
    }

    pub fn is_complete(&self) -> bool {
        self.state == RequestState::Complete
    }

    pub fn has_error(&self) -> bool {
        self.state == RequestState::Error
    }

    pub fn error(&self) -> Option<&RequestError> {
        self.error.as_ref()
    }

    /// Record a fatal protocol error; the parser makes no further progress
    /// on a request in this state.
    pub fn set_error(&mut self, code: u16, message: &str) {
        self.error = Some(RequestError {
            code,
            message: message.to_string(),
        });
        self.state = RequestState::Error;
    }

    /// Store the request target and derive `path`, `query_string` and, for
    /// absolute-form targets, `host`/`port`.
    pub fn set_target(&mut self, target: &str) {
        self.uri = target.to_string();
        if let Some(rest) = target.strip_prefix("http://") {
            let (authority, path_query) = match rest.find('/') {
                Some(slash) => (&rest[..slash], &rest[slash..]),
                None => (rest, ""),
            };
            match authority.split_once(':') {
                Some((host, port)) => {
                    self.host = host.to_string();
                    self.port = port.parse().unwrap_or(80);
                }
                None => {
                    self.host = authority.to_string();
                    self.port = 80;
                }
            }
            self.split_path_query(path_query);
        } else {
            self.split_path_query(target);
        }
        if self.path.is_empty() {
            self.path = "/".to_string();
        }
    }

    fn split_path_query(&mut self, path_query: &str) {
        match path_query.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query_string = query.to_string();
            }
            None => {
                self.path = path_query.to_string();
                self.query_string.clear();
            }
        }
    }

    pub fn add_uploaded_file(
        &mut self,
        field_name: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) {
        self.uploaded_files.push(UploadedFile {
            field_name: field_name.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data: data.to_vec(),
        });
    }

    pub fn add_form_field(&mut self, name: &str, value: &str) {
        self.form_fields.insert(name.to_string(), value.to_string());
    }

    /// Reset to the pristine state, ready for the next request.
    pub fn clear(&mut self) {
        *self = Request::new();
    }
}

impl Default for Request {
    fn default() -> Request {
        Request::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = Request::new();
        req.set_header("Content-Type", "text/plain");
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("text/plain"));
        assert!(req.has_header("Content-type"));
    }

    #[test]
    fn repeated_header_overwrites() {
        let mut req = Request::new();
        req.set_header("X-Tag", "one");
        req.set_header("x-tag", "two");
        assert_eq!(req.header("X-Tag"), Some("two"));
    }

    #[test]
    fn origin_form_target() {
        let mut req = Request::new();
        req.set_target("/a/b?x=1&y=2");
        assert_eq!(req.path, "/a/b");
        assert_eq!(req.query_string, "x=1&y=2");
        assert_eq!(format!("{}?{}", req.path, req.query_string), "/a/b?x=1&y=2");
    }

    #[test]
    fn absolute_form_target() {
        let mut req = Request::new();
        req.set_target("http://example.com:8081/dir/page?q=z");
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 8081);
        assert_eq!(req.path, "/dir/page");
        assert_eq!(req.query_string, "q=z");

        let mut bare = Request::new();
        bare.set_target("http://example.com");
        assert_eq!(bare.host, "example.com");
        assert_eq!(bare.port, 80);
        assert_eq!(bare.path, "/");
    }

    #[test]
    fn error_halts_the_request() {
        let mut req = Request::new();
        req.set_error(414, "URI Too Long");
        assert!(req.has_error());
        assert_eq!(req.error().unwrap().code, 414);
        assert_eq!(req.state(), RequestState::Error);
    }
}
