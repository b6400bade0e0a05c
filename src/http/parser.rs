//! Incremental HTTP/1.1 request parser.
//!
//! The parser is driven by the event loop with the connection's whole
//! inbound buffer each time more bytes arrive; a cursor records how far the
//! previous calls got, so no byte is examined twice. It never blocks, never
//! looks past the bytes it was given, and allocates nothing beyond the
//! already-received payload plus per-header strings.
//!
//! `advance` returns `false` only for a fatal protocol error, in which case
//! the error code and message are recorded on the [`Request`].

use std::cmp::min;
use std::str;

use super::request::{Request, RequestState};
use super::Method;

/// Longest accepted request line, in bytes. Longer lines answer 414.
pub const MAX_REQUEST_LINE: usize = 8192;
/// Longest accepted header line, in bytes. Longer lines answer 400.
pub const MAX_HEADER_LINE: usize = 8192;
/// Maximum number of header lines per request. More answer 431.
pub const MAX_HEADERS_NUM: usize = 100;
/// Ceiling for a chunk-size line including extensions.
pub const MAX_CHUNK_HEAD: usize = 128;

/// httparse needs the header array preallocated; parts carry few headers.
const MAX_PART_HEADERS: usize = 32;

/// Body sub-mode, entered after the blank line that ends the headers.
/// Each variant carries only its own bookkeeping.
#[derive(Debug)]
enum BodyProgress {
    /// Fixed-size body (expected total, bytes copied so far).
    Identity { expected: usize, read: usize },
    /// Chunked transfer coding sub-machine.
    Chunked {
        parsing_size: bool,
        chunk_size: usize,
        chunk_read: usize,
        in_trailers: bool,
    },
    /// Buffered multipart/form-data (boundary, expected total, bytes copied).
    Multipart {
        boundary: String,
        expected: usize,
        read: usize,
    },
}

#[derive(Debug)]
pub struct Parser {
    /// Cursor into the connection's inbound buffer.
    pos: usize,
    header_count: usize,
    progress: Option<BodyProgress>,
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            pos: 0,
            header_count: 0,
            progress: None,
        }
    }

    /// The parser is single-use per request; the event loop resets it after
    /// every completion or error.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.header_count = 0;
        self.progress = None;
    }

    /// Make as much progress as the buffered bytes allow. Returns `true`
    /// while parsing can continue (including "waiting for more data") and
    /// `false` on a fatal error, with the error set on `req`.
    pub fn advance(&mut self, req: &mut Request, data: &[u8]) -> bool {
        if req.has_error() {
            return false;
        }
        if req.is_complete() {
            return true;
        }
        if req.state() == RequestState::ParsingRequestLine && !self.parse_request_line(req, data) {
            return false;
        }
        if req.state() == RequestState::ParsingHeaders && !self.parse_headers(req, data) {
            return false;
        }
        if req.state() == RequestState::ParsingBody && !self.parse_body(req, data) {
            return false;
        }
        true
    }

    fn parse_request_line(&mut self, req: &mut Request, data: &[u8]) -> bool {
        let avail = &data[self.pos..];
        let end = match find_crlf(avail) {
            Some(end) => end,
            None => {
                // Even with the terminator still in flight the line cannot
                // fit any more.
                if avail.len() > MAX_REQUEST_LINE + 1 {
                    req.set_error(414, "Request-URI Too Long");
                    return false;
                }
                return true;
            }
        };
        if end > MAX_REQUEST_LINE {
            req.set_error(414, "Request-URI Too Long");
            return false;
        }
        let line = match str::from_utf8(&avail[..end]) {
            Ok(line) => line,
            Err(_) => {
                req.set_error(400, "Bad Request - Invalid request line");
                return false;
            }
        };
        self.pos += end + 2;

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 3 {
            req.set_error(400, "Bad Request - Invalid request line");
            return false;
        }
        let method = Method::parse(tokens[0]);
        if method == Method::Unknown {
            req.set_error(400, "Bad Request - Invalid HTTP method");
            return false;
        }
        if !tokens[1].starts_with('/') && !tokens[1].starts_with("http://") {
            req.set_error(400, "Bad Request - Invalid URI");
            return false;
        }
        if !valid_http_version(tokens[2]) {
            req.set_error(400, "Bad Request - Invalid HTTP version");
            return false;
        }
        req.method = method;
        req.set_target(tokens[1]);
        req.version = tokens[2].to_string();
        req.set_state(RequestState::ParsingHeaders);
        true
    }

    fn parse_headers(&mut self, req: &mut Request, data: &[u8]) -> bool {
        loop {
            let avail = &data[self.pos..];
            let end = match find_crlf(avail) {
                Some(end) => end,
                None => {
                    if avail.len() > MAX_HEADER_LINE + 1 {
                        req.set_error(400, "Bad Request - Header line too long");
                        return false;
                    }
                    return true;
                }
            };
            if end > MAX_HEADER_LINE {
                req.set_error(400, "Bad Request - Header line too long");
                return false;
            }
            if end == 0 {
                // Blank line: headers are done.
                self.pos += 2;
                return self.finish_headers(req);
            }
            let line = match str::from_utf8(&avail[..end]) {
                Ok(line) => line,
                Err(_) => {
                    req.set_error(400, "Bad Request - Invalid header format");
                    return false;
                }
            };
            self.pos += end + 2;
            if !parse_header_line(req, line) {
                return false;
            }
            self.header_count += 1;
            if self.header_count > MAX_HEADERS_NUM {
                req.set_error(431, "Request Header Fields Too Large");
                return false;
            }
        }
    }

    /// Decide what follows the blank line. Only POST carries a body, and
    /// only when the headers announce one.
    fn finish_headers(&mut self, req: &mut Request) -> bool {
        if req.method == Method::Post && (req.has_header("content-length") || req.is_chunked()) {
            if req.is_chunked() {
                self.progress = Some(BodyProgress::Chunked {
                    parsing_size: true,
                    chunk_size: 0,
                    chunk_read: 0,
                    in_trailers: false,
                });
            } else {
                let expected = req.content_length().unwrap_or(0);
                if req.is_multipart() {
                    let boundary = match boundary_param(req.content_type()) {
                        Some(b) if !b.is_empty() => b,
                        _ => {
                            req.set_error(400, "Bad Request - Missing multipart boundary");
                            return false;
                        }
                    };
                    self.progress = Some(BodyProgress::Multipart {
                        boundary,
                        expected,
                        read: 0,
                    });
                } else {
                    self.progress = Some(BodyProgress::Identity { expected, read: 0 });
                }
            }
            req.set_state(RequestState::ParsingBody);
        } else {
            req.set_state(RequestState::Complete);
        }
        true
    }

    fn parse_body(&mut self, req: &mut Request, data: &[u8]) -> bool {
        match self.progress {
            Some(BodyProgress::Identity { expected, ref mut read }) => {
                let take = min(data.len() - self.pos, expected - *read);
                if take > 0 {
                    req.body.extend_from_slice(&data[self.pos..self.pos + take]);
                    self.pos += take;
                    *read += take;
                }
                if *read >= expected {
                    req.set_state(RequestState::Complete);
                }
                true
            }
            Some(BodyProgress::Multipart {
                ref boundary,
                expected,
                ref mut read,
            }) => {
                let take = min(data.len() - self.pos, expected - *read);
                if take > 0 {
                    req.body.extend_from_slice(&data[self.pos..self.pos + take]);
                    self.pos += take;
                    *read += take;
                }
                if *read < expected {
                    return true;
                }
                // The whole payload is buffered; split it into parts.
                let boundary = boundary.clone();
                let body = std::mem::take(&mut req.body);
                let ok = parse_multipart_parts(req, &boundary, &body);
                req.body = body;
                if ok {
                    req.set_state(RequestState::Complete);
                }
                ok
            }
            Some(BodyProgress::Chunked {
                ref mut parsing_size,
                ref mut chunk_size,
                ref mut chunk_read,
                ref mut in_trailers,
            }) => loop {
                if *in_trailers {
                    let avail = &data[self.pos..];
                    match find_crlf(avail) {
                        None => {
                            if avail.len() > MAX_HEADER_LINE + 1 {
                                req.set_error(400, "Bad Request - Trailer line too long");
                                return false;
                            }
                            return true;
                        }
                        Some(0) => {
                            self.pos += 2;
                            req.set_state(RequestState::Complete);
                            return true;
                        }
                        Some(end) => {
                            // Trailers are accepted but not retained.
                            self.pos += end + 2;
                        }
                    }
                } else if *parsing_size {
                    let avail = &data[self.pos..];
                    if avail.is_empty() {
                        return true;
                    }
                    match httparse::parse_chunk_size(avail) {
                        Ok(httparse::Status::Complete((consumed, size))) => {
                            self.pos += consumed;
                            if size == 0 {
                                *in_trailers = true;
                            } else {
                                *chunk_size = size as usize;
                                *chunk_read = 0;
                                *parsing_size = false;
                            }
                        }
                        Ok(httparse::Status::Partial) => {
                            if avail.len() > MAX_CHUNK_HEAD {
                                req.set_error(400, "Bad Request - Invalid chunk size");
                                return false;
                            }
                            return true;
                        }
                        Err(_) => {
                            req.set_error(400, "Bad Request - Invalid chunk size");
                            return false;
                        }
                    }
                } else {
                    let take = min(data.len() - self.pos, *chunk_size - *chunk_read);
                    if take > 0 {
                        req.body.extend_from_slice(&data[self.pos..self.pos + take]);
                        self.pos += take;
                        *chunk_read += take;
                    }
                    if *chunk_read < *chunk_size {
                        return true;
                    }
                    // Chunk data must be followed by its own CRLF.
                    if data.len() - self.pos < 2 {
                        return true;
                    }
                    if &data[self.pos..self.pos + 2] != b"\r\n" {
                        req.set_error(400, "Bad Request - Malformed chunk");
                        return false;
                    }
                    self.pos += 2;
                    *parsing_size = true;
                }
            },
            None => {
                req.set_error(500, "Internal Server Error - Body without framing");
                false
            }
        }
    }
}

impl Default for Parser {
    fn default() -> Parser {
        Parser::new()
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    if data.len() < 2 {
        return None;
    }
    data.windows(2).position(|w| w == b"\r\n")
}

fn find_subslice(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

fn valid_http_version(version: &str) -> bool {
    let digits = match version.strip_prefix("HTTP/") {
        Some(rest) => rest,
        None => return false,
    };
    match digits.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

fn parse_header_line(req: &mut Request, line: &str) -> bool {
    let (name, value) = match line.split_once(':') {
        Some(pair) => pair,
        None => {
            req.set_error(400, "Bad Request - Invalid header format");
            return false;
        }
    };
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() {
        req.set_error(400, "Bad Request - Invalid header name");
        return false;
    }
    for c in name.chars() {
        // No spaces, no control bytes, no second colon.
        if !c.is_ascii_graphic() || c == ':' {
            req.set_error(400, "Bad Request - Invalid header name");
            return false;
        }
    }
    if name.eq_ignore_ascii_case("content-length")
        && (value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()))
    {
        req.set_error(400, "Bad Request - Invalid Content-Length");
        return false;
    }
    req.set_header(name, value);
    true
}

/// Extract the `boundary=` parameter of a multipart content type, handling
/// quoted and unquoted forms.
fn boundary_param(content_type: &str) -> Option<String> {
    let idx = content_type.find("boundary=")?;
    let rest = content_type[idx + "boundary=".len()..].trim_start();
    if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let inner = &rest[1..];
        match inner.find(quote) {
            Some(end) => Some(inner[..end].to_string()),
            None => Some(inner.trim().to_string()),
        }
    } else {
        let end = rest.find(';').unwrap_or(rest.len());
        Some(rest[..end].trim().to_string())
    }
}

fn parse_multipart_parts(req: &mut Request, boundary: &str, body: &[u8]) -> bool {
    let delim = format!("--{}", boundary).into_bytes();
    let mut pos = match find_subslice(body, &delim) {
        Some(first) => first + delim.len(),
        None => {
            req.set_error(400, "Bad Request - Boundary not found in body");
            return false;
        }
    };
    // A delimiter inside a part only counts when preceded by CRLF.
    let mut marker = b"\r\n".to_vec();
    marker.extend_from_slice(&delim);

    loop {
        if body[pos..].starts_with(b"--") {
            // Close marker; anything after it is epilogue.
            return true;
        }
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
        let headers_end = match find_subslice(&body[pos..], b"\r\n\r\n") {
            Some(end) => end,
            None => {
                req.set_error(400, "Bad Request - Malformed multipart headers");
                return false;
            }
        };
        let header_block = &body[pos..pos + headers_end + 4];
        let body_start = pos + headers_end + 4;
        let body_len = match find_subslice(&body[body_start..], &marker) {
            Some(len) => len,
            None => {
                req.set_error(400, "Bad Request - Next boundary not found");
                return false;
            }
        };
        if !parse_multipart_part(req, header_block, &body[body_start..body_start + body_len]) {
            return false;
        }
        pos = body_start + body_len + marker.len();
    }
}

fn parse_multipart_part(req: &mut Request, header_block: &[u8], part_body: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
    let mut disposition = None;
    let mut content_type = "";
    match httparse::parse_headers(header_block, &mut headers) {
        Ok(httparse::Status::Complete((_, parsed))) => {
            for header in parsed {
                if header.name.eq_ignore_ascii_case("content-disposition") {
                    disposition = str::from_utf8(header.value).ok();
                } else if header.name.eq_ignore_ascii_case("content-type") {
                    content_type = str::from_utf8(header.value).unwrap_or("");
                }
            }
        }
        _ => {
            req.set_error(400, "Bad Request - Malformed multipart headers");
            return false;
        }
    }
    let disposition = match disposition {
        Some(d) => d,
        None => {
            req.set_error(400, "Bad Request - Missing Content-Disposition in part");
            return false;
        }
    };

    let mut name = None;
    let mut filename = None;
    for param in disposition.split(';') {
        let param = param.trim();
        if let Some(v) = param.strip_prefix("filename=") {
            filename = Some(unquote(v));
        } else if let Some(v) = param.strip_prefix("name=") {
            name = Some(unquote(v));
        }
    }
    let name = match name {
        Some(n) if !n.is_empty() => n,
        _ => {
            req.set_error(400, "Bad Request - multipart field name missing");
            return false;
        }
    };
    match filename {
        Some(filename) => req.add_uploaded_file(&name, &filename, content_type, part_body),
        None => {
            let value = String::from_utf8_lossy(part_body).into_owned();
            req.add_form_field(&name, &value);
        }
    }
    true
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::super::request::{Request, RequestState};
    use super::super::Method;
    use super::*;

    struct Feed {
        parser: Parser,
        req: Request,
        buf: Vec<u8>,
    }

    impl Feed {
        fn new() -> Feed {
            Feed {
                parser: Parser::new(),
                req: Request::new(),
                buf: Vec::new(),
            }
        }

        fn push(&mut self, bytes: &[u8]) -> bool {
            self.buf.extend_from_slice(bytes);
            self.parser.advance(&mut self.req, &self.buf)
        }
    }

    #[test]
    fn simple_get() {
        let mut f = Feed::new();
        assert!(f.push(b"GET /index.html?x=1 HTTP/1.1\r\nHost: localhost\r\n\r\n"));
        assert!(f.req.is_complete());
        assert_eq!(f.req.method, Method::Get);
        assert_eq!(f.req.path, "/index.html");
        assert_eq!(f.req.query_string, "x=1");
        assert_eq!(f.req.version, "HTTP/1.1");
        assert_eq!(f.req.header("HOST"), Some("localhost"));
    }

    #[test]
    fn request_arrives_byte_by_byte() {
        let mut f = Feed::new();
        let wire = b"POST /submit HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello";
        for b in wire.iter() {
            assert!(f.push(std::slice::from_ref(b)));
        }
        assert!(f.req.is_complete());
        assert_eq!(f.req.body, b"hello");
    }

    #[test]
    fn absolute_form_target() {
        let mut f = Feed::new();
        assert!(f.push(b"GET http://example.com:81/x?q=1 HTTP/1.1\r\nHost: h\r\n\r\n"));
        assert!(f.req.is_complete());
        assert_eq!(f.req.host, "example.com");
        assert_eq!(f.req.port, 81);
        assert_eq!(f.req.path, "/x");
        assert_eq!(f.req.query_string, "q=1");
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut f = Feed::new();
        assert!(!f.push(b"PATCH / HTTP/1.1\r\n\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn bad_target_and_version() {
        let mut f = Feed::new();
        assert!(!f.push(b"GET index.html HTTP/1.1\r\n\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);

        let mut f = Feed::new();
        assert!(!f.push(b"GET / HTTP/one.1\r\n\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);

        let mut f = Feed::new();
        assert!(!f.push(b"GET / HTTP/1.1 extra\r\n\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn request_line_length_boundary() {
        // Exactly at the ceiling parses.
        let mut line = b"GET /".to_vec();
        line.extend(std::iter::repeat(b'a').take(MAX_REQUEST_LINE - 14));
        line.extend_from_slice(b" HTTP/1.1");
        assert_eq!(line.len(), MAX_REQUEST_LINE);
        let mut f = Feed::new();
        line.extend_from_slice(b"\r\nHost: h\r\n\r\n");
        assert!(f.push(&line));
        assert!(f.req.is_complete());

        // One byte over answers 414.
        let mut line = b"GET /".to_vec();
        line.extend(std::iter::repeat(b'a').take(MAX_REQUEST_LINE - 13));
        line.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let mut f = Feed::new();
        assert!(!f.push(&line));
        assert_eq!(f.req.error().unwrap().code, 414);
    }

    #[test]
    fn overlong_line_without_terminator_is_rejected_early() {
        let mut f = Feed::new();
        let flood = vec![b'a'; MAX_REQUEST_LINE + 2];
        assert!(!f.push(&flood));
        assert_eq!(f.req.error().unwrap().code, 414);
    }

    #[test]
    fn header_name_with_space_is_rejected() {
        let mut f = Feed::new();
        assert!(!f.push(b"GET / HTTP/1.1\r\nBad Header: x\r\n\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn header_without_colon_is_rejected() {
        let mut f = Feed::new();
        assert!(!f.push(b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn header_whitespace_is_trimmed() {
        let mut f = Feed::new();
        assert!(f.push(b"GET / HTTP/1.1\r\nHost:   spaced.example   \r\n\r\n"));
        assert_eq!(f.req.header("host"), Some("spaced.example"));
    }

    #[test]
    fn non_numeric_content_length_is_rejected() {
        let mut f = Feed::new();
        assert!(!f.push(b"POST / HTTP/1.1\r\nContent-Length: 12a\r\n\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn too_many_headers() {
        let mut f = Feed::new();
        assert!(f.push(b"GET / HTTP/1.1\r\n"));
        let mut ok = true;
        for i in 0..=MAX_HEADERS_NUM {
            ok = f.push(format!("X-Filler-{}: v\r\n", i).as_bytes());
            if !ok {
                break;
            }
        }
        assert!(!ok);
        assert_eq!(f.req.error().unwrap().code, 431);
    }

    #[test]
    fn post_with_zero_length_completes_after_headers() {
        let mut f = Feed::new();
        assert!(f.push(b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 0\r\n\r\n"));
        assert!(f.req.is_complete());
        assert!(f.req.body.is_empty());
    }

    #[test]
    fn get_ignores_body_headers() {
        let mut f = Feed::new();
        assert!(f.push(b"GET / HTTP/1.1\r\nContent-Length: 5\r\n\r\n"));
        assert!(f.req.is_complete());
        assert!(f.req.body.is_empty());
    }

    #[test]
    fn identity_body_split_across_reads() {
        let mut f = Feed::new();
        assert!(f.push(b"POST /u HTTP/1.1\r\nContent-Length: 11\r\n\r\nHello"));
        assert_eq!(f.req.state(), RequestState::ParsingBody);
        assert!(f.push(b" World"));
        assert!(f.req.is_complete());
        assert_eq!(f.req.body, b"Hello World");
    }

    #[test]
    fn chunked_body() {
        let mut f = Feed::new();
        assert!(f.push(
            b"POST /upload/ HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n"
        ));
        assert!(f.req.is_complete());
        assert_eq!(f.req.body, b"Hello World");
    }

    #[test]
    fn chunked_body_dribbled_in() {
        let mut f = Feed::new();
        assert!(f.push(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"));
        assert!(f.push(b"4\r\nWi"));
        assert!(f.push(b"ki\r\n"));
        assert!(f.push(b"5\r\npedia\r\n"));
        assert!(f.push(b"0\r\n"));
        assert!(!f.req.is_complete());
        assert!(f.push(b"\r\n"));
        assert!(f.req.is_complete());
        assert_eq!(f.req.body, b"Wikipedia");
    }

    #[test]
    fn chunk_sizes_are_hex_with_extensions() {
        let mut f = Feed::new();
        assert!(f.push(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              b;name=value\r\nhello world\r\n0\r\n\r\n"
        ));
        assert!(f.req.is_complete());
        assert_eq!(f.req.body, b"hello world");
    }

    #[test]
    fn chunked_trailers_are_consumed_but_dropped() {
        let mut f = Feed::new();
        assert!(f.push(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              3\r\nabc\r\n0\r\nExpires: never\r\n\r\n"
        ));
        assert!(f.req.is_complete());
        assert_eq!(f.req.body, b"abc");
        assert!(f.req.header("expires").is_none());
    }

    #[test]
    fn bad_chunk_size_is_rejected() {
        let mut f = Feed::new();
        assert!(!f.push(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn chunk_without_trailing_crlf_is_rejected() {
        let mut f = Feed::new();
        assert!(!f.push(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabcXY"));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    fn multipart_request(boundary_attr: &str, payload: &str) -> Vec<u8> {
        let mut wire = format!(
            "POST /upload/ HTTP/1.1\r\nHost: h\r\n\
             Content-Type: multipart/form-data; boundary={}\r\n\
             Content-Length: {}\r\n\r\n",
            boundary_attr,
            payload.len()
        )
        .into_bytes();
        wire.extend_from_slice(payload.as_bytes());
        wire
    }

    #[test]
    fn multipart_file_and_field() {
        let payload = "--sep\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             a note\r\n\
             --sep\r\n\
             Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             file bytes\r\n\
             --sep--\r\n";
        let mut f = Feed::new();
        assert!(f.push(&multipart_request("sep", payload)));
        assert!(f.req.is_complete());
        assert_eq!(f.req.form_fields.get("note").map(|s| &s[..]), Some("a note"));
        assert_eq!(f.req.uploaded_files.len(), 1);
        let file = &f.req.uploaded_files[0];
        assert_eq!(file.field_name, "doc");
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.data, b"file bytes");
        assert_eq!(f.req.uploaded_files.len() + f.req.form_fields.len(), 2);
    }

    #[test]
    fn multipart_quoted_boundary() {
        let payload = "--q1\r\n\
             Content-Disposition: form-data; name=\"k\"\r\n\r\n\
             v\r\n\
             --q1--\r\n";
        let mut f = Feed::new();
        assert!(f.push(&multipart_request("\"q1\"", payload)));
        assert!(f.req.is_complete());
        assert_eq!(f.req.form_fields.get("k").map(|s| &s[..]), Some("v"));
    }

    #[test]
    fn boundary_text_inside_part_body_splits_parts() {
        // "--sep" occurs mid-body but only the CRLF-prefixed one delimits.
        let payload = "--sep\r\n\
             Content-Disposition: form-data; name=\"a\"\r\n\r\n\
             contains --sep inline\r\n\
             --sep\r\n\
             Content-Disposition: form-data; name=\"b\"\r\n\r\n\
             second\r\n\
             --sep--\r\n";
        let mut f = Feed::new();
        assert!(f.push(&multipart_request("sep", payload)));
        assert!(f.req.is_complete());
        assert_eq!(
            f.req.form_fields.get("a").map(|s| &s[..]),
            Some("contains --sep inline")
        );
        assert_eq!(f.req.form_fields.get("b").map(|s| &s[..]), Some("second"));
    }

    #[test]
    fn multipart_part_without_name_is_rejected() {
        let payload = "--sep\r\n\
             Content-Disposition: form-data\r\n\r\n\
             orphan\r\n\
             --sep--\r\n";
        let mut f = Feed::new();
        assert!(!f.push(&multipart_request("sep", payload)));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn multipart_without_boundary_param_is_rejected() {
        let mut f = Feed::new();
        assert!(!f.push(
            b"POST / HTTP/1.1\r\nContent-Type: multipart/form-data\r\nContent-Length: 4\r\n\r\nabcd"
        ));
        assert_eq!(f.req.error().unwrap().code, 400);
    }

    #[test]
    fn reset_makes_the_parser_reusable() {
        let mut f = Feed::new();
        assert!(f.push(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(f.req.is_complete());
        f.parser.reset();
        f.req.clear();
        f.buf.clear();
        assert!(f.push(b"GET /two HTTP/1.1\r\n\r\n"));
        assert!(f.req.is_complete());
        assert_eq!(f.req.path, "/two");
    }
}
