//! Configuration data model and the nginx-style file loader.
//!
//! The router and event loop consume the records in this module; the
//! `tokenizer`/`parser` pair turns the declarative config file into them.

pub mod parser;
pub mod tokenizer;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::http::Method;

quick_error! {
    /// Why a configuration could not be loaded. Rendered once on stderr by
    /// the binary, which then exits 1.
    #[derive(Debug)]
    pub enum ConfigError {
        Io(err: io::Error) {
            from()
            display("cannot read configuration: {}", err)
        }
        Syntax(line: usize, msg: String) {
            display("syntax error on line {}: {}", line, msg)
        }
        Directive(msg: String) {
            display("invalid configuration: {}", msg)
        }
    }
}

/// One `server { ... }` block: a virtual host bound to a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_port: u16,
    pub server_name: String,
    /// Status code to error-page URI, resolved through the locations.
    pub error_pages: HashMap<u16, String>,
    /// Upper bound for request bodies in bytes; 0 means unbounded.
    pub client_max_body_size: usize,
    pub locations: Vec<LocationConfig>,
}

/// One `location <prefix> { ... }` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationConfig {
    /// The matching URL-path prefix, e.g. `/` or `/api/`.
    pub path: String,
    pub root: String,
    pub index: Vec<String>,
    pub autoindex: bool,
    pub allow_methods: Vec<Method>,
    /// Directory uploads are persisted under; empty disables persistence.
    pub upload_store: String,
    /// Interpreter path; non-empty turns the location into a CGI target.
    pub cgi_pass: String,
    /// 0, or a 3xx code making this location a redirect.
    pub return_code: u16,
    pub return_url: String,
}

impl LocationConfig {
    pub fn new(path: &str) -> LocationConfig {
        LocationConfig {
            path: path.to_string(),
            root: String::new(),
            index: Vec::new(),
            autoindex: false,
            allow_methods: Vec::new(),
            upload_store: String::new(),
            cgi_pass: String::new(),
            return_code: 0,
            return_url: String::new(),
        }
    }

    pub fn allows(&self, method: Method) -> bool {
        self.allow_methods.contains(&method)
    }

    /// A location with `return 3xx <url>` ignores all other directives.
    pub fn is_redirect(&self) -> bool {
        (300..=399).contains(&self.return_code) && !self.return_url.is_empty()
    }
}

/// Load and validate a configuration file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<ServerConfig>, ConfigError> {
    let text = fs::read_to_string(path)?;
    parse_str(&text)
}

/// Parse configuration text into validated server records.
pub fn parse_str(input: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let tokens = tokenizer::tokenize(input)?;
    parser::parse_tokens(&tokens)
}

/// Parse a byte count with an optional `K`/`M`/`G` suffix
/// (case-insensitive).
pub fn parse_body_size(text: &str) -> Result<usize, ConfigError> {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().next_back().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&text[..text.len() - 1], 1024),
        Some('M') => (&text[..text.len() - 1], 1024 * 1024),
        Some('G') => (&text[..text.len() - 1], 1024 * 1024 * 1024),
        Some(_) => (text, 1),
        None => {
            return Err(ConfigError::Directive(
                "client_max_body_size needs a value".to_string(),
            ));
        }
    };
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| {
            ConfigError::Directive(format!("bad client_max_body_size value '{}'", text))
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn body_size_suffixes() {
        assert_eq!(parse_body_size("0").unwrap(), 0);
        assert_eq!(parse_body_size("1048576").unwrap(), 1048576);
        assert_eq!(parse_body_size("8K").unwrap(), 8192);
        assert_eq!(parse_body_size("2m").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_body_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_body_size("12Q").is_err());
        assert!(parse_body_size("").is_err());
        assert!(parse_body_size("K").is_err());
    }

    #[test]
    fn redirect_needs_code_and_url() {
        let mut loc = LocationConfig::new("/old/");
        assert!(!loc.is_redirect());
        loc.return_code = 301;
        assert!(!loc.is_redirect());
        loc.return_url = "/new".to_string();
        assert!(loc.is_redirect());
        loc.return_code = 404;
        assert!(!loc.is_redirect());
    }
}
