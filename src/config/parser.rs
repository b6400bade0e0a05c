//! Recursive-descent parser for the tokenized configuration.
//!
//! Top level is a sequence of `server` blocks; inside each, plain
//! directives end with `;` and `location` opens a nested block. All
//! validation that the data model relies on happens here, so the router
//! and event loop can trust the records they are handed.

use super::tokenizer::Token;
use super::{parse_body_size, ConfigError, LocationConfig, ServerConfig};
use crate::http::Method;

struct TokenStream<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenStream<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_word(&mut self, what: &str) -> Result<&'a str, ConfigError> {
        match self.next() {
            Some(Token::Word(word)) => Ok(word),
            other => Err(unexpected(what, other)),
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ConfigError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(unexpected(what, other)),
        }
    }

    /// Directive values: every word up to the terminating semicolon.
    fn words_until_semicolon(&mut self, directive: &str) -> Result<Vec<&'a str>, ConfigError> {
        let mut words = Vec::new();
        loop {
            match self.next() {
                Some(Token::Word(word)) => words.push(&word[..]),
                Some(Token::Semicolon) => return Ok(words),
                other => return Err(unexpected(&format!("';' after '{}'", directive), other)),
            }
        }
    }
}

fn unexpected(what: &str, got: Option<&Token>) -> ConfigError {
    let got = match got {
        Some(Token::Word(word)) => format!("'{}'", word),
        Some(Token::LBrace) => "'{'".to_string(),
        Some(Token::RBrace) => "'}'".to_string(),
        Some(Token::Semicolon) => "';'".to_string(),
        None => "end of file".to_string(),
    };
    ConfigError::Directive(format!("expected {}, got {}", what, got))
}

pub fn parse_tokens(tokens: &[Token]) -> Result<Vec<ServerConfig>, ConfigError> {
    let mut ts = TokenStream { tokens, pos: 0 };
    let mut servers = Vec::new();
    while let Some(token) = ts.peek() {
        match token {
            Token::Word(word) if word == "server" => {
                ts.next();
                servers.push(parse_server(&mut ts)?);
            }
            other => return Err(unexpected("'server' block at top level", Some(other))),
        }
    }
    if servers.is_empty() {
        return Err(ConfigError::Directive(
            "configuration declares no server".to_string(),
        ));
    }
    Ok(servers)
}

fn parse_server(ts: &mut TokenStream) -> Result<ServerConfig, ConfigError> {
    ts.expect(&Token::LBrace, "'{' after 'server'")?;
    let mut server = ServerConfig {
        listen_port: 0,
        server_name: String::new(),
        error_pages: Default::default(),
        client_max_body_size: 0,
        locations: Vec::new(),
    };
    let mut listen_seen = false;

    loop {
        match ts.peek() {
            Some(Token::RBrace) => {
                ts.next();
                break;
            }
            Some(Token::Word(word)) if word == "location" => {
                ts.next();
                server.locations.push(parse_location(ts)?);
            }
            Some(Token::Word(_)) => {
                let directive = ts.expect_word("directive")?;
                let values = ts.words_until_semicolon(directive)?;
                apply_server_directive(&mut server, &mut listen_seen, directive, &values)?;
            }
            other => return Err(unexpected("directive or '}' in server block", other)),
        }
    }

    if !listen_seen {
        return Err(ConfigError::Directive(
            "server block is missing its 'listen' directive".to_string(),
        ));
    }
    if server.locations.is_empty() {
        return Err(ConfigError::Directive(format!(
            "server on port {} declares no location",
            server.listen_port
        )));
    }
    Ok(server)
}

fn apply_server_directive(
    server: &mut ServerConfig,
    listen_seen: &mut bool,
    directive: &str,
    values: &[&str],
) -> Result<(), ConfigError> {
    match directive {
        "listen" => {
            if *listen_seen {
                return Err(ConfigError::Directive(
                    "duplicate 'listen' directive".to_string(),
                ));
            }
            let port = one_value(directive, values)?
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| {
                    ConfigError::Directive(format!("bad listen port '{}'", values.join(" ")))
                })?;
            server.listen_port = port;
            *listen_seen = true;
        }
        "server_name" => {
            server.server_name = one_value(directive, values)?.to_string();
        }
        "client_max_body_size" => {
            server.client_max_body_size = parse_body_size(one_value(directive, values)?)?;
        }
        "error_page" => {
            if values.len() != 2 {
                return Err(ConfigError::Directive(
                    "error_page takes a status code and a URI".to_string(),
                ));
            }
            let code = values[0]
                .parse::<u16>()
                .ok()
                .filter(|c| (400..=599).contains(c))
                .ok_or_else(|| {
                    ConfigError::Directive(format!("bad error_page code '{}'", values[0]))
                })?;
            server.error_pages.insert(code, values[1].to_string());
        }
        other => {
            return Err(ConfigError::Directive(format!(
                "unknown server directive '{}'",
                other
            )));
        }
    }
    Ok(())
}

fn parse_location(ts: &mut TokenStream) -> Result<LocationConfig, ConfigError> {
    let prefix = ts.expect_word("location path")?;
    if !prefix.starts_with('/') {
        return Err(ConfigError::Directive(format!(
            "location prefix '{}' must start with '/'",
            prefix
        )));
    }
    ts.expect(&Token::LBrace, "'{' after location path")?;
    let mut location = LocationConfig::new(prefix);

    loop {
        match ts.peek() {
            Some(Token::RBrace) => {
                ts.next();
                break;
            }
            Some(Token::Word(_)) => {
                let directive = ts.expect_word("directive")?;
                let values = ts.words_until_semicolon(directive)?;
                apply_location_directive(&mut location, directive, &values)?;
            }
            other => return Err(unexpected("directive or '}' in location block", other)),
        }
    }

    if location.allow_methods.is_empty() {
        // Locations without an allow_methods directive accept everything.
        location.allow_methods = vec![Method::Get, Method::Post, Method::Delete];
    }
    Ok(location)
}

fn apply_location_directive(
    location: &mut LocationConfig,
    directive: &str,
    values: &[&str],
) -> Result<(), ConfigError> {
    match directive {
        "root" => location.root = one_value(directive, values)?.to_string(),
        "upload_store" => location.upload_store = one_value(directive, values)?.to_string(),
        "cgi_pass" => location.cgi_pass = one_value(directive, values)?.to_string(),
        "index" => {
            if values.is_empty() {
                return Err(ConfigError::Directive(
                    "index needs at least one filename".to_string(),
                ));
            }
            location.index = values.iter().map(|v| v.to_string()).collect();
        }
        "autoindex" => match one_value(directive, values)? {
            "on" => location.autoindex = true,
            "off" => location.autoindex = false,
            other => {
                return Err(ConfigError::Directive(format!(
                    "autoindex is 'on' or 'off', not '{}'",
                    other
                )));
            }
        },
        "allow_methods" => {
            if values.is_empty() {
                return Err(ConfigError::Directive(
                    "allow_methods needs at least one method".to_string(),
                ));
            }
            for value in values {
                let method = Method::parse(value);
                if method == Method::Unknown {
                    return Err(ConfigError::Directive(format!(
                        "unknown method '{}' in allow_methods",
                        value
                    )));
                }
                if location.allow_methods.contains(&method) {
                    return Err(ConfigError::Directive(format!(
                        "method '{}' listed twice in allow_methods",
                        value
                    )));
                }
                location.allow_methods.push(method);
            }
        }
        "return" => {
            if values.len() != 2 {
                return Err(ConfigError::Directive(
                    "return takes a 3xx code and a URL".to_string(),
                ));
            }
            let code = values[0]
                .parse::<u16>()
                .ok()
                .filter(|c| (300..=399).contains(c))
                .ok_or_else(|| {
                    ConfigError::Directive(format!("bad return code '{}'", values[0]))
                })?;
            location.return_code = code;
            location.return_url = values[1].to_string();
        }
        other => {
            return Err(ConfigError::Directive(format!(
                "unknown location directive '{}'",
                other
            )));
        }
    }
    Ok(())
}

fn one_value<'a>(directive: &str, values: &[&'a str]) -> Result<&'a str, ConfigError> {
    if values.len() == 1 {
        Ok(values[0])
    } else {
        Err(ConfigError::Directive(format!(
            "'{}' takes exactly one value",
            directive
        )))
    }
}
