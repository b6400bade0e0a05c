//! Lexer for the nginx-style configuration syntax.
//!
//! The grammar only needs four token kinds: bare words, braces and the
//! directive-terminating semicolon. Comments run from `#` to end of line.
//! Double-quoted strings become words with the quotes stripped, so paths
//! with unusual characters stay representable.

use super::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    LBrace,
    RBrace,
    Semicolon,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '?' | '=' | '&' | '%' | '~')
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, ConfigError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            _ if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '{' => {
                tokens.push(Token::LBrace);
                chars.next();
            }
            '}' => {
                tokens.push(Token::RBrace);
                chars.next();
            }
            ';' => {
                tokens.push(Token::Semicolon);
                chars.next();
            }
            '"' => {
                chars.next();
                let mut word = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(ConfigError::Syntax(
                                line,
                                "unterminated quoted string".to_string(),
                            ));
                        }
                        Some(c) => word.push(c),
                    }
                }
                tokens.push(Token::Word(word));
            }
            _ if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_word_char(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => {
                return Err(ConfigError::Syntax(
                    line,
                    format!("unexpected character '{}'", other),
                ));
            }
        }
    }
    Ok(tokens)
}
