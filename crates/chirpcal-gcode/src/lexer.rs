use serde::Serialize;
use thiserror::Error;

/// One lexeme of a firmware reply line. `start`/`end` are byte offsets into
/// the line, `column` is 1-based in characters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub column: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "value")]
pub enum TokenKind {
    /// `NAME:` field label; the value is whatever follows up to the next key.
    Key(String),
    /// Single upper-case letter immediately followed by a number, `X80.00`.
    Word { letter: char, value: f64 },
    Number(f64),
    Text(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum LexError {
    #[error("invalid number in '{raw}' at column {column}")]
    InvalidNumber {
        column: usize,
        raw: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

pub fn lex(line: &str) -> Lexer<'_> {
    Lexer::new(line)
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn column(&self, offset: usize) -> usize {
        self.input[..offset].chars().count() + 1
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn token(&mut self, kind: TokenKind, start: usize, end: usize) -> Token {
        self.pos = end;
        Token {
            kind,
            column: self.column(start),
            start,
            end,
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.pos;
        let rest = &self.input[start..];
        if rest.is_empty() {
            return None;
        }
        let run = &rest[..rest.find(char::is_whitespace).unwrap_or(rest.len())];
        let end = start + run.len();

        if run.starts_with(|c: char| c.is_ascii_uppercase()) {
            let ident = run
                .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
                .unwrap_or(run.len());
            if run[ident..].starts_with(':') {
                let key = TokenKind::Key(run[..ident].to_string());
                return Some(Ok(self.token(key, start, start + ident + 1)));
            }

            let tail = &run[1..];
            if looks_numeric(tail) {
                let letter = run.chars().next().unwrap_or_default();
                return Some(match tail.parse::<f64>() {
                    Ok(value) => Ok(self.token(TokenKind::Word { letter, value }, start, end)),
                    Err(source) => {
                        self.pos = end;
                        Err(LexError::InvalidNumber {
                            column: self.column(start),
                            raw: run.to_string(),
                            source,
                        })
                    }
                });
            }
        }

        let kind = match run.parse::<f64>() {
            Ok(value) if looks_numeric(run) => TokenKind::Number(value),
            _ => TokenKind::Text(run.to_string()),
        };
        Some(Ok(self.token(kind, start, end)))
    }
}

/// Digit first, or a sign/point directly followed by one.
fn looks_numeric(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+' | '-') => match chars.next() {
            Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
            next => next.is_some_and(|c| c.is_ascii_digit()),
        },
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}
