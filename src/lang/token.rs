//! Lexer for KaRL source text.
//!
//! Tokenization strips `//` and `/* */` comments, keeps byte spans for
//! error reporting and for the parser's adjacency checks (dynamic variable
//! names like `agent{.i}.state` only compose when the fragments touch).

use crate::error::{CompileError, KarlError, KarlResult};

/// Byte range of a token in the source text.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexed token.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Token kinds of the KaRL surface grammar.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Double(f64),
    Text(String),
    Identifier(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Increment,
    Decrement,

    And,
    Or,
    Not,

    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    Assign,
    Implies,

    Semicolon,
    ReturnRight,
    Comma,
    Arrow,

    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
}

impl TokenKind {
    /// Short description used in parse error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Integer(v) => format!("integer {v}"),
            Self::Double(v) => format!("double {v}"),
            Self::Text(_) => "string literal".to_string(),
            Self::Identifier(name) => format!("identifier '{name}'"),
            Self::Plus => "'+'".to_string(),
            Self::Minus => "'-'".to_string(),
            Self::Star => "'*'".to_string(),
            Self::Slash => "'/'".to_string(),
            Self::Percent => "'%'".to_string(),
            Self::PlusAssign => "'+='".to_string(),
            Self::MinusAssign => "'-='".to_string(),
            Self::StarAssign => "'*='".to_string(),
            Self::SlashAssign => "'/='".to_string(),
            Self::Increment => "'++'".to_string(),
            Self::Decrement => "'--'".to_string(),
            Self::And => "'&&'".to_string(),
            Self::Or => "'||'".to_string(),
            Self::Not => "'!'".to_string(),
            Self::Equal => "'=='".to_string(),
            Self::NotEqual => "'!='".to_string(),
            Self::Less => "'<'".to_string(),
            Self::LessEqual => "'<='".to_string(),
            Self::Greater => "'>'".to_string(),
            Self::GreaterEqual => "'>='".to_string(),
            Self::Assign => "'='".to_string(),
            Self::Implies => "'=>'".to_string(),
            Self::Semicolon => "';'".to_string(),
            Self::ReturnRight => "';>'".to_string(),
            Self::Comma => "','".to_string(),
            Self::Arrow => "'->'".to_string(),
            Self::LeftParen => "'('".to_string(),
            Self::RightParen => "')'".to_string(),
            Self::LeftBracket => "'['".to_string(),
            Self::RightBracket => "']'".to_string(),
            Self::LeftBrace => "'{'".to_string(),
            Self::RightBrace => "'}'".to_string(),
        }
    }
}

fn is_identifier_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'.'
}

fn is_identifier_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

/// Tokenizes KaRL source text.
pub fn tokenize(source: &str) -> KarlResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn run(mut self) -> KarlResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }
            if c == b'/' && self.peek_at(1) == Some(b'/') {
                self.skip_line_comment();
                continue;
            }
            if c == b'/' && self.peek_at(1) == Some(b'*') {
                self.skip_block_comment()?;
                continue;
            }
            let token = match c {
                b'\'' | b'"' => self.lex_string(c)?,
                b'0'..=b'9' => self.lex_number()?,
                b'.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => self.lex_number()?,
                c if is_identifier_start(c) => self.lex_identifier(),
                _ => self.lex_operator()?,
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> KarlResult<()> {
        let start = self.pos;
        self.pos += 2;
        while let Some(c) = self.peek() {
            if c == b'*' && self.peek_at(1) == Some(b'/') {
                self.pos += 2;
                return Ok(());
            }
            self.pos += 1;
        }
        Err(CompileError::UnterminatedComment { position: start }.into())
    }

    fn lex_string(&mut self, quote: u8) -> KarlResult<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(CompileError::UnterminatedString { position: start }.into()),
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    let escaped = self
                        .peek_at(1)
                        .ok_or(CompileError::UnterminatedString { position: start })?;
                    text.push(match escaped {
                        b'n' => '\n',
                        b't' => '\t',
                        b'r' => '\r',
                        other => other as char,
                    });
                    self.pos += 2;
                }
                Some(c) => {
                    text.push(c as char);
                    self.pos += 1;
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Text(text),
            span: Span {
                start,
                end: self.pos,
            },
        })
    }

    fn lex_number(&mut self) -> KarlResult<Token> {
        let start = self.pos;
        let mut is_double = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !is_double && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    is_double = true;
                    self.pos += 1;
                }
                b'e' | b'E'
                    if self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                        || (matches!(self.peek_at(1), Some(b'+' | b'-'))
                            && self.peek_at(2).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    is_double = true;
                    self.pos += if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                        2
                    } else {
                        1
                    };
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| KarlError::syntax("invalid numeric literal", start))?;
        let span = Span {
            start,
            end: self.pos,
        };
        let kind = if is_double {
            TokenKind::Double(
                text.parse::<f64>()
                    .map_err(|_| KarlError::syntax(format!("invalid double '{text}'"), start))?,
            )
        } else {
            TokenKind::Integer(
                text.parse::<i64>()
                    .map_err(|_| KarlError::syntax(format!("invalid integer '{text}'"), start))?,
            )
        };
        Ok(Token { kind, span })
    }

    fn lex_identifier(&mut self) -> Token {
        let start = self.pos;
        self.pos += 1;
        while self.peek().is_some_and(is_identifier_continue) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or_default()
            .to_string();
        Token {
            kind: TokenKind::Identifier(name),
            span: Span {
                start,
                end: self.pos,
            },
        }
    }

    fn lex_operator(&mut self) -> KarlResult<Token> {
        let start = self.pos;
        let c = self.src[self.pos];
        let next = self.peek_at(1);
        let (kind, len) = match (c, next) {
            (b'&', Some(b'&')) => (TokenKind::And, 2),
            (b'|', Some(b'|')) => (TokenKind::Or, 2),
            (b'=', Some(b'=')) => (TokenKind::Equal, 2),
            (b'=', Some(b'>')) => (TokenKind::Implies, 2),
            (b'=', _) => (TokenKind::Assign, 1),
            (b'!', Some(b'=')) => (TokenKind::NotEqual, 2),
            (b'!', _) => (TokenKind::Not, 1),
            (b'<', Some(b'=')) => (TokenKind::LessEqual, 2),
            (b'<', _) => (TokenKind::Less, 1),
            (b'>', Some(b'=')) => (TokenKind::GreaterEqual, 2),
            (b'>', _) => (TokenKind::Greater, 1),
            (b'+', Some(b'=')) => (TokenKind::PlusAssign, 2),
            (b'+', Some(b'+')) => (TokenKind::Increment, 2),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', Some(b'=')) => (TokenKind::MinusAssign, 2),
            (b'-', Some(b'-')) => (TokenKind::Decrement, 2),
            (b'-', Some(b'>')) => (TokenKind::Arrow, 2),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', Some(b'=')) => (TokenKind::StarAssign, 2),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', Some(b'=')) => (TokenKind::SlashAssign, 2),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b';', Some(b'>')) => (TokenKind::ReturnRight, 2),
            (b';', _) => (TokenKind::Semicolon, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b'(', _) => (TokenKind::LeftParen, 1),
            (b')', _) => (TokenKind::RightParen, 1),
            (b'[', _) => (TokenKind::LeftBracket, 1),
            (b']', _) => (TokenKind::RightBracket, 1),
            (b'{', _) => (TokenKind::LeftBrace, 1),
            (b'}', _) => (TokenKind::RightBrace, 1),
            _ => {
                return Err(KarlError::syntax(
                    format!("unexpected character '{}'", c as char),
                    start,
                ))
            }
        };
        self.pos += len;
        Ok(Token {
            kind,
            span: Span {
                start,
                end: self.pos,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_operators() {
        assert_eq!(
            kinds("a += 1 ;> b"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::PlusAssign,
                TokenKind::Integer(1),
                TokenKind::ReturnRight,
                TokenKind::Identifier("b".into()),
            ]
        );
        assert_eq!(
            kinds("&& || == != <= >= => -> ++ --"),
            vec![
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::Implies,
                TokenKind::Arrow,
                TokenKind::Increment,
                TokenKind::Decrement,
            ]
        );
    }

    #[test]
    fn lexes_local_identifiers() {
        assert_eq!(
            kinds(".var1 = 8"),
            vec![
                TokenKind::Identifier(".var1".into()),
                TokenKind::Assign,
                TokenKind::Integer(8),
            ]
        );
    }

    #[test]
    fn dot_digit_is_a_double() {
        assert_eq!(kinds(".5"), vec![TokenKind::Double(0.5)]);
        assert_eq!(kinds("1.25"), vec![TokenKind::Double(1.25)]);
        assert_eq!(kinds("2e3"), vec![TokenKind::Double(2000.0)]);
    }

    #[test]
    fn lexes_strings_with_both_quotes() {
        assert_eq!(
            kinds(r#"'hi' "there""#),
            vec![
                TokenKind::Text("hi".into()),
                TokenKind::Text("there".into()),
            ]
        );
        assert_eq!(kinds(r"'a\nb'"), vec![TokenKind::Text("a\nb".into())]);
    }

    #[test]
    fn strips_comments() {
        assert_eq!(
            kinds("1 // trailing\n+ /* inner */ 2"),
            vec![TokenKind::Integer(1), TokenKind::Plus, TokenKind::Integer(2)]
        );
    }

    #[test]
    fn unterminated_string_fails() {
        let err = tokenize("'oops").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn unterminated_comment_fails() {
        let err = tokenize("1 + /* oops").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn unknown_character_fails() {
        assert!(tokenize("a $ b").is_err());
        assert!(tokenize("a & b").is_err());
    }

    #[test]
    fn spans_track_bytes() {
        let tokens = tokenize("ab {").unwrap();
        assert_eq!(tokens[0].span, Span { start: 0, end: 2 });
        assert_eq!(tokens[1].span, Span { start: 3, end: 4 });
    }

    #[test]
    fn for_loop_range_tokens() {
        assert_eq!(
            kinds(".i[0->10)"),
            vec![
                TokenKind::Identifier(".i".into()),
                TokenKind::LeftBracket,
                TokenKind::Integer(0),
                TokenKind::Arrow,
                TokenKind::Integer(10),
                TokenKind::RightParen,
            ]
        );
        assert_eq!(
            kinds(".i[0-2>10]"),
            vec![
                TokenKind::Identifier(".i".into()),
                TokenKind::LeftBracket,
                TokenKind::Integer(0),
                TokenKind::Minus,
                TokenKind::Integer(2),
                TokenKind::Greater,
                TokenKind::Integer(10),
                TokenKind::RightBracket,
            ]
        );
    }
}
