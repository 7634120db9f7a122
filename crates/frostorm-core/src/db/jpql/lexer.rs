use crate::error::SemanticError;
use std::fmt;

///
/// TokenKind
///
/// Keywords are not distinguished here: every bare word is a `Word` and the
/// parser decides by position whether it is a keyword, an entity name or an
/// identifier. This keeps entity names such as `Order` usable.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenKind {
    Word(String),
    /// Unsigned magnitude; the parser folds a leading minus and range-checks.
    Integer(u64),
    /// Decimal literal text, parsed by the consumer.
    Decimal(String),
    Text(String),
    NamedParam(String),
    PositionalParam(u32),
    Comma,
    Dot,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(w) => write!(f, "'{w}'"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "string '{s}'"),
            Self::NamedParam(n) => write!(f, ":{n}"),
            Self::PositionalParam(n) => write!(f, "?{n}"),
            Self::Comma => write!(f, "','"),
            Self::Dot => write!(f, "'.'"),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::Plus => write!(f, "'+'"),
            Self::Minus => write!(f, "'-'"),
            Self::Star => write!(f, "'*'"),
            Self::Slash => write!(f, "'/'"),
            Self::Eq => write!(f, "'='"),
            Self::Ne => write!(f, "'<>'"),
            Self::Lt => write!(f, "'<'"),
            Self::Lte => write!(f, "'<='"),
            Self::Gt => write!(f, "'>'"),
            Self::Gte => write!(f, "'>='"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

///
/// Token
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token's first character.
    pub offset: usize,
}

impl Token {
    /// True for a word matching `keyword` case-insensitively.
    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

///
/// Lexer
///

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub const fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize the whole input; the last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SemanticError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, SemanticError> {
        self.skip_whitespace();
        let offset = self.pos;
        let Some(&byte) = self.bytes.get(self.pos) else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset,
            });
        };

        let kind = match byte {
            b',' => self.single(TokenKind::Comma),
            b'(' => self.single(TokenKind::LParen),
            b')' => self.single(TokenKind::RParen),
            b'+' => self.single(TokenKind::Plus),
            b'-' => self.single(TokenKind::Minus),
            b'*' => self.single(TokenKind::Star),
            b'/' => self.single(TokenKind::Slash),
            b'=' => self.single(TokenKind::Eq),
            b'<' => match self.bytes.get(self.pos + 1) {
                Some(b'=') => self.double(TokenKind::Lte),
                Some(b'>') => self.double(TokenKind::Ne),
                _ => self.single(TokenKind::Lt),
            },
            b'>' => match self.bytes.get(self.pos + 1) {
                Some(b'=') => self.double(TokenKind::Gte),
                _ => self.single(TokenKind::Gt),
            },
            b'!' if self.bytes.get(self.pos + 1) == Some(&b'=') => self.double(TokenKind::Ne),
            b'.' if self.peek_digit(1) => self.number()?,
            b'.' => self.single(TokenKind::Dot),
            b'\'' => self.string()?,
            b':' => {
                self.pos += 1;
                let name = self.word_text();
                if name.is_empty() {
                    return Err(syntax(offset, "expected a parameter name after ':'"));
                }
                TokenKind::NamedParam(name.to_string())
            }
            b'?' => {
                self.pos += 1;
                let start = self.pos;
                while self.peek_digit(0) {
                    self.pos += 1;
                }
                let digits = &self.src[start..self.pos];
                let position = digits
                    .parse()
                    .map_err(|_| syntax(offset, "expected a parameter position after '?'"))?;
                TokenKind::PositionalParam(position)
            }
            b'0'..=b'9' => self.number()?,
            b if b == b'_' || b == b'$' || b.is_ascii_alphabetic() => {
                TokenKind::Word(self.word_text().to_string())
            }
            _ if self.src[self.pos..].chars().next().is_some_and(char::is_alphabetic) => {
                TokenKind::Word(self.word_text().to_string())
            }
            _ => {
                let ch = self.src[self.pos..].chars().next().unwrap_or('?');
                return Err(syntax(offset, format!("unexpected character '{ch}'")));
            }
        };

        Ok(Token { kind, offset })
    }

    fn skip_whitespace(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(u8::is_ascii_whitespace)
        {
            self.pos += 1;
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 2;
        kind
    }

    fn peek_digit(&self, ahead: usize) -> bool {
        self.bytes
            .get(self.pos + ahead)
            .is_some_and(u8::is_ascii_digit)
    }

    // Identifier characters; multi-byte characters are accepted whole.
    fn word_text(&mut self) -> &'a str {
        let start = self.pos;
        for (i, ch) in self.src[start..].char_indices() {
            if ch == '_' || ch == '$' || ch.is_alphanumeric() {
                self.pos = start + i + ch.len_utf8();
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    fn number(&mut self) -> Result<TokenKind, SemanticError> {
        let start = self.pos;
        while self.peek_digit(0) {
            self.pos += 1;
        }
        let mut decimal = false;
        if self.bytes.get(self.pos) == Some(&b'.') && self.peek_digit(1) {
            decimal = true;
            self.pos += 1;
            while self.peek_digit(0) {
                self.pos += 1;
            }
        }
        if matches!(self.bytes.get(self.pos), Some(b'e' | b'E')) {
            let mut end = self.pos + 1;
            if matches!(self.bytes.get(end), Some(b'+' | b'-')) {
                end += 1;
            }
            if self.bytes.get(end).is_some_and(u8::is_ascii_digit) {
                decimal = true;
                self.pos = end;
                while self.peek_digit(0) {
                    self.pos += 1;
                }
            }
        }
        // type suffixes are accepted and ignored
        if matches!(self.bytes.get(self.pos), Some(b'L' | b'l' | b'D' | b'd' | b'F' | b'f')) {
            decimal |= !matches!(self.bytes[self.pos], b'L' | b'l');
            let text = self.src[start..self.pos].to_string();
            self.pos += 1;
            return self.finish_number(start, text, decimal);
        }

        let text = self.src[start..self.pos].to_string();
        self.finish_number(start, text, decimal)
    }

    fn finish_number(
        &self,
        start: usize,
        text: String,
        decimal: bool,
    ) -> Result<TokenKind, SemanticError> {
        if decimal {
            return Ok(TokenKind::Decimal(text));
        }

        text.parse()
            .map(TokenKind::Integer)
            .map_err(|_| syntax(start, format!("integer literal {text} is out of range")))
    }

    // '' inside a literal is an escaped quote.
    fn string(&mut self) -> Result<TokenKind, SemanticError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(ch) = self.src[self.pos..].chars().next() else {
                return Err(syntax(start, "unterminated string literal"));
            };
            self.pos += ch.len_utf8();
            if ch == '\'' {
                if self.bytes.get(self.pos) == Some(&b'\'') {
                    self.pos += 1;
                    out.push('\'');
                } else {
                    return Ok(TokenKind::Text(out));
                }
            } else {
                out.push(ch);
            }
        }
    }
}

pub(super) fn syntax(offset: usize, message: impl Into<String>) -> SemanticError {
    SemanticError::Syntax {
        offset,
        message: message.into(),
    }
}
