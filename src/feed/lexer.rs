//! Byte-to-token lexer over the feed grammar (spec §4.A). The lexer reads
//! a UTF-8 `&str` and walks it rune-by-rune, coalescing runs where the
//! grammar calls for it (`SPACE`) and recognising the handful of fixed
//! punctuation tokens the parser needs one token of lookahead for.

pub const LINE_SEPARATOR: char = '\u{2028}';
const BUFFER_GROW_HINT: usize = 4096;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Hash,
    At,
    Lt,
    Gt,
    LParen,
    RParen,
    LBrack,
    RBrack,
    Colon,
    Hyphen,
    Plus,
    Bang,
    T,
    Z,
    BSlash,
    Scheme,
    Number(String),
    StringLit(String),
    Space,
    Tab,
    Nl,
    Ls,
    Code { text: String, fenced: bool },
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Tokenizes a full post/header stream. Input is held as a `Vec<char>`
/// rather than re-scanned byte-by-byte: the grammar is rune-oriented
/// (U+2028 is a single logical token) and posts are bounded by
/// `MaxFetchLimit`, so materialising the rune vector up front is cheap
/// and avoids re-deriving UTF-8 boundaries on every lookahead.
pub struct Lexer {
    runes: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let mut runes = Vec::with_capacity(input.len().max(BUFFER_GROW_HINT));
        runes.extend(input.chars());
        Self { runes, pos: 0 }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    fn peek(&self) -> Option<char> {
        self.runes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.runes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn next_token(&mut self) -> Token {
        let offset = self.pos;
        let Some(ch) = self.peek() else {
            return Token { kind: TokenKind::Eof, offset };
        };

        let kind = match ch {
            ' ' => {
                while self.peek() == Some(' ') {
                    self.advance();
                }
                TokenKind::Space
            }
            '\t' => {
                self.advance();
                TokenKind::Tab
            }
            '\n' => {
                self.advance();
                TokenKind::Nl
            }
            LINE_SEPARATOR => {
                self.advance();
                TokenKind::Ls
            }
            '#' => {
                self.advance();
                TokenKind::Hash
            }
            '@' => {
                self.advance();
                TokenKind::At
            }
            '<' => {
                self.advance();
                TokenKind::Lt
            }
            '>' => {
                self.advance();
                TokenKind::Gt
            }
            '(' => {
                self.advance();
                TokenKind::LParen
            }
            ')' => {
                self.advance();
                TokenKind::RParen
            }
            '[' => {
                self.advance();
                TokenKind::LBrack
            }
            ']' => {
                self.advance();
                TokenKind::RBrack
            }
            '-' => {
                self.advance();
                TokenKind::Hyphen
            }
            '+' => {
                self.advance();
                TokenKind::Plus
            }
            '!' => {
                self.advance();
                TokenKind::Bang
            }
            '\\' => {
                self.advance();
                TokenKind::BSlash
            }
            'T' if !self.in_word() => {
                self.advance();
                TokenKind::T
            }
            'Z' if !self.in_word() => {
                self.advance();
                TokenKind::Z
            }
            ':' => {
                if self.peek_at(1) == Some('/') && self.peek_at(2) == Some('/') {
                    self.pos += 3;
                    TokenKind::Scheme
                } else {
                    self.advance();
                    TokenKind::Colon
                }
            }
            '`' => self.lex_code(),
            c if c.is_ascii_digit() => self.lex_number(),
            _ => self.lex_string(),
        };

        Token { kind, offset }
    }

    /// `T`/`Z` are only lexed as standalone tokens (RFC 3339 separators)
    /// when not embedded in a longer run of word characters.
    fn in_word(&self) -> bool {
        matches!(self.peek_at(1), Some(c) if c.is_alphanumeric())
    }

    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        TokenKind::Number(self.runes[start..self.pos].iter().collect())
    }

    fn lex_code(&mut self) -> TokenKind {
        let fenced = self.peek_at(1) == Some('`') && self.peek_at(2) == Some('`');
        let fence_len = if fenced { 3 } else { 1 };
        self.pos += fence_len;

        let start = self.pos;
        loop {
            match self.peek() {
                None => break,
                Some('`') if self.fence_matches(fence_len) => break,
                Some(_) => {
                    self.advance();
                }
            }
        }
        let text: String = self.runes[start..self.pos].iter().collect();
        self.pos += fence_len.min(self.runes.len() - self.pos);
        TokenKind::Code { text, fenced }
    }

    fn fence_matches(&self, len: usize) -> bool {
        (0..len).all(|i| self.peek_at(i) == Some('`'))
    }

    fn lex_string(&mut self) -> TokenKind {
        let start = self.pos;
        loop {
            match self.peek() {
                None => break,
                Some(c) if is_boundary(c) => break,
                Some(_) => {
                    self.advance();
                }
            }
        }
        if self.pos == start {
            // A boundary character we don't special-case elsewhere (rare
            // unicode punctuation): consume one rune as text so the lexer
            // always makes forward progress.
            self.advance();
        }
        TokenKind::StringLit(self.runes[start..self.pos].iter().collect())
    }
}

fn is_boundary(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t'
            | '\n'
            | LINE_SEPARATOR
            | '#'
            | '@'
            | '<'
            | '>'
            | '('
            | ')'
            | '['
            | ']'
            | ':'
            | '-'
            | '+'
            | '!'
            | '\\'
            | '`'
    ) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind.clone()).collect()
    }

    #[test]
    fn lexes_scheme_vs_colon() {
        let tokens = Lexer::new("https://example.com a:b").tokenize();
        assert!(kinds(&tokens).contains(&TokenKind::Scheme));
        assert!(kinds(&tokens).contains(&TokenKind::Colon));
    }

    #[test]
    fn coalesces_space_runs() {
        let tokens = Lexer::new("a   b").tokenize();
        let spaces = tokens.iter().filter(|t| t.kind == TokenKind::Space).count();
        assert_eq!(spaces, 1);
    }

    #[test]
    fn lexes_fenced_and_inline_code() {
        let tokens = Lexer::new("`inline` and ```block```").tokenize();
        let codes: Vec<_> = tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Code { text, fenced } => Some((text.clone(), *fenced)),
                _ => None,
            })
            .collect();
        assert_eq!(codes[0], ("inline".to_string(), false));
        assert_eq!(codes[1], ("block".to_string(), true));
    }

    #[test]
    fn handles_token_larger_than_buffer_hint() {
        let long_word = "x".repeat(BUFFER_GROW_HINT * 2);
        let tokens = Lexer::new(&long_word).tokenize();
        assert_eq!(tokens.len(), 2); // one StringLit + Eof
    }

    #[test]
    fn line_separator_is_its_own_token() {
        let tokens = Lexer::new("a\u{2028}b").tokenize();
        assert!(kinds(&tokens).contains(&TokenKind::Ls));
    }
}
