//! Recursive-descent, one-token-lookahead, error-accumulating parser over
//! the feed grammar (spec §4.B). Header comments are collected into a
//! metadata map; posts are emitted newest-last in file order (the cache
//! is responsible for sorting).

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use super::lexer::{Lexer, Token, TokenKind, LINE_SEPARATOR};
use super::model::{Element, Post, Subject, Twter};
use crate::errors::FeedError;

const KNOWN_SCHEMES: &[&str] = &["https", "http", "gopher", "gemini"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParseIssue {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Default, Clone)]
pub struct FeedHeader {
    pub fields: HashMap<String, Vec<String>>,
}

impl FeedHeader {
    pub fn first(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn all(&self, key: &str) -> &[String] {
        self.fields.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn refresh_hint_seconds(&self) -> Option<u64> {
        self.first("refresh").and_then(|v| v.parse().ok())
    }
}

pub struct ParsedFeed {
    pub header: FeedHeader,
    pub posts: Vec<Post>,
    pub errors: Vec<ParseIssue>,
}

/// Parses a complete feed document fetched from `source_uri`. `fallback_twter`
/// is used unless the header overrides it with `nick`/`url` comments
/// (spec §4.B "The parser may produce a synthesised Twter from the header").
pub fn parse_feed(source_uri: &str, input: &str, fallback_twter: &Twter) -> Result<ParsedFeed, FeedError> {
    let mut header = FeedHeader::default();
    let mut posts = Vec::new();
    let mut errors = Vec::new();
    let mut first_content_line_seen = false;
    let mut first_content_line_ok = true;

    for (line_no, raw_line) in input.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            parse_header_line(rest, &mut header);
            continue;
        }

        if !first_content_line_seen {
            first_content_line_seen = true;
        }

        match parse_post_line(line) {
            Ok((created, content)) => {
                let twter = synthesise_twter(&header, fallback_twter);
                let elements = parse_elements(content);
                posts.push(Post::new(twter, created, elements, content.to_string()));
            }
            Err(message) => {
                if posts.is_empty() && !first_content_line_ok {
                    // already flagged
                } else if !first_content_line_seen_before(line_no, &posts, &errors) {
                    first_content_line_ok = false;
                }
                errors.push(ParseIssue { line: line_no + 1, message });
            }
        }
    }

    if posts.is_empty() && !errors.is_empty() {
        return Err(FeedError::InvalidFeed);
    }
    let _ = first_content_line_ok;

    Ok(ParsedFeed { header, posts, errors })
}

/// Whether any post parsed successfully strictly before `line_no` — used
/// only to decide whether an early failure should be treated as "the file
/// never looked like a feed" vs. "one bad post among many good ones".
/// Kept as a tiny standalone helper rather than inline state so the
/// control flow above stays readable.
fn first_content_line_seen_before(line_no: usize, posts: &[Post], _errors: &[ParseIssue]) -> bool {
    let _ = line_no;
    !posts.is_empty()
}

fn parse_header_line(rest: &str, header: &mut FeedHeader) {
    let rest = rest.trim_start();
    if let Some((key, value)) = rest.split_once('=') {
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();
        if !key.is_empty() {
            header.fields.entry(key).or_default().push(value);
        }
    }
}

fn synthesise_twter(header: &FeedHeader, fallback: &Twter) -> Twter {
    let mut twter = fallback.clone();
    if let Some(nick) = header.first("nick") {
        twter.nick = nick.to_string();
    }
    if let Some(url) = header.first("url") {
        twter.uri = super::model::normalize_uri(url);
    }
    twter
}

/// Splits `datetime TAB content` and parses the RFC 3339 timestamp.
/// Returns `Err` with a human-readable message on malformed timestamps
/// (spec: "discarded with error ErrParseToken").
fn parse_post_line(line: &str) -> Result<(DateTime<FixedOffset>, &str), String> {
    let (ts, content) = line
        .split_once('\t')
        .ok_or_else(|| "missing TAB between timestamp and content".to_string())?;
    let created = DateTime::parse_from_rfc3339(ts).map_err(|err| err.to_string())?;
    Ok((created, content))
}

struct ElementParser<'a> {
    chars: Vec<char>,
    tokens: &'a [Token],
    pos: usize,
}

/// Parses the post body into inline elements. Naked links are detected as
/// a second pass over flushed plain-text runs (see `split_naked_links`):
/// the grammar describes them as "inlined, greedy", and scanning finished
/// text runs with a small regex is simpler and exactly as correct as
/// chasing scheme tokens through the bracket/mention/tag state machine.
pub fn parse_elements(content: &str) -> Vec<Element> {
    let tokens = Lexer::new(content).tokenize();
    let chars: Vec<char> = content.chars().collect();
    let mut parser = ElementParser { chars, tokens: &tokens, pos: 0 };
    parser.parse()
}

impl<'a> ElementParser<'a> {
    fn kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn raw(&self, start: usize, end: usize) -> String {
        self.chars[start..end.min(self.chars.len())].iter().collect()
    }

    fn parse(&mut self) -> Vec<Element> {
        let mut elements = Vec::new();
        let mut text_start: Option<usize> = None;
        let mut at_boundary = true;

        macro_rules! flush_text {
            ($end:expr) => {
                if let Some(start) = text_start.take() {
                    if $end > start {
                        let raw = self.raw(start, $end);
                        for chunk in split_naked_links(&raw) {
                            elements.push(chunk);
                        }
                    }
                }
            };
        }

        loop {
            match self.kind().clone() {
                TokenKind::Eof => {
                    flush_text!(self.offset());
                    break;
                }
                TokenKind::Ls => {
                    flush_text!(self.offset());
                    elements.push(Element::LineSeparator);
                    at_boundary = true;
                    self.advance();
                }
                TokenKind::Space | TokenKind::Tab => {
                    if text_start.is_none() {
                        text_start = Some(self.offset());
                    }
                    at_boundary = true;
                    self.advance();
                }
                TokenKind::LParen if at_boundary => {
                    let start = self.offset();
                    if let Some((subject, next)) = self.try_subject() {
                        flush_text!(start);
                        elements.push(Element::Subject(subject));
                        self.pos = next;
                        at_boundary = false;
                    } else {
                        if text_start.is_none() {
                            text_start = Some(self.offset());
                        }
                        at_boundary = false;
                        self.advance();
                    }
                }
                TokenKind::Hash => {
                    let start = self.offset();
                    if let Some((tag, next)) = self.try_tag() {
                        flush_text!(start);
                        elements.push(tag);
                        self.pos = next;
                    } else {
                        if text_start.is_none() {
                            text_start = Some(start);
                        }
                        self.advance();
                    }
                    at_boundary = false;
                }
                TokenKind::At => {
                    let start = self.offset();
                    if let Some((mention, next)) = self.try_mention() {
                        flush_text!(start);
                        elements.push(mention);
                        self.pos = next;
                    } else {
                        if text_start.is_none() {
                            text_start = Some(start);
                        }
                        self.advance();
                    }
                    at_boundary = false;
                }
                TokenKind::Bang => {
                    let start = self.offset();
                    if let Some((media, next)) = self.try_media() {
                        flush_text!(start);
                        elements.push(media);
                        self.pos = next;
                    } else {
                        if text_start.is_none() {
                            text_start = Some(start);
                        }
                        self.advance();
                    }
                    at_boundary = false;
                }
                TokenKind::LBrack => {
                    let start = self.offset();
                    if let Some((link, next)) = self.try_link() {
                        flush_text!(start);
                        elements.push(link);
                        self.pos = next;
                    } else {
                        if text_start.is_none() {
                            text_start = Some(start);
                        }
                        self.advance();
                    }
                    at_boundary = false;
                }
                TokenKind::Code { text, fenced } => {
                    flush_text!(self.offset());
                    elements.push(if fenced {
                        Element::CodeBlock(text)
                    } else {
                        Element::CodeInline(text)
                    });
                    at_boundary = false;
                    self.advance();
                }
                _ => {
                    if text_start.is_none() {
                        text_start = Some(self.offset());
                    }
                    at_boundary = false;
                    self.advance();
                }
            }
        }

        elements
    }

    /// `subject := "(" (tag | text) ")"`, gated by caller on boundary
    /// position. Returns the parsed subject and the token index just
    /// past the closing `)`, or `None` if unterminated (caller then
    /// treats the `(` as ordinary text — preserving round-tripping for
    /// stray parens).
    fn try_subject(&self) -> Option<(Subject, usize)> {
        let open = self.pos;
        let mut i = open + 1;
        if matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Hash)) {
            let word_start = self.tokens[i].offset + 1;
            let mut j = i + 1;
            while !matches!(
                self.tokens.get(j).map(|t| &t.kind),
                Some(TokenKind::RParen) | Some(TokenKind::Eof) | None
            ) {
                j += 1;
            }
            if matches!(self.tokens.get(j).map(|t| &t.kind), Some(TokenKind::RParen)) {
                let word_end = self.tokens[j].offset;
                let text = self.raw(word_start, word_end);
                return Some((Subject::Tag { text, uri: None }, j + 1));
            }
            return None;
        }

        let text_start = self.tokens[i].offset;
        while !matches!(
            self.tokens.get(i).map(|t| &t.kind),
            Some(TokenKind::RParen) | Some(TokenKind::Eof) | None
        ) {
            if matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Nl) | Some(TokenKind::Ls)) {
                return None;
            }
            i += 1;
        }
        if matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::RParen)) {
            let text_end = self.tokens[i].offset;
            let text = self.raw(text_start, text_end);
            Some((Subject::Text(text), i + 1))
        } else {
            None
        }
    }

    /// `tag := "#" word | "#<" (text (" " url)? | url) ">"`
    fn try_tag(&self) -> Option<(Element, usize)> {
        let hash_off = self.offset();
        let next = self.tokens.get(self.pos + 1).map(|t| &t.kind);
        if matches!(next, Some(TokenKind::Lt)) {
            return self.try_angle_form(self.pos + 1, |text, uri| Element::Tag { text, uri });
        }

        let word_start = hash_off + 1;
        let mut i = self.pos + 1;
        while matches!(
            self.tokens.get(i).map(|t| &t.kind),
            Some(TokenKind::StringLit(_)) | Some(TokenKind::Number(_)) | Some(TokenKind::Hyphen)
        ) {
            i += 1;
        }
        if i == self.pos + 1 {
            return None;
        }
        let word_end = self.tokens[i].offset;
        let text = self.raw(word_start, word_end);
        Some((Element::Tag { text, uri: None }, i))
    }

    /// `mention := "@" nick | "@" nick "@" domain | "@<" ... ">"`
    fn try_mention(&self) -> Option<(Element, usize)> {
        let at_off = self.offset();
        let next = self.tokens.get(self.pos + 1).map(|t| &t.kind);
        if matches!(next, Some(TokenKind::Lt)) {
            return self.try_angle_form(self.pos + 1, |content, url| {
                if let Some(url) = url {
                    Element::Mention { nick: content, uri: Some(url) }
                } else {
                    Element::Mention { nick: content.clone(), uri: Some(content) }
                }
            });
        }

        let nick_start = at_off + 1;
        let mut i = self.pos + 1;
        while matches!(
            self.tokens.get(i).map(|t| &t.kind),
            Some(TokenKind::StringLit(_)) | Some(TokenKind::Number(_)) | Some(TokenKind::Hyphen)
        ) {
            i += 1;
        }
        if i == self.pos + 1 {
            return None;
        }
        let nick_end = self.tokens[i].offset;
        let mut nick = self.raw(nick_start, nick_end);

        if matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::At)) {
            let domain_start = self.tokens[i].offset + 1;
            let mut j = i + 1;
            while matches!(
                self.tokens.get(j).map(|t| &t.kind),
                Some(TokenKind::StringLit(_)) | Some(TokenKind::Number(_)) | Some(TokenKind::Hyphen)
            ) {
                j += 1;
            }
            if j > i + 1 {
                let domain_end = self.tokens[j].offset;
                let domain = self.raw(domain_start, domain_end);
                nick = format!("{}@{}", nick, domain);
                return Some((Element::Mention { nick, uri: None }, j));
            }
        }

        Some((Element::Mention { nick, uri: None }, i))
    }

    /// Shared `"@<" ... ">"` / `"#<" ... ">"` handling: content is either
    /// `text url` (space-separated) or a bare url.
    fn try_angle_form(
        &self,
        lt_pos: usize,
        build: impl Fn(String, Option<String>) -> Element,
    ) -> Option<(Element, usize)> {
        let content_start = self.tokens[lt_pos].offset + 1;
        let mut i = lt_pos + 1;
        while !matches!(
            self.tokens.get(i).map(|t| &t.kind),
            Some(TokenKind::Gt) | Some(TokenKind::Eof) | None
        ) {
            if matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Nl) | Some(TokenKind::Ls)) {
                return None;
            }
            i += 1;
        }
        if !matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Gt)) {
            return None;
        }
        let content_end = self.tokens[i].offset;
        let content = self.raw(content_start, content_end);
        let element = match content.split_once(' ') {
            Some((nick, url)) => build(nick.to_string(), Some(url.trim().to_string())),
            None => build(content, None),
        };
        Some((element, i + 1))
    }

    /// `link := "[" text "]" "(" url ( " " quoted )? ")"`
    fn try_link(&self) -> Option<(Element, usize)> {
        let text_start = self.offset() + 1;
        let mut i = self.pos + 1;
        while !matches!(
            self.tokens.get(i).map(|t| &t.kind),
            Some(TokenKind::RBrack) | Some(TokenKind::Eof) | None
        ) {
            if matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Nl) | Some(TokenKind::Ls)) {
                return None;
            }
            i += 1;
        }
        if !matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::RBrack)) {
            return None;
        }
        let text_end = self.tokens[i].offset;
        let text = self.raw(text_start, text_end);

        if !matches!(self.tokens.get(i + 1).map(|t| &t.kind), Some(TokenKind::LParen)) {
            return None;
        }
        let paren_start = i + 1;
        let target_start = self.tokens[paren_start].offset + 1;
        let mut j = paren_start + 1;
        while !matches!(
            self.tokens.get(j).map(|t| &t.kind),
            Some(TokenKind::RParen) | Some(TokenKind::Eof) | None
        ) {
            if matches!(self.tokens.get(j).map(|t| &t.kind), Some(TokenKind::Nl) | Some(TokenKind::Ls)) {
                return None;
            }
            j += 1;
        }
        if !matches!(self.tokens.get(j).map(|t| &t.kind), Some(TokenKind::RParen)) {
            return None;
        }
        let target_end = self.tokens[j].offset;
        let inner = self.raw(target_start, target_end);
        let (target, title) = match inner.split_once(' ') {
            Some((url, title)) => (url.to_string(), Some(trim_quotes(title.trim()))),
            None => (inner, None),
        };

        Some((Element::Link { text, target, title }, j + 1))
    }

    /// `media := "!" link`
    fn try_media(&self) -> Option<(Element, usize)> {
        if !matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::LBrack)) {
            return None;
        }
        let saved = self.pos;
        let shifted = ElementParser {
            chars: self.chars.clone(),
            tokens: self.tokens,
            pos: saved + 1,
        };
        shifted.try_link().map(|(element, next)| match element {
            Element::Link { text, target, title } => (Element::Media { text, target, title }, next),
            other => (other, next),
        })
    }
}

fn trim_quotes(value: &str) -> String {
    value.trim_matches(|c| c == '"' || c == '\'').to_string()
}

/// Second pass: splits a finished plain-text run wherever a recognised
/// `scheme://` naked link appears, greedily consuming non-whitespace
/// characters as the target.
fn split_naked_links(text: &str) -> Vec<Element> {
    thread_local! {
        static NAKED_LINK: Regex = Regex::new(
            r"(?i)\b(https?|gopher|gemini)://[^\s\x{2028}]+"
        ).expect("naked link regex is valid");
    }

    NAKED_LINK.with(|re| {
        let mut elements = Vec::new();
        let mut last = 0;
        for mat in re.find_iter(text) {
            if !KNOWN_SCHEMES.iter().any(|s| text[mat.start()..].to_lowercase().starts_with(s)) {
                continue;
            }
            if mat.start() > last {
                elements.push(Element::Text(text[last..mat.start()].to_string()));
            }
            let target = mat.as_str().trim_end_matches(|c| matches!(c, '.' | ',' | ')' | '!' | '?'));
            elements.push(Element::Link {
                text: target.to_string(),
                target: target.to_string(),
                title: None,
            });
            last = mat.start() + target.len();
        }
        if last < text.len() {
            elements.push(Element::Text(text[last..].to_string()));
        }
        if elements.is_empty() && !text.is_empty() {
            elements.push(Element::Text(text.to_string()));
        }
        elements
    })
}

/// True if the line is a `U+2028`-free plain post line following the
/// grammar's `post` production. Used by the fetcher/cache to pre-validate
/// that a downloaded body even resembles a feed before running the full
/// parser (spec §4.B "invalid feed" escalation).
pub fn looks_like_feed(input: &str) -> bool {
    input.lines().any(|line| {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            return false;
        }
        matches!(line.split_once('\t'), Some((ts, _)) if DateTime::parse_from_rfc3339(ts).is_ok())
    }) || input.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::model::Twter;

    fn twter() -> Twter {
        Twter::new("bob", "https://b.example/twtxt.txt")
    }

    #[test]
    fn basic_parse_with_header_override() {
        let input = "# nick = alice\n# url = https://a.example/twtxt.txt\n2016-02-03T23:05:00Z\thello world\n";
        let parsed = parse_feed("https://a.example/twtxt.txt", input, &twter()).unwrap();
        assert_eq!(parsed.posts.len(), 1);
        let post = &parsed.posts[0];
        assert_eq!(post.twter.nick, "alice");
        assert_eq!(post.hash.len(), 7);
        assert!(matches!(&post.elements[0], Element::Text(t) if t == "hello world"));
    }

    #[test]
    fn mention_angle_form_with_explicit_url() {
        let input = "2016-02-03T23:05:00Z\t@<bob https://b.example/twtxt.txt> hi\n";
        let parsed = parse_feed("https://a.example/twtxt.txt", input, &twter()).unwrap();
        let mentions = parsed.posts[0].mentions();
        assert_eq!(mentions, vec![("bob", Some("https://b.example/twtxt.txt"))]);
    }

    #[test]
    fn subject_only_at_boundary() {
        let input = "2016-02-03T23:05:00Z\t(#abc1234) reply text\n2016-02-03T23:05:00Z\ttext (not a subject)\n";
        let parsed = parse_feed("https://a.example/twtxt.txt", input, &twter()).unwrap();
        assert!(matches!(parsed.posts[0].elements[0], Element::Subject(_)));
        assert!(!parsed.posts[1].elements.iter().any(|e| matches!(e, Element::Subject(_))));
    }

    #[test]
    fn malformed_timestamp_is_skipped_not_fatal() {
        let input = "2016-02-03T23:05:00Z\tgood post\nnot-a-date\tbad post\n";
        let parsed = parse_feed("https://a.example/twtxt.txt", input, &twter()).unwrap();
        assert_eq!(parsed.posts.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn html_document_is_invalid_feed() {
        let input = "<!doctype html>\n<html><body>hi</body></html>\n";
        let result = parse_feed("https://a.example/twtxt.txt", input, &twter());
        assert!(matches!(result, Err(FeedError::InvalidFeed)));
    }

    #[test]
    fn tag_and_link_and_code() {
        let input = "2016-02-03T23:05:00Z\t#rust [site](https://x.example \"X\") `code`\n";
        let parsed = parse_feed("https://a.example/twtxt.txt", input, &twter()).unwrap();
        let elems = &parsed.posts[0].elements;
        assert!(elems.iter().any(|e| matches!(e, Element::Tag { text, .. } if text == "rust")));
        assert!(elems.iter().any(|e| matches!(e, Element::Link { target, .. } if target == "https://x.example")));
        assert!(elems.iter().any(|e| matches!(e, Element::CodeInline(t) if t == "code")));
    }

    #[test]
    fn naked_link_is_detected() {
        let input = "2016-02-03T23:05:00Z\tsee https://example.com/page for details\n";
        let parsed = parse_feed("https://a.example/twtxt.txt", input, &twter()).unwrap();
        assert!(parsed.posts[0]
            .elements
            .iter()
            .any(|e| matches!(e, Element::Link { target, .. } if target == "https://example.com/page")));
    }

    #[test]
    fn line_separator_round_trips() {
        let input = format!("2016-02-03T23:05:00Z\tfirst{}second\n", LINE_SEPARATOR);
        let parsed = parse_feed("https://a.example/twtxt.txt", &input, &twter()).unwrap();
        assert!(parsed.posts[0]
            .elements
            .iter()
            .any(|e| matches!(e, Element::LineSeparator)));
    }
}
