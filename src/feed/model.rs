use std::collections::BTreeMap;
use std::fmt;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, FixedOffset, SecondsFormat, TimeZone, Utc};
use data_encoding::{Encoding, Specification};
use serde::{Deserialize, Serialize};

type Blake2b256 = Blake2b<U32>;

/// 20 bits of the blake2b-256 digest, rendered as 7 lowercase base32
/// characters (spec §4.B "Hash computation").
pub const HASH_LEN: usize = 7;

fn base32_lower() -> Encoding {
    let mut spec = Specification::new();
    spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
    spec.encoding().expect("static base32 alphabet is valid")
}

/// The identity of a feed's author. Equality is by normalised URI, not by
/// nickname (spec §3 "Twter").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Twter {
    pub nick: String,
    pub uri: String,
    pub avatar: Option<String>,
    pub tagline: Option<String>,
    pub following: u64,
    pub followers: u64,
    pub follow: Option<BTreeMap<String, Twter>>,
}

impl Twter {
    pub fn new(nick: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            uri: normalize_uri(&uri.into()),
            avatar: None,
            tagline: None,
            following: 0,
            followers: 0,
            follow: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nick.is_empty() && self.uri.is_empty()
    }
}

impl PartialEq for Twter {
    fn eq(&self, other: &Self) -> bool {
        normalize_uri(&self.uri) == normalize_uri(&other.uri)
    }
}
impl Eq for Twter {}

/// Lowercase, trailing-slash-stripped canonical form used for Twter
/// equality and for map keys throughout the cache.
pub fn normalize_uri(uri: &str) -> String {
    uri.trim().to_lowercase().trim_end_matches('/').to_string()
}

/// One inline element of a post's body (spec §3 "Post", §4.B grammar).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Text(String),
    LineSeparator,
    Mention { nick: String, uri: Option<String> },
    Tag { text: String, uri: Option<String> },
    Link { text: String, target: String, title: Option<String> },
    Media { text: String, target: String, title: Option<String> },
    CodeInline(String),
    CodeBlock(String),
    Subject(Subject),
}

/// Every post has exactly one subject; absent ⇒ synthesised from the
/// post's own hash, making the post its own conversation root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Subject {
    Text(String),
    Tag { text: String, uri: Option<String> },
}

impl Subject {
    /// The `(#hash)` form used to key `Views["subject:(#hash)"]`.
    pub fn hash(&self, own_post_hash: &str) -> String {
        match self {
            Subject::Tag { text, .. } => {
                let trimmed = text.trim_start_matches('#');
                if trimmed.len() == HASH_LEN && trimmed.chars().all(|c| c.is_ascii_alphanumeric())
                {
                    trimmed.to_lowercase()
                } else {
                    own_post_hash.to_string()
                }
            }
            Subject::Text(_) => own_post_hash.to_string(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Subject::Text(text) => format!("({})", text),
            Subject::Tag { text, .. } => format!("(#{})", text),
        }
    }
}

/// A single timestamped post, immutable after parse.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Post {
    pub twter: Twter,
    /// Preserves the offset the post was authored under; nanosecond
    /// precision survives unchanged through `chrono`'s own representation.
    pub created: DateTime<FixedOffset>,
    pub elements: Vec<Element>,
    pub raw_text: String,
    pub hash: String,
}

impl Post {
    /// Builds a post and computes its hash per spec §4.B: blake2b-256 over
    /// `URI\ntimestamp\nraw-text`, truncated to 20 bits, base32-rendered
    /// without padding, 7 characters.
    pub fn new(
        twter: Twter,
        created: DateTime<FixedOffset>,
        elements: Vec<Element>,
        raw_text: String,
    ) -> Self {
        let hash = compute_hash(&twter.uri, created, &raw_text);
        Self {
            twter,
            created,
            elements,
            raw_text,
            hash,
        }
    }

    pub fn subject(&self) -> Subject {
        for element in &self.elements {
            if let Element::Subject(subject) = element {
                return subject.clone();
            }
        }
        Subject::Text(format!("#{}", self.hash))
    }

    pub fn subject_hash(&self) -> String {
        self.subject().hash(&self.hash)
    }

    pub fn mentions(&self) -> Vec<(&str, Option<&str>)> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                Element::Mention { nick, uri } => Some((nick.as_str(), uri.as_deref())),
                _ => None,
            })
            .collect()
    }

    pub fn tags(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                Element::Tag { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl PartialEq for Post {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}
impl Eq for Post {}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// `timestamp` is normalised to UTC before hashing, with nanosecond
/// precision preserved via RFC 3339 rendering.
pub fn compute_hash(uri: &str, created: DateTime<FixedOffset>, raw_text: &str) -> String {
    let canonical_ts = created
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true);
    let payload = format!("{}\n{}\n{}", uri, canonical_ts, raw_text);

    let mut hasher = Blake2b256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();

    // Truncate to 20 bits: the top two digest bytes plus the high nibble
    // of the third. Base32's 5-bit grouping needs 32 bits of input to
    // produce exactly 7 symbols (ceil(32/5) = 7), so the 20 significant
    // bits are zero-padded out to 4 bytes rather than 3; the extra zero
    // bits carry no entropy but keep the encoder from ever emitting
    // fewer than 7 characters.
    let alphabet = base32_lower();
    let packed = [digest[0], digest[1], digest[2] & 0xf0, 0u8];
    alphabet.encode(&packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    fn fixture_created() -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2016, 2, 3, 23, 5, 0)
            .unwrap()
            .with_timezone(&FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn hash_is_seven_lowercase_base32_chars() {
        let created = fixture_created();
        let hash = compute_hash("https://a.example/twtxt.txt", created, "hello world");
        assert_eq!(hash.len(), HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn hash_is_stable_across_runs() {
        let created = fixture_created();
        let a = compute_hash("https://a.example/twtxt.txt", created, "hello world");
        let b = compute_hash("https://a.example/twtxt.txt", created, "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_depends_on_uri_timestamp_and_text() {
        let created = fixture_created();
        let base = compute_hash("https://a.example/twtxt.txt", created, "hello world");
        let other_uri = compute_hash("https://b.example/twtxt.txt", created, "hello world");
        let other_text = compute_hash("https://a.example/twtxt.txt", created, "bye world");
        assert_ne!(base, other_uri);
        assert_ne!(base, other_text);
    }

    #[test]
    fn twter_equality_ignores_case_and_trailing_slash() {
        let a = Twter::new("alice", "https://A.example/Twtxt.txt/");
        let b = Twter::new("alice2", "https://a.example/twtxt.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn subject_synthesised_from_own_hash_when_absent() {
        let twter = Twter::new("alice", "https://a.example/twtxt.txt");
        let created = fixture_created();
        let post = Post::new(twter, created, vec![Element::Text("hi".into())], "hi".into());
        assert_eq!(post.subject_hash(), post.hash);
    }
}
