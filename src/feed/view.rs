//! Named, derived post lists materialised from the feed table on every
//! `Refresh` (spec §4.E "Views materialised"). Kept as plain functions
//! over `&CachedFeed` rather than a struct: views have no state of their
//! own beyond the post list the cache already stores under their name.

use std::collections::HashMap;

use super::cache::CachedFeed;
use super::model::{Element, Post};

pub const VIEW_LOCAL: &str = "local";
pub const VIEW_DISCOVER: &str = "discover";

pub fn tag_view_name(tag: &str) -> String {
    format!("tag:{}", tag.to_lowercase())
}

pub fn subject_view_name(hash: &str) -> String {
    format!("subject:(#{})", hash)
}

pub fn mentions_view_name(nick: &str) -> String {
    format!("mentions:{}", nick.to_lowercase())
}

pub fn user_view_name(nick: &str) -> String {
    format!("user:{}", nick.to_lowercase())
}

/// Rebuilds every standard view from the current feed table. Shadowed and
/// dead feeds are excluded from all views (spec: "Shadowed/blocked feeds
/// are excluded from every view").
pub fn materialize(feeds: &HashMap<String, CachedFeed>, base_url: &str) -> HashMap<String, Vec<Post>> {
    let mut views: HashMap<String, Vec<Post>> = HashMap::new();
    let base_url = base_url.trim_end_matches('/').to_lowercase();

    let mut local = Vec::new();
    let mut discover = Vec::new();
    let mut tags: HashMap<String, Vec<Post>> = HashMap::new();
    let mut subjects: HashMap<String, Vec<Post>> = HashMap::new();

    for feed in feeds.values() {
        if feed.shadowed || feed.dead {
            continue;
        }
        let is_local = feed.twter.uri.to_lowercase().starts_with(&base_url);

        for post in &feed.posts {
            if is_local {
                local.push(post.clone());
            }
            if is_local || !feed.automated {
                discover.push(post.clone());
            }
            for tag in post.tags() {
                tags.entry(tag.to_lowercase()).or_default().push(post.clone());
            }
            subjects.entry(post.subject_hash()).or_default().push(post.clone());
        }
    }

    // A subject view also carries the root post, as its last entry, when
    // it's known — so replies render above the thing they reply to. Sort
    // the replies first, then push the root on afterwards, so its position
    // is never at the mercy of its own timestamp relative to the replies.
    for (hash, replies) in subjects.iter_mut() {
        dedupe_sort(replies);
        if let Some(root) = find_root(feeds, hash) {
            replies.retain(|p| &p.hash != hash);
            replies.push(root);
        }
        views.insert(subject_view_name(hash), replies.clone());
    }

    dedupe_sort(&mut local);
    dedupe_sort(&mut discover);
    views.insert(VIEW_LOCAL.to_string(), local);
    views.insert(VIEW_DISCOVER.to_string(), discover);

    for (tag, mut posts) in tags {
        dedupe_sort(&mut posts);
        views.insert(tag_view_name(&tag), posts);
    }

    let mut mentions: HashMap<String, Vec<Post>> = HashMap::new();
    for feed in feeds.values() {
        if feed.shadowed || feed.dead {
            continue;
        }
        for post in &feed.posts {
            for (nick, _) in post.mentions() {
                mentions.entry(nick.to_lowercase()).or_default().push(post.clone());
            }
        }
    }
    for (nick, mut posts) in mentions {
        dedupe_sort(&mut posts);
        views.insert(mentions_view_name(&nick), posts);
    }

    views
}

fn find_root(feeds: &HashMap<String, CachedFeed>, hash: &str) -> Option<Post> {
    feeds.values().flat_map(|feed| feed.posts.iter()).find(|post| post.hash == hash).cloned()
}

fn dedupe_sort(posts: &mut Vec<Post>) {
    posts.sort_by(|a, b| b.created.cmp(&a.created));
    let mut seen = std::collections::HashSet::new();
    posts.retain(|post| seen.insert(post.hash.clone()));
}

/// Whether `element` is a tag matching `needle` (case-insensitive);
/// exposed for handlers that filter posts by tag outside of a
/// materialised view (e.g. a freshly injected post not yet refreshed).
pub fn post_has_tag(post: &Post, needle: &str) -> bool {
    post.elements.iter().any(|el| matches!(el, Element::Tag { text, .. } if text.eq_ignore_ascii_case(needle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::model::{Element, Twter};
    use chrono::DateTime;

    fn post(uri: &str, hash_text: &str, elements: Vec<Element>) -> Post {
        let twter = Twter::new("x", uri);
        let created = DateTime::parse_from_rfc3339("2016-02-03T23:05:00Z").unwrap();
        Post::new(twter, created, elements, hash_text.to_string())
    }

    fn post_at(uri: &str, hash_text: &str, created: &str, elements: Vec<Element>) -> Post {
        let twter = Twter::new("x", uri);
        let created = DateTime::parse_from_rfc3339(created).unwrap();
        Post::new(twter, created, elements, hash_text.to_string())
    }

    fn feed(uri: &str, posts: Vec<Post>) -> CachedFeed {
        let mut feed = CachedFeed::new(uri, Twter::new("x", uri));
        feed.posts = posts;
        feed
    }

    #[test]
    fn local_view_only_contains_base_url_posts() {
        let mut feeds = HashMap::new();
        feeds.insert(
            "https://pod.example/user/a/twtxt.txt".into(),
            feed("https://pod.example/user/a/twtxt.txt", vec![post("https://pod.example/user/a/twtxt.txt", "p1", vec![])]),
        );
        feeds.insert(
            "https://other.example/twtxt.txt".into(),
            feed("https://other.example/twtxt.txt", vec![post("https://other.example/twtxt.txt", "p2", vec![])]),
        );

        let views = materialize(&feeds, "https://pod.example");
        assert_eq!(views[VIEW_LOCAL].len(), 1);
        assert_eq!(views[VIEW_DISCOVER].len(), 2);
    }

    #[test]
    fn subject_view_contains_replies_and_root() {
        let root = post("https://pod.example/user/a/twtxt.txt", "root text", vec![]);
        let root_hash = root.hash.clone();
        let reply = post(
            "https://pod.example/user/b/twtxt.txt",
            "reply",
            vec![Element::Subject(crate::feed::model::Subject::Tag { text: root_hash.clone(), uri: None })],
        );

        let mut feeds = HashMap::new();
        feeds.insert("https://pod.example/user/a/twtxt.txt".into(), feed("https://pod.example/user/a/twtxt.txt", vec![root]));
        feeds.insert("https://pod.example/user/b/twtxt.txt".into(), feed("https://pod.example/user/b/twtxt.txt", vec![reply]));

        let views = materialize(&feeds, "https://pod.example");
        let subject_view = &views[&subject_view_name(&root_hash)];
        assert_eq!(subject_view.len(), 2);
    }

    #[test]
    fn subject_view_root_is_last_even_when_newer_than_replies() {
        // The root is authored after its reply (clock skew / backdated
        // reply) — it must still land last in the materialised view.
        let root = post_at("https://pod.example/user/a/twtxt.txt", "root text", "2016-02-03T23:10:00Z", vec![]);
        let root_hash = root.hash.clone();
        let reply = post_at(
            "https://pod.example/user/b/twtxt.txt",
            "reply",
            "2016-02-03T23:05:00Z",
            vec![Element::Subject(crate::feed::model::Subject::Tag { text: root_hash.clone(), uri: None })],
        );

        let mut feeds = HashMap::new();
        feeds.insert("https://pod.example/user/a/twtxt.txt".into(), feed("https://pod.example/user/a/twtxt.txt", vec![root]));
        feeds.insert("https://pod.example/user/b/twtxt.txt".into(), feed("https://pod.example/user/b/twtxt.txt", vec![reply]));

        let views = materialize(&feeds, "https://pod.example");
        let subject_view = &views[&subject_view_name(&root_hash)];
        assert_eq!(subject_view.len(), 2);
        assert_eq!(subject_view.last().unwrap().hash, root_hash);
    }
}
