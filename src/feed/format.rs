//! Renders a post's elements back to text in one of three modes
//! (spec §4.B "Text formatting"). `Html` resolves local mentions to
//! on-pod profile URLs and remote mentions to the `/external` indirection
//! so a template can link them without knowing about peers.

use super::model::{Element, Post, Subject};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatMode {
    Text,
    Markdown,
    Html,
}

pub fn format_post(post: &Post, mode: FormatMode, base_url: &str) -> String {
    post.elements
        .iter()
        .map(|element| format_element(element, mode, base_url))
        .collect::<Vec<_>>()
        .join("")
}

fn format_element(element: &Element, mode: FormatMode, base_url: &str) -> String {
    match element {
        Element::Text(text) => match mode {
            FormatMode::Html => html_escape(text),
            _ => text.clone(),
        },
        Element::LineSeparator => match mode {
            FormatMode::Html => "<br>".to_string(),
            _ => "\u{2028}".to_string(),
        },
        Element::Mention { nick, uri } => format_mention(nick, uri.as_deref(), mode, base_url),
        Element::Tag { text, .. } => match mode {
            FormatMode::Text => format!("#{}", text),
            FormatMode::Markdown => format!("[#{}](/tag/{})", text, text),
            FormatMode::Html => format!(r#"<a href="/tag/{0}">#{0}</a>"#, html_escape(text)),
        },
        Element::Link { text, target, title } => format_link(text, target, title.as_deref(), mode),
        Element::Media { text, target, title } => match mode {
            FormatMode::Text => format!("![{}]({})", text, target),
            FormatMode::Markdown => format!("![{}]({})", text, target),
            FormatMode::Html => format!(
                r#"<img src="{}" alt="{}" title="{}">"#,
                html_escape(target),
                html_escape(text),
                html_escape(title.as_deref().unwrap_or(text))
            ),
        },
        Element::CodeInline(text) => match mode {
            FormatMode::Text => format!("`{}`", text),
            FormatMode::Markdown => format!("`{}`", text),
            FormatMode::Html => format!("<code>{}</code>", html_escape(text)),
        },
        Element::CodeBlock(text) => match mode {
            FormatMode::Text => format!("```{}```", text),
            FormatMode::Markdown => format!("```\n{}\n```", text),
            FormatMode::Html => format!("<pre><code>{}</code></pre>", html_escape(text)),
        },
        Element::Subject(subject) => format_subject(subject, mode),
    }
}

fn format_mention(nick: &str, uri: Option<&str>, mode: FormatMode, base_url: &str) -> String {
    match mode {
        FormatMode::Text => format!("@{}", nick),
        FormatMode::Markdown => match uri {
            Some(uri) => format!("[@{}]({})", nick, uri),
            None => format!("@{}", nick),
        },
        FormatMode::Html => {
            let href = match uri {
                Some(uri) if uri.trim_start_matches("https://").trim_start_matches("http://").starts_with(
                    base_url.trim_start_matches("https://").trim_start_matches("http://"),
                ) =>
                {
                    format!("/user/{}", html_escape(nick))
                }
                Some(uri) => format!("/external?uri={}&nick={}", urlencode(uri), urlencode(nick)),
                None => format!("/external?nick={}", urlencode(nick)),
            };
            format!(r#"<a href="{}">@{}</a>"#, href, html_escape(nick))
        }
    }
}

fn format_link(text: &str, target: &str, title: Option<&str>, mode: FormatMode) -> String {
    match mode {
        FormatMode::Text => text.to_string(),
        FormatMode::Markdown => match title {
            Some(title) => format!("[{}]({} \"{}\")", text, target, title),
            None => format!("[{}]({})", text, target),
        },
        FormatMode::Html => format!(
            r#"<a href="{}" title="{}">{}</a>"#,
            html_escape(target),
            html_escape(title.unwrap_or(text)),
            html_escape(text)
        ),
    }
}

fn format_subject(subject: &Subject, mode: FormatMode) -> String {
    match mode {
        FormatMode::Html => format!("<span class=\"subject\">{}</span>", html_escape(&subject.render())),
        _ => subject.render(),
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::model::Twter;
    use chrono::{DateTime, FixedOffset};

    fn post_with(elements: Vec<Element>) -> Post {
        let twter = Twter::new("alice", "https://pod.example/user/alice/twtxt.txt");
        let created: DateTime<FixedOffset> = DateTime::parse_from_rfc3339("2016-02-03T23:05:00Z").unwrap();
        Post::new(twter, created, elements, "raw".into())
    }

    #[test]
    fn text_mode_round_trips_plain_text() {
        let post = post_with(vec![Element::Text("hello world".into())]);
        assert_eq!(format_post(&post, FormatMode::Text, "https://pod.example"), "hello world");
    }

    #[test]
    fn html_mode_links_local_mention() {
        let post = post_with(vec![Element::Mention {
            nick: "bob".into(),
            uri: Some("https://pod.example/user/bob/twtxt.txt".into()),
        }]);
        let rendered = format_post(&post, FormatMode::Html, "https://pod.example");
        assert!(rendered.contains("/user/bob"));
    }

    #[test]
    fn html_mode_routes_remote_mention_through_external() {
        let post = post_with(vec![Element::Mention {
            nick: "carol".into(),
            uri: Some("https://other.example/twtxt.txt".into()),
        }]);
        let rendered = format_post(&post, FormatMode::Html, "https://pod.example");
        assert!(rendered.contains("/external?uri="));
    }

    #[test]
    fn markdown_link_includes_title() {
        let post = post_with(vec![Element::Link {
            text: "site".into(),
            target: "https://x.example".into(),
            title: Some("X".into()),
        }]);
        let rendered = format_post(&post, FormatMode::Markdown, "https://pod.example");
        assert_eq!(rendered, "[site](https://x.example \"X\")");
    }
}
