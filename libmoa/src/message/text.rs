//! Text helpers shared by the message variants

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex is valid"))
        }
    };
}

// Anchors with plain text content collapse to their target
static_regex!(simple_anchor, r#"(?i)<a\s[^>]*href="([^"]+)"[^>]*>[^<]*</a>"#);
static_regex!(line_break, r"(?i)<br\s*/?>");
static_regex!(paragraph_break, r"(?i)</p>\s*<p[^>]*>");
static_regex!(any_tag, r"<[^>]*>");
static_regex!(mention_token, r"@\w+(?:@[\w.-]*\w)?");
static_regex!(twitter_qualified, r"@?\b(\w{1,15})@twitter\.com\b");
static_regex!(short_handle, r"@(\w{1,15})");
static_regex!(fediverse_handle, r"@\w+@[\w.]+");
static_regex!(fediverse_profile, r"https://[\w.]+/@[\w.]+");
static_regex!(leading_cw, r"\A[TtCc][Ww]: ([^\n]*)\n");

/// Convert status HTML to plain text
///
/// Line breaks become `\n`, paragraph breaks `\n\n`, simple links their URL.
/// Every other tag is dropped, keeping its text.
pub fn strip_markup(html: &str) -> String {
    let text = simple_anchor().replace_all(html, "$1");
    let text = line_break().replace_all(&text, "\n");
    let text = paragraph_break().replace_all(&text, "\n\n");
    any_tag().replace_all(&text, "").into_owned()
}

pub fn unescape(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

fn preceded_by_word_char(text: &str, index: usize) -> bool {
    text[..index]
        .chars()
        .next_back()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false)
}

/// Qualify bare `@user` mentions with their home instance
///
/// `mentions` maps a username to its `@user@host` form. Mentions that are
/// already qualified are left alone, so the rewrite is idempotent.
pub fn qualify_mentions(text: &str, mentions: &HashMap<String, String>) -> String {
    if mentions.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for m in mention_token().find_iter(text) {
        let token = m.as_str();
        let qualified = token[1..].contains('@');

        if qualified || preceded_by_word_char(text, m.start()) {
            continue;
        }

        if let Some(replacement) = mentions.get(&token[1..]) {
            out.push_str(&text[last..m.start()]);
            out.push_str(replacement);
            last = m.end();
        }
    }

    out.push_str(&text[last..]);
    out
}

fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Rewrite references to Twitter users for posting on Twitter
///
/// `@handle@twitter.com` becomes `@handle`, or just `handle` when
/// `sanitize` is set. With `sanitize`, every other short `@handle` that is not
/// part of a fediverse handle or profile link also loses its `@`, so that it
/// does not notify an unrelated Twitter account.
pub fn rewrite_twitter_handles(text: &str, sanitize: bool) -> String {
    let replacement = if sanitize { "$1" } else { "@$1" };
    let text = twitter_qualified().replace_all(text, replacement).into_owned();

    if !sanitize {
        return text;
    }

    let protected: Vec<(usize, usize)> = fediverse_handle()
        .find_iter(&text)
        .chain(fediverse_profile().find_iter(&text))
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for m in short_handle().find_iter(&text) {
        let span = (m.start(), m.end());

        if preceded_by_word_char(&text, m.start())
            || protected.iter().any(|p| overlaps(span, *p))
        {
            continue;
        }

        // drop the leading '@'
        out.push_str(&text[last..m.start()]);
        out.push_str(&text[m.start() + 1..m.end()]);
        last = m.end();
    }

    out.push_str(&text[last..]);
    out
}

/// Remove links to media hosted on `instance_url`
pub fn strip_media_urls(text: &str, instance_url: &str) -> String {
    if instance_url.is_empty() {
        return text.to_string();
    }

    let pattern = format!(r"{}/media/[\w-]+\s?", regex::escape(instance_url));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Split a leading `CW: ...` or `TW: ...` line off the body
pub fn extract_content_warning(text: &str) -> (String, Option<String>) {
    match leading_cw().captures(text) {
        Some(caps) => {
            let warning = caps[1].trim().to_string();
            let body = text[caps[0].len()..].trim().to_string();
            (body, Some(warning))
        }
        None => (text.to_string(), None),
    }
}

/// Replace every literal occurrence of each `(from, to)` pair
pub fn replace_all_literal<'a, I>(text: &str, pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs.into_iter().fold(text.to_string(), |acc, (from, to)| {
        if from.is_empty() {
            acc
        } else {
            acc.replace(from, to)
        }
    })
}

/// Number of UTF-16 code units, the unit both networks count in
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Longest prefix of `text` that fits in `budget` UTF-16 code units
pub fn utf16_prefix(text: &str, budget: usize) -> &str {
    let mut used = 0;
    for (index, c) in text.char_indices() {
        used += c.len_utf16();
        if used > budget {
            return &text[..index];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup_mastodon_status() {
        let html = concat!(
            "<p>Hello <span class=\"h-card\"><a href=\"https://pdx.social/@moa\" class=\"u-url mention\">@<span>moa</span></a></span></p>",
            "<p>line one<br />line two <a href=\"https://example.com/page\">https://example.com/page</a></p>"
        );

        assert_eq!(
            strip_markup(html),
            "Hello @moa\n\nline one\nline two https://example.com/page"
        );
    }

    #[test]
    fn test_strip_markup_leaves_no_tags() {
        let html = "<p><b>bold</b> <i>it</i><br>next</p>";
        let text = strip_markup(html);
        assert!(!text.contains('<'));
        assert_eq!(text, "bold it\nnext");
    }

    #[test]
    fn test_unescape_entities() {
        assert_eq!(unescape("fish &amp; chips &lt;3 &#39;yes&#39;"), "fish & chips <3 'yes'");
    }

    #[test]
    fn test_qualify_mentions() {
        let mut mentions = HashMap::new();
        mentions.insert("moa".to_string(), "@moa@pdx.social".to_string());

        assert_eq!(
            qualify_mentions("hi @moa and @moa@pdx.social and @moax", &mentions),
            "hi @moa@pdx.social and @moa@pdx.social and @moax"
        );
    }

    #[test]
    fn test_qualify_mentions_is_idempotent() {
        let mut mentions = HashMap::new();
        mentions.insert("alice".to_string(), "@alice@example.social".to_string());

        let once = qualify_mentions("@alice look", &mentions);
        let twice = qualify_mentions(&once, &mentions);
        assert_eq!(once, "@alice@example.social look");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_qualify_mentions_ignores_email_addresses() {
        let mut mentions = HashMap::new();
        mentions.insert("example".to_string(), "@example@host.social".to_string());

        assert_eq!(
            qualify_mentions("mail me@example", &mentions),
            "mail me@example"
        );
    }

    #[test]
    fn test_twitter_qualified_handles() {
        assert_eq!(
            rewrite_twitter_handles("cc @jack@twitter.com", false),
            "cc @jack"
        );
        assert_eq!(
            rewrite_twitter_handles("cc @jack@twitter.com", true),
            "cc jack"
        );
    }

    #[test]
    fn test_sanitize_keeps_fediverse_handles() {
        let text = "hey @bob and @carol@mastodon.social see https://mastodon.social/@dave";
        assert_eq!(
            rewrite_twitter_handles(text, true),
            "hey bob and @carol@mastodon.social see https://mastodon.social/@dave"
        );
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let text = "@bob @carol@mastodon.social @eve@twitter.com";
        let once = rewrite_twitter_handles(text, true);
        assert_eq!(rewrite_twitter_handles(&once, true), once);
    }

    #[test]
    fn test_strip_media_urls() {
        let text = "look https://pdx.social/media/abc-123 at this";
        assert_eq!(
            strip_media_urls(text, "https://pdx.social"),
            "look at this"
        );
        assert_eq!(strip_media_urls(text, ""), text);
    }

    #[test]
    fn test_extract_content_warning() {
        let (body, cw) = extract_content_warning("CW: spoilers\nthe butler did it");
        assert_eq!(body, "the butler did it");
        assert_eq!(cw.as_deref(), Some("spoilers"));

        let (body, cw) = extract_content_warning("tw: food\nsoup");
        assert_eq!(body, "soup");
        assert_eq!(cw.as_deref(), Some("food"));

        let (body, cw) = extract_content_warning("no warning here\nCW: late");
        assert_eq!(body, "no warning here\nCW: late");
        assert!(cw.is_none());
    }

    #[test]
    fn test_utf16_helpers() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("😀"), 2);
        assert_eq!(utf16_prefix("ab😀cd", 3), "ab");
        assert_eq!(utf16_prefix("ab😀cd", 4), "ab😀");
        assert_eq!(utf16_prefix("ab", 10), "ab");
    }
}
