//! Length-aware splitting of normalized content
//!
//! Lengths are counted in UTF-16 code units. Any URL is billed at a fixed
//! length by the destination, so the "expected length" of a text replaces
//! each URL's real length with that fixed cost.
//!
//! Content that does not fit is either split into numbered parts
//! (`... (1/3)`) or truncated with an ellipsis followed by the source URL.

use regex::Regex;
use std::sync::OnceLock;

use crate::message::text::{utf16_len, utf16_prefix};

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"]+"#).expect("static regex is valid")
    })
}

/// How content that does not fit the budget is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    Split,
    Truncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splitter {
    /// Length billed for every URL
    pub url_length: usize,
}

impl Splitter {
    pub fn new(url_length: usize) -> Self {
        Self { url_length }
    }

    pub fn expected_length(&self, text: &str) -> usize {
        let mut length = utf16_len(text);
        for m in url_regex().find_iter(text) {
            length = length - utf16_len(m.as_str()) + self.url_length;
        }
        length
    }

    /// Produce the ordered post bodies for `text`
    pub fn fit(
        &self,
        text: &str,
        source_url: &str,
        max_length: usize,
        policy: OverflowPolicy,
    ) -> Vec<String> {
        if self.expected_length(text) <= max_length {
            return vec![text.to_string()];
        }

        match policy {
            OverflowPolicy::Split => self.split(text, max_length),
            OverflowPolicy::Truncate => vec![self.truncate(text, source_url, max_length)],
        }
    }

    /// Greedily pack space separated words into numbered parts
    ///
    /// A single word longer than the budget becomes a part of its own.
    pub fn split(&self, text: &str, max_length: usize) -> Vec<String> {
        let mut digits = 1;

        loop {
            // " (i/n)" with n and i printed with `digits` digits
            let reserved = 4 + 2 * digits;
            let parts = self.pack(text, max_length.saturating_sub(reserved));

            if parts.len().to_string().len() <= digits {
                let total = parts.len();
                return parts
                    .into_iter()
                    .enumerate()
                    .map(|(i, part)| format!("{} ({}/{})", part, i + 1, total))
                    .collect();
            }

            digits += 1;
        }
    }

    fn pack(&self, text: &str, budget: usize) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current: Option<String> = None;

        for word in text.split(' ') {
            current = Some(match current.take() {
                None => word.to_string(),
                Some(part) => {
                    let candidate = format!("{} {}", part, word);
                    if !part.is_empty() && self.expected_length(&candidate) > budget {
                        parts.push(part);
                        word.to_string()
                    } else {
                        candidate
                    }
                }
            });
        }

        if let Some(part) = current {
            if !part.trim().is_empty() {
                parts.push(part);
            }
        }

        parts
    }

    /// Cut `text` so that it plus `…\n{url}` fits in `max_length` as billed
    ///
    /// URLs are kept whole or dropped at the cut; plain text is cut at a
    /// code unit boundary.
    pub fn truncate(&self, text: &str, source_url: &str, max_length: usize) -> String {
        let suffix = format!("…\n{}", source_url);
        let budget = max_length.saturating_sub(self.expected_length(&suffix));

        let mut kept = String::new();
        let mut used = 0;
        let mut last = 0;

        let urls = url_regex().find_iter(text).map(Some).chain(std::iter::once(None));
        for url in urls {
            let plain = match url {
                Some(m) => &text[last..m.start()],
                None => &text[last..],
            };

            let plain_len = utf16_len(plain);
            if used + plain_len > budget {
                kept.push_str(utf16_prefix(plain, budget - used));
                break;
            }
            kept.push_str(plain);
            used += plain_len;

            let Some(m) = url else { break };
            if used + self.url_length > budget {
                break;
            }
            kept.push_str(m.as_str());
            used += self.url_length;
            last = m.end();
        }

        // a cut after `www.` reads as a URL once the ellipsis follows
        while !kept.is_empty() && self.expected_length(&format!("{}{}", kept, suffix)) > max_length
        {
            kept.pop();
        }

        format!("{}{}", kept, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://pdx.social/@moa/1";

    fn splitter() -> Splitter {
        Splitter::new(23)
    }

    fn strip_marker(part: &str) -> &str {
        match part.rfind(" (") {
            Some(index) => &part[..index],
            None => part,
        }
    }

    #[test]
    fn test_urls_billed_at_fixed_length() {
        let text = "see https://example.com/a/very/long/path/that/goes/on/and/on/forever";
        assert_eq!(splitter().expected_length(text), 4 + 23);

        let text = "two www.example.com and http://x.io";
        assert_eq!(splitter().expected_length(text), 9 + 23 + 23);
    }

    #[test]
    fn test_expected_length_counts_utf16() {
        assert_eq!(splitter().expected_length("😀😀"), 4);
        assert_eq!(splitter().expected_length("héllo"), 5);
    }

    #[test]
    fn test_just_under_limit_is_single_part() {
        let text = "a".repeat(279);
        let parts = splitter().fit(&text, URL, 280, OverflowPolicy::Split);
        assert_eq!(parts, vec![text]);
    }

    #[test]
    fn test_split_adds_pagination_and_fits() {
        let text = vec!["word"; 100].join(" ");
        let parts = splitter().fit(&text, URL, 280, OverflowPolicy::Split);

        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with(" (1/2)"));
        assert!(parts[1].ends_with(" (2/2)"));
        for part in &parts {
            assert!(splitter().expected_length(part) <= 280);
        }
    }

    #[test]
    fn test_split_reconstructs_content() {
        let text = "The quick  brown fox\njumps over the lazy dog. ".repeat(20);
        let parts = splitter().split(text.trim_end(), 100);

        let rebuilt: Vec<&str> = parts.iter().map(|p| strip_marker(p)).collect();
        assert_eq!(rebuilt.join(" "), text.trim_end());
    }

    #[test]
    fn test_long_word_becomes_own_part() {
        let long_word = "x".repeat(300);
        let text = format!("A {}", long_word);
        let parts = splitter().split(&text, 280);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], "A (1/2)");
        assert_eq!(parts[1], format!("{} (2/2)", long_word));
    }

    #[test]
    fn test_leading_long_word_does_not_produce_empty_part() {
        let long_word = "y".repeat(300);
        let text = format!("{} tail", long_word);
        let parts = splitter().split(&text, 280);

        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with(&long_word));
        assert_eq!(parts[1], "tail (2/2)");
    }

    #[test]
    fn test_double_digit_part_counts_fit() {
        let text = vec!["abcdefghi"; 150].join(" ");
        let parts = splitter().split(&text, 50);

        assert!(parts.len() >= 10);
        let last = parts.last().unwrap();
        assert!(last.ends_with(&format!("({}/{})", parts.len(), parts.len())));
        for part in &parts {
            assert!(splitter().expected_length(part) <= 50, "{}", part);
        }
    }

    #[test]
    fn test_truncate_never_exceeds_and_ends_with_url() {
        let text = "z".repeat(400);
        let parts = splitter().fit(&text, URL, 280, OverflowPolicy::Truncate);

        assert_eq!(parts.len(), 1);
        assert!(splitter().expected_length(&parts[0]) <= 280);
        assert!(parts[0].ends_with(&format!("…\n{}", URL)));
    }

    #[test]
    fn test_truncate_bills_short_urls_at_fixed_length() {
        let text = vec!["http://a.co"; 20].join(" ");
        let parts = splitter().fit(&text, URL, 280, OverflowPolicy::Truncate);

        assert_eq!(parts.len(), 1);
        assert!(splitter().expected_length(&parts[0]) <= 280, "{}", parts[0]);

        let body = parts[0].strip_suffix(&format!("…\n{}", URL)).unwrap();
        let kept: Vec<&str> = body.split(' ').filter(|w| !w.is_empty()).collect();
        assert!(!kept.is_empty());
        assert!(kept.iter().all(|w| *w == "http://a.co"), "{}", body);
    }

    #[test]
    fn test_truncate_drops_url_that_does_not_fit() {
        let text = format!("{} https://example.com/next", "a".repeat(240));
        let truncated = splitter().truncate(&text, URL, 280);

        assert!(!truncated.contains("example.com"));
        assert!(truncated.starts_with(&"a".repeat(240)));
        assert!(splitter().expected_length(&truncated) <= 280);
    }

    #[test]
    fn test_truncate_respects_surrogate_pairs() {
        let text = "😀".repeat(200);
        let truncated = splitter().truncate(&text, URL, 100);

        assert!(splitter().expected_length(&truncated) <= 100);
        assert!(truncated.ends_with(URL));
    }
}
