//! Candidate normalization: raw tool output in, canonical domain set out.

use std::collections::BTreeSet;

/// Canonical form of a raw candidate: trimmed, lowercased, without the root dot.
/// Returns `None` for blanks and for lines that are not hostname-shaped.
pub fn canonicalize(raw: &str) -> Option<String> {
    let t = raw.trim();
    let t = t.strip_suffix('.').unwrap_or(t);
    if t.is_empty() {
        return None;
    }
    let lower = t.to_ascii_lowercase();
    if !is_hostname_shaped(&lower) {
        return None;
    }
    Some(lower)
}

fn is_hostname_shaped(s: &str) -> bool {
    let valid_chars = s
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_'));
    valid_chars && !s.starts_with('.') && !s.ends_with('.') && !s.contains("..")
}

/// Normalize and deduplicate a raw candidate list into a set.
pub fn dedup<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    let mut dropped = 0usize;
    for item in raw {
        let item = item.as_ref();
        match canonicalize(item) {
            Some(d) => {
                out.insert(d);
            }
            None if item.trim().is_empty() => {}
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "discarded non-hostname candidate lines");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_drops_blanks() {
        let set = dedup(["A.Example.com", "", "   ", "a.example.com", "b.example.com\n"]);
        let got: Vec<_> = set.into_iter().collect();
        assert_eq!(got, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn strips_root_dot() {
        assert_eq!(canonicalize("api.example.com.").as_deref(), Some("api.example.com"));
    }

    #[test]
    fn only_one_root_dot_is_stripped() {
        assert_eq!(canonicalize("a.example.com.."), None);
        let set = dedup(["a.example.com", "a.example.com.", "a.example.com.."]);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["a.example.com"]);
    }

    #[test]
    fn rejects_tool_noise() {
        assert_eq!(canonicalize("[INF] Loading provider config"), None);
        assert_eq!(canonicalize("https://a.example.com"), None);
        assert_eq!(canonicalize("*.example.com"), None);
        assert_eq!(canonicalize(".example.com"), None);
    }

    #[test]
    fn empty_input_is_empty_set() {
        assert!(dedup(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn union_across_stages_counts_once() {
        let passive = vec!["www.example.com", "mail.example.com"];
        let active = vec!["WWW.example.com", "vpn.example.com"];
        let set = dedup(passive.into_iter().chain(active));
        assert_eq!(set.len(), 3);
    }
}
