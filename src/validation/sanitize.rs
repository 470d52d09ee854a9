//! String sanitization for validated input.
//!
//! Every string leaf is HTML-entity escaped (`& < > " '`) and truncated to a
//! maximum number of characters. Both steps are entity-aware so that
//! sanitizing an already sanitized value changes nothing:
//!
//! - an `&` that already starts one of the entities this module emits is
//!   left alone;
//! - truncation never cuts through an entity; it backs off to before the `&`.

use serde_json::Value;

/// Default maximum length, in characters
pub const DEFAULT_MAX_LENGTH: usize = 10_000;

/// Entities recognized as already escaped. `&#39;` is accepted on input,
/// `&#x27;` is what we emit.
const ENTITIES: [&str; 6] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#x27;", "&#39;"];

fn entity_at(s: &str, idx: usize) -> Option<&'static str> {
    let rest = s.get(idx..)?;
    ENTITIES.into_iter().find(|e| rest.starts_with(e))
}

/// HTML-escape `& < > " '`, leaving existing entities intact
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (idx, c) in s.char_indices() {
        match c {
            '&' if entity_at(s, idx).is_some() => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Truncate to at most `max_chars` characters without splitting an entity
#[must_use]
pub fn truncate(s: &str, max_chars: usize) -> &str {
    let Some((mut cut, _)) = s.char_indices().nth(max_chars) else {
        return s;
    };
    if let Some(amp) = s[..cut].rfind('&') {
        if entity_at(s, amp).is_some_and(|e| amp + e.len() > cut) {
            cut = amp;
        }
    }
    &s[..cut]
}

/// Escape then truncate a single string
#[must_use]
pub fn sanitize_string(s: &str, max_chars: usize) -> String {
    let escaped = escape_html(s);
    truncate(&escaped, max_chars).to_string()
}

/// Recursively sanitize every string leaf. Object keys are left as-is.
#[must_use]
pub fn sanitize_value(value: Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(&s, max_chars)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| sanitize_value(v, max_chars)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v, max_chars)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<script>alert("x & 'y'")</script>"#),
            "&lt;script&gt;alert(&quot;x &amp; &#x27;y&#x27;&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn existing_entities_untouched() {
        assert_eq!(escape_html("a &amp; b &lt; c &#39;"), "a &amp; b &lt; c &#39;");
        assert_eq!(escape_html("AT&T &amp"), "AT&amp;T &amp;amp");
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("héllo wörld", 5), "héllo");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("", 0), "");
    }

    #[test]
    fn truncate_never_splits_entity() {
        // "ab&amp;cd": cutting at 4 chars would leave "ab&a"
        assert_eq!(truncate("ab&amp;cd", 4), "ab");
        assert_eq!(truncate("ab&amp;cd", 7), "ab&amp;");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "plain text",
            "<b>bold</b> & 'quoted' \"double\"",
            "AT&T &amp &amp; &#39; &#x27; &lt",
            "&&&&<<<>>>",
            "ünïcödé & émoji 🚀 <tag>",
            "",
        ];
        for max in [0, 1, 3, 4, 5, 8, 12, 40, DEFAULT_MAX_LENGTH] {
            for s in samples {
                let once = sanitize_string(s, max);
                assert_eq!(sanitize_string(&once, max), once, "input {s:?} max {max}");
                assert!(once.chars().count() <= max);
            }
        }
    }

    #[test]
    fn sanitize_value_recurses() {
        let input = json!({
            "title": "<h1>Hi</h1>",
            "count": 3,
            "nested": {"list": ["a&b", null, true]}
        });
        let out = sanitize_value(input, DEFAULT_MAX_LENGTH);
        assert_eq!(out["title"], "&lt;h1&gt;Hi&lt;/h1&gt;");
        assert_eq!(out["count"], 3);
        assert_eq!(out["nested"]["list"][0], "a&amp;b");
        assert_eq!(out["nested"]["list"][2], true);
    }
}
