//! String normalization and term matching shared by the structured filters
//! and the lexical index.

/// Aliases folded onto one canonical spelling before comparison.
const ALIASES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("ts", "typescript"),
    ("py", "python"),
    ("golang", "go"),
    ("rs", "rust"),
    ("rustlang", "rust"),
    ("k8s", "kubernetes"),
    ("postgres", "postgresql"),
    ("psql", "postgresql"),
    ("node.js", "node"),
    ("nodejs", "node"),
    ("reactjs", "react"),
    ("react.js", "react"),
    ("vue.js", "vue"),
    ("vuejs", "vue"),
    ("next.js", "nextjs"),
    ("c sharp", "c#"),
    ("csharp", "c#"),
    ("cpp", "c++"),
    ("tf", "terraform"),
    ("ml", "machine-learning"),
    ("ai", "artificial-intelligence"),
];

/// Lowercase, keep alphanumerics plus `+`, `#` and inner `.`/`-`, collapse whitespace.
#[must_use]
pub fn normalize_text(input: &str) -> String {
    let lower = input.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    let mut out = String::with_capacity(lower.len());

    for (i, &c) in chars.iter().enumerate() {
        let keep = if c.is_alphanumeric() || c == '+' || c == '#' {
            true
        } else if c == '.' || c == '-' {
            let prev = i.checked_sub(1).and_then(|p| chars.get(p));
            let next = chars.get(i + 1);
            prev.is_some_and(|p| p.is_alphanumeric()) && next.is_some_and(|n| n.is_alphanumeric())
        } else {
            false
        };

        if keep {
            out.push(c);
        } else if !out.ends_with(' ') && !out.is_empty() {
            out.push(' ');
        }
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out
}

/// Canonical spelling of an already-normalized term.
#[must_use]
pub fn canonical_term(term: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == term)
        .map_or(term, |(_, canonical)| canonical)
}

/// Normalize and canonicalize a free-form value (e.g. `"Node.JS"` → `"node"`).
#[must_use]
pub fn canonicalize(value: &str) -> String {
    let normalized = normalize_text(value);
    let whole = canonical_term(&normalized);
    if whole != normalized {
        return whole.to_owned();
    }
    normalized
        .split(' ')
        .map(canonical_term)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether two values name the same thing after normalization and aliasing.
#[must_use]
pub fn terms_match(a: &str, b: &str) -> bool {
    let a = canonicalize(a);
    !a.is_empty() && a == canonicalize(b)
}

/// Whether every token of `needle` appears as a whole token in `haystack`.
#[must_use]
pub fn contains_term(haystack: &str, needle: &str) -> bool {
    let needle = canonicalize(needle);
    if needle.is_empty() {
        return false;
    }
    let hay = canonicalize(haystack);
    if hay == needle {
        return true;
    }
    let hay_tokens: Vec<&str> = hay.split(' ').collect();
    let needle_tokens: Vec<&str> = needle.split(' ').collect();
    hay_tokens
        .windows(needle_tokens.len())
        .any(|w| w == needle_tokens.as_slice())
}

/// Whether any value in `values` matches `wanted` exactly or as a contained term.
#[must_use]
pub fn any_value_matches(values: &[String], wanted: &str) -> bool {
    values
        .iter()
        .any(|v| terms_match(v, wanted) || contains_term(v, wanted))
}

/// First `max_chars` characters of `text` on a char boundary, with an ellipsis when cut.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        let mut cut = head.trim_end().to_owned();
        cut.push('…');
        cut
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_text("  Hello,   World!  "), "hello world");
        assert_eq!(normalize_text("Node.js / C++ & C#"), "node.js c++ c#");
        assert_eq!(normalize_text("end."), "end");
        assert_eq!(normalize_text("real-time"), "real-time");
        assert_eq!(normalize_text("--"), "");
    }

    #[test]
    fn aliases_fold() {
        assert!(terms_match("JS", "JavaScript"));
        assert!(terms_match("Golang", "go"));
        assert!(terms_match("Node.JS", "node"));
        assert!(terms_match("Rust", "rust"));
        assert!(!terms_match("Rust", "Python"));
        assert!(!terms_match("", ""));
    }

    #[test]
    fn contains_whole_tokens_only() {
        assert!(contains_term("Senior Rust engineer", "rust"));
        assert!(contains_term("machine learning platform", "Machine Learning"));
        assert!(!contains_term("Trustworthy systems", "rust"));
        assert!(!contains_term("anything", ""));
    }

    #[test]
    fn any_value() {
        let values = vec!["TypeScript".to_owned(), "Web Assembly".to_owned()];
        assert!(any_value_matches(&values, "ts"));
        assert!(any_value_matches(&values, "assembly"));
        assert!(!any_value_matches(&values, "rust"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo wörld", 6), "héllo…");
        assert_eq!(truncate_chars("", 3), "");
    }
}
