//! Tolerant reads from incomplete JSON snapshots produced while a structured
//! response is still streaming.

/// Value of the top-level string field `field` in `snapshot`.
///
/// Complete documents are parsed normally. For incomplete ones the scanner
/// walks the text, finds `field` as a key of the outermost object and decodes
/// its string value up to the last fully received character. Returns `None`
/// while the key or the opening quote of its value has not arrived yet, or
/// when the value is not a string.
#[must_use]
pub fn extract_string_field(snapshot: &str, field: &str) -> Option<String> {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(snapshot) {
        return map.get(field).and_then(|v| v.as_str()).map(str::to_owned);
    }

    let chars: Vec<char> = snapshot.chars().collect();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' | '[' => {
                depth += 1;
                i += 1;
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            '"' => {
                let scanned = decode_string(&chars, i + 1);
                if !scanned.closed {
                    return None;
                }
                i = scanned.next;
                if depth != 1 || scanned.text != field {
                    continue;
                }
                let colon = skip_whitespace(&chars, i);
                if chars.get(colon) != Some(&':') {
                    continue;
                }
                let value_start = skip_whitespace(&chars, colon + 1);
                return match chars.get(value_start) {
                    Some('"') => Some(decode_string(&chars, value_start + 1).text),
                    _ => None,
                };
            }
            _ => i += 1,
        }
    }
    None
}

struct Scanned {
    text: String,
    /// Index just past the closing quote (or `chars.len()` when unterminated).
    next: usize,
    closed: bool,
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    i
}

fn decode_string(chars: &[char], start: usize) -> Scanned {
    let mut text = String::new();
    let mut i = start;

    while i < chars.len() {
        match chars[i] {
            '"' => {
                return Scanned {
                    text,
                    next: i + 1,
                    closed: true,
                };
            }
            '\\' => {
                let Some(&escape) = chars.get(i + 1) else {
                    break;
                };
                match escape {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    'b' => text.push('\u{0008}'),
                    'f' => text.push('\u{000C}'),
                    'u' => {
                        let Some((ch, consumed)) = decode_unicode_escape(chars, i) else {
                            break;
                        };
                        text.push(ch);
                        i += consumed;
                        continue;
                    }
                    other => text.push(other),
                }
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Scanned {
        text,
        next: chars.len(),
        closed: false,
    }
}

fn hex4(chars: &[char], start: usize) -> Option<u32> {
    let digits = chars.get(start..start + 4)?;
    let s: String = digits.iter().collect();
    u32::from_str_radix(&s, 16).ok()
}

/// Decode `\uXXXX` (and a following low surrogate) starting at the backslash.
/// Returns `None` when the escape is still incomplete.
fn decode_unicode_escape(chars: &[char], backslash: usize) -> Option<(char, usize)> {
    let high = hex4(chars, backslash + 2)?;
    if (0xD800..0xDC00).contains(&high) {
        if chars.get(backslash + 6) != Some(&'\\') || chars.get(backslash + 7) != Some(&'u') {
            if backslash + 8 > chars.len() {
                return None;
            }
            return Some((char::REPLACEMENT_CHARACTER, 6));
        }
        let low = hex4(chars, backslash + 8)?;
        let combined = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
        return Some((
            char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER),
            12,
        ));
    }
    Some((char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER), 6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_document() {
        let s = r#"{"message":"hello","thoughts":[]}"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("hello"));
    }

    #[test]
    fn unterminated_value() {
        let s = r#"{"thoughts":["a"],"message":"Hel"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("Hel"));
    }

    #[test]
    fn key_not_yet_received() {
        assert!(extract_string_field(r#"{"thoughts":["a"],"mess"#, "message").is_none());
        assert!(extract_string_field(r#"{"message":"#, "message").is_none());
        assert!(extract_string_field("", "message").is_none());
    }

    #[test]
    fn empty_value_after_quote() {
        assert_eq!(
            extract_string_field(r#"{"message":""#, "message").as_deref(),
            Some("")
        );
    }

    #[test]
    fn escapes_decoded() {
        let s = r#"{"message":"line\nnext \"quoted\" tab\t"#;
        assert_eq!(
            extract_string_field(s, "message").as_deref(),
            Some("line\nnext \"quoted\" tab\t")
        );
    }

    #[test]
    fn trailing_backslash_held_back() {
        let s = r#"{"message":"abc\"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("abc"));
    }

    #[test]
    fn partial_unicode_escape_held_back() {
        let s = r#"{"message":"caf\u00"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("caf"));
        let s = r#"{"message":"café!"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("café!"));
    }

    #[test]
    fn surrogate_pair() {
        let s = r#"{"message":"hi 😀!"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("hi 😀!"));
        let s = r#"{"message":"hi \ud83d\ude"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("hi "));
    }

    #[test]
    fn nested_key_with_same_name_ignored() {
        let s = r#"{"meta":{"message":"inner"},"message":"outer"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("outer"));
    }

    #[test]
    fn string_value_equal_to_field_name_is_not_a_key() {
        let s = r#"{"kind":"message","message":"real"#;
        assert_eq!(extract_string_field(s, "message").as_deref(), Some("real"));
    }

    #[test]
    fn non_string_value() {
        assert!(extract_string_field(r#"{"message":null"#, "message").is_none());
    }
}
