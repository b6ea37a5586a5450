//! Lenient JSON pre-pass.
//!
//! Service documents are hand edited, so `//` line comments, `/* */` block
//! comments and trailing commas before `]` or `}` are tolerated. The pass is
//! string aware: comment markers and commas inside string literals are kept.

/// Returns `input` with comments and trailing commas removed.
///
/// Removed comments are replaced by spaces (newlines are kept) so that line
/// and column numbers reported by `serde_json` still point into the original
/// text.
pub fn strip(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0usize;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 2;
                    continue;
                }
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                out.push_str("  ");
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    out.push(if chars[i] == '\n' { '\n' } else { ' ' });
                    i += 1;
                }
                if i < chars.len() {
                    out.push_str("  ");
                    i += 2;
                }
            }
            ',' if closes_after_whitespace(&chars, i + 1) => {
                out.push(' ');
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// True when the next significant character after `from` closes a container.
/// Comments between the comma and the bracket are skipped.
fn closes_after_whitespace(chars: &[char], mut from: usize) -> bool {
    while from < chars.len() {
        match chars[from] {
            c if c.is_whitespace() => from += 1,
            '/' if chars.get(from + 1) == Some(&'/') => {
                while from < chars.len() && chars[from] != '\n' {
                    from += 1;
                }
            }
            '/' if chars.get(from + 1) == Some(&'*') => {
                from += 2;
                while from < chars.len()
                    && !(chars[from] == '*' && chars.get(from + 1) == Some(&'/'))
                {
                    from += 1;
                }
                from += 2;
            }
            ']' | '}' => return true,
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::strip;
    use serde_json::json;

    fn parse(input: &str) -> serde_json::Value {
        serde_json::from_str(&strip(input)).unwrap()
    }

    #[test]
    fn strips_line_and_block_comments() {
        let value = parse(
            r#"{
  // the service name
  "name": "api", /* inline */
  "port": 22
}"#,
        );
        assert_eq!(value, json!({"name": "api", "port": 22}));
    }

    #[test]
    fn strips_trailing_commas() {
        let value = parse(r#"{"setup_list": ["a", "b",], "tags": {"k": "v",},}"#);
        assert_eq!(value, json!({"setup_list": ["a", "b"], "tags": {"k": "v"}}));
    }

    #[test]
    fn keeps_comment_markers_inside_strings() {
        let value = parse(r#"{"url": "http://example.com/a,]", "note": "/* not a comment */"}"#);
        assert_eq!(value["url"], json!("http://example.com/a,]"));
        assert_eq!(value["note"], json!("/* not a comment */"));
    }

    #[test]
    fn keeps_escaped_quotes() {
        let value = parse(r#"{"cmd": "echo \"// hi\""}"#);
        assert_eq!(value["cmd"], json!("echo \"// hi\""));
    }

    #[test]
    fn trailing_comma_followed_by_comment() {
        let value = parse("[1, 2, // last\n]");
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn preserves_line_numbers() {
        let stripped = strip("/* a\nb */ {}");
        assert_eq!(stripped.lines().count(), 2);
    }
}
