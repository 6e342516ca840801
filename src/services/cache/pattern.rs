use regex::Regex;
use std::fmt;

/// A Redis-style glob (`*`, `?`, `[abc]`, `[a-z]`, `[^x]`, `\` escape).
///
/// The raw text is sent to Redis as a `SCAN MATCH` argument; the compiled
/// form matches keys held in process.
#[derive(Clone, Debug)]
pub struct GlobPattern {
    raw: String,
    // `None` when the glob has a malformed class; it then matches only itself.
    compiled: Option<Regex>,
}

impl GlobPattern {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            compiled: Regex::new(&glob_to_regex(raw)).ok(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, key: &str) -> bool {
        match &self.compiled {
            Some(regex) => regex.is_match(key),
            None => key == self.raw,
        }
    }

    /// Escapes glob metacharacters so `literal` only matches itself.
    pub fn escape(literal: &str) -> String {
        let mut escaped = String::with_capacity(literal.len());
        for c in literal.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_char(out: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '-' | '&' | '~') {
        out.push('\\');
    }
    out.push(c);
}

fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                push_literal(&mut out, chars[i]);
            }
            '[' => match translate_class(&chars[i + 1..]) {
                Some((class, consumed)) => {
                    out.push_str(&class);
                    i += consumed;
                }
                None => push_literal(&mut out, '['),
            },
            c => push_literal(&mut out, c),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Translates the body of a `[...]` class. Returns the regex class and how
/// many glob characters it consumed, or `None` if the class never closes.
fn translate_class(rest: &[char]) -> Option<(String, usize)> {
    let mut class = String::from("[");
    let mut i = 0;

    if rest.first() == Some(&'^') {
        class.push('^');
        i += 1;
    }

    let body_start = i;
    while i < rest.len() {
        match rest[i] {
            ']' => {
                if i == body_start {
                    // Empty class matches nothing.
                    return Some(("[^\\s\\S]".to_string(), i + 1));
                }
                class.push(']');
                return Some((class, i + 1));
            }
            '\\' if i + 1 < rest.len() => {
                i += 1;
                push_class_char(&mut class, rest[i]);
            }
            '-' if i > body_start && i + 1 < rest.len() && rest[i + 1] != ']' => {
                class.push('-');
            }
            c => push_class_char(&mut class, c),
        }
        i += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_star_and_question_mark() {
        let pattern = GlobPattern::new("erp:invoices:*");
        assert!(pattern.matches("erp:invoices:item:INV-001:"));
        assert!(pattern.matches("erp:invoices:"));
        assert!(!pattern.matches("erp:invoice:list:"));
        assert!(!pattern.matches("xerp:invoices:list:"));

        let single = GlobPattern::new("h?llo");
        assert!(single.matches("hello"));
        assert!(single.matches("hallo"));
        assert!(!single.matches("hllo"));
    }

    #[test]
    fn test_classes() {
        let class = GlobPattern::new("h[ae]llo");
        assert!(class.matches("hello"));
        assert!(class.matches("hallo"));
        assert!(!class.matches("hillo"));

        let negated = GlobPattern::new("h[^e]llo");
        assert!(negated.matches("hallo"));
        assert!(!negated.matches("hello"));

        let range = GlobPattern::new("h[a-c]llo");
        assert!(range.matches("hbllo"));
        assert!(!range.matches("hdllo"));
    }

    #[test]
    fn test_escapes_and_regex_metacharacters_are_literal() {
        let escaped = GlobPattern::new("a\\*b");
        assert!(escaped.matches("a*b"));
        assert!(!escaped.matches("axb"));

        let dotted = GlobPattern::new("erp:list:limit=5.0(x)");
        assert!(dotted.matches("erp:list:limit=5.0(x)"));
        assert!(!dotted.matches("erp:list:limit=500(x)"));
    }

    #[test]
    fn test_unclosed_class_is_literal() {
        let pattern = GlobPattern::new("abc[");
        assert!(pattern.matches("abc["));
        assert!(!pattern.matches("abcd"));
    }

    proptest! {
        #[test]
        fn prop_escaped_literal_matches_only_itself(literal in ".{0,24}", other in ".{0,24}") {
            let pattern = GlobPattern::new(&GlobPattern::escape(&literal));
            prop_assert!(pattern.matches(&literal));
            prop_assert_eq!(pattern.matches(&other), other == literal);
        }

        #[test]
        fn prop_prefix_star_matches_every_extension(prefix in "[a-z:]{1,12}", suffix in ".{0,24}") {
            let pattern = GlobPattern::new(&format!("{}*", GlobPattern::escape(&prefix)));
            let key = format!("{}{}", prefix, suffix);
            prop_assert!(pattern.matches(&key));
        }
    }
}
