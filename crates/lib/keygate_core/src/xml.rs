//! XML escaping for hand-built protocol documents.
//!
//! The escapes match exclusive canonicalization output, so documents built
//! with these helpers are already in canonical form and can be digested
//! as-is.

/// Escape character data.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a double-quoted attribute value.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whether `name` can be used as an unprefixed element name.
pub fn is_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.to_ascii_lowercase().starts_with("xml")
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_attribute_escaping_differ() {
        assert_eq!(escape_text(r#"a<b>&"c""#), r#"a&lt;b&gt;&amp;"c""#);
        assert_eq!(escape_attr("a<b>&\"c\"\n"), "a&lt;b>&amp;&quot;c&quot;&#xA;");
    }

    #[test]
    fn element_names() {
        assert!(is_element_name("displayName"));
        assert!(is_element_name("_x-1.2"));
        assert!(!is_element_name("1abc"));
        assert!(!is_element_name("a b"));
        assert!(!is_element_name("xmlFoo"));
        assert!(!is_element_name(""));
    }
}
