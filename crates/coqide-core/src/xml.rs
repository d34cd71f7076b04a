//! Small XML scanner for the prover's output stream.
//!
//! The prover writes an unbounded sequence of top-level elements with no
//! enclosing document, so framing works one element at a time:
//! [`frame_end`] reports where the first complete element ends (or that more
//! bytes are needed) and [`parse`] turns one complete element into an
//! [`Element`] tree.
//!
//! Running out of input is always reported as [`XmlError::UnexpectedEof`]
//! before any structural check can fail, which is what lets callers treat a
//! strict prefix of a valid element as "incomplete" rather than "malformed".

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Markup-level error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected {found:?} at offset {offset}")]
    Unexpected { offset: usize, found: char },
    #[error("closing tag </{found}> does not match <{expected}> at offset {offset}")]
    MismatchedTag {
        offset: usize,
        expected: String,
        found: String,
    },
    #[error("unknown entity &{0};")]
    UnknownEntity(String),
    #[error("invalid UTF-8 at offset {0}")]
    InvalidUtf8(usize),
    #[error("text outside of any element at offset {0}")]
    StrayText(usize),
}

/// A parsed element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// Element content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    /// Create an element with no attributes or children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Look up an attribute value.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.name == name)
    }

    /// All descendant text in document order.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(el) => el.collect_text(out),
            }
        }
    }

    /// A copy of this tree with every descendant element named `name` removed.
    #[must_use]
    pub fn without(&self, name: &str) -> Self {
        let children = self
            .children
            .iter()
            .filter_map(|node| match node {
                Node::Element(el) if el.name == name => None,
                Node::Element(el) => Some(Node::Element(el.without(name))),
                Node::Text(t) => Some(Node::Text(t.clone())),
            })
            .collect();
        Self {
            name: self.name.clone(),
            attrs: self.attrs.clone(),
            children,
        }
    }

    /// Serialize back to markup.
    #[must_use]
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out);
        out
    }

    fn write_markup(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(&escape(t)),
                Node::Element(el) => el.write_markup(out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Escape text for use in element content or a double-quoted attribute.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Locate the first complete top-level element in `buf`.
///
/// Leading whitespace, declarations and comments are skipped. Returns
/// `Ok(None)` when more input is needed.
///
/// # Errors
/// Returns an error when the buffered bytes can never become a valid element.
pub fn frame_end(buf: &[u8]) -> Result<Option<Range<usize>>, XmlError> {
    let mut cur = Cursor::new(buf);
    match scan_element(&mut cur) {
        Ok(range) => Ok(Some(range)),
        Err(XmlError::UnexpectedEof) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parse the first element in a complete fragment, decoding entities.
///
/// # Errors
/// Returns an error for malformed markup, including a truncated fragment.
pub fn parse(src: &str) -> Result<Element, XmlError> {
    let mut cur = Cursor::new(src.as_bytes());
    seek_element(&mut cur)?;
    Parser::decoding().element(&mut cur)
}

fn scan_element(cur: &mut Cursor<'_>) -> Result<Range<usize>, XmlError> {
    seek_element(cur)?;
    let start = cur.pos;
    Parser::raw().element(cur)?;
    Ok(start..cur.pos)
}

/// Move to the start tag of the next element.
fn seek_element(cur: &mut Cursor<'_>) -> Result<(), XmlError> {
    loop {
        cur.skip_ws();
        match cur.peek() {
            None => return Err(XmlError::UnexpectedEof),
            Some(b'<') => {}
            Some(_) => return Err(XmlError::StrayText(cur.pos)),
        }
        if !cur.skip_misc()? {
            return Ok(());
        }
    }
}

struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<u8, XmlError> {
        let b = self.peek().ok_or(XmlError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<(), XmlError> {
        let offset = self.pos;
        let found = self.bump()?;
        if found == want {
            Ok(())
        } else {
            Err(XmlError::Unexpected {
                offset,
                found: char::from(found),
            })
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Whether the remaining input starts with `pat`; a remainder that is a
    /// strict prefix of `pat` cannot be decided yet.
    fn starts_with(&self, pat: &[u8]) -> Result<bool, XmlError> {
        let rest = &self.src[self.pos..];
        if rest.len() >= pat.len() {
            Ok(rest.starts_with(pat))
        } else if pat.starts_with(rest) {
            Err(XmlError::UnexpectedEof)
        } else {
            Ok(false)
        }
    }

    /// Advance past the next occurrence of `pat`, returning what precedes it.
    fn take_through(&mut self, pat: &[u8]) -> Result<&'a [u8], XmlError> {
        let rest = &self.src[self.pos..];
        let at = rest
            .windows(pat.len())
            .position(|w| w == pat)
            .ok_or(XmlError::UnexpectedEof)?;
        self.pos += at + pat.len();
        Ok(&rest[..at])
    }

    fn take_until(&mut self, stop: u8) -> Result<&'a [u8], XmlError> {
        let rest = &self.src[self.pos..];
        let at = rest
            .iter()
            .position(|&b| b == stop)
            .ok_or(XmlError::UnexpectedEof)?;
        self.pos += at;
        Ok(&rest[..at])
    }

    fn name(&mut self) -> Result<&'a str, XmlError> {
        let start = self.pos;
        loop {
            match self.peek() {
                None => return Err(XmlError::UnexpectedEof),
                Some(b) if is_name_byte(b) => self.pos += 1,
                Some(b) if self.pos == start => {
                    return Err(XmlError::Unexpected {
                        offset: start,
                        found: char::from(b),
                    });
                }
                Some(_) => break,
            }
        }
        std::str::from_utf8(&self.src[start..self.pos]).map_err(|_| XmlError::InvalidUtf8(start))
    }

    /// Skip a declaration, processing instruction or comment at the cursor.
    fn skip_misc(&mut self) -> Result<bool, XmlError> {
        if self.starts_with(b"<?")? {
            self.take_through(b"?>")?;
            Ok(true)
        } else if self.starts_with(b"<!--")? {
            self.take_through(b"-->")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

const fn is_name_byte(b: u8) -> bool {
    !matches!(
        b,
        b' ' | b'\t' | b'\r' | b'\n' | b'/' | b'>' | b'<' | b'=' | b'"' | b'\''
    )
}

struct Parser {
    decode: bool,
}

impl Parser {
    /// Framing mode: structure only, text is left as-is.
    const fn raw() -> Self {
        Self { decode: false }
    }

    const fn decoding() -> Self {
        Self { decode: true }
    }

    fn element(&self, cur: &mut Cursor<'_>) -> Result<Element, XmlError> {
        cur.expect(b'<')?;
        let mut element = Element::new(cur.name()?);

        loop {
            cur.skip_ws();
            let offset = cur.pos;
            match cur.bump()? {
                b'/' => {
                    cur.expect(b'>')?;
                    return Ok(element);
                }
                b'>' => break,
                _ => {
                    cur.pos = offset;
                    let key = cur.name()?.to_owned();
                    cur.skip_ws();
                    cur.expect(b'=')?;
                    cur.skip_ws();
                    let quote_at = cur.pos;
                    let quote = cur.bump()?;
                    if quote != b'"' && quote != b'\'' {
                        return Err(XmlError::Unexpected {
                            offset: quote_at,
                            found: char::from(quote),
                        });
                    }
                    let raw = cur.take_until(quote)?;
                    cur.pos += 1;
                    element.attrs.push((key, self.text(raw, quote_at + 1)?));
                }
            }
        }

        loop {
            let offset = cur.pos;
            if cur.peek().ok_or(XmlError::UnexpectedEof)? != b'<' {
                let raw = cur.take_until(b'<')?;
                element.children.push(Node::Text(self.text(raw, offset)?));
                continue;
            }
            if cur.starts_with(b"</")? {
                cur.pos += 2;
                let found = cur.name()?;
                cur.skip_ws();
                cur.expect(b'>')?;
                if found != element.name {
                    return Err(XmlError::MismatchedTag {
                        offset,
                        expected: element.name,
                        found: found.to_owned(),
                    });
                }
                return Ok(element);
            }
            if cur.starts_with(b"<![CDATA[")? {
                cur.pos += 9;
                let raw = cur.take_through(b"]]>")?;
                element
                    .children
                    .push(Node::Text(utf8(raw, offset)?.to_owned()));
                continue;
            }
            if cur.skip_misc()? {
                continue;
            }
            element.children.push(Node::Element(self.element(cur)?));
        }
    }

    fn text(&self, raw: &[u8], offset: usize) -> Result<String, XmlError> {
        let text = utf8(raw, offset)?;
        if self.decode {
            decode_entities(text)
        } else {
            Ok(text.to_owned())
        }
    }
}

fn utf8(raw: &[u8], offset: usize) -> Result<&str, XmlError> {
    std::str::from_utf8(raw).map_err(|e| XmlError::InvalidUtf8(offset + e.valid_up_to()))
}

fn decode_entities(text: &str) -> Result<String, XmlError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp + 1..];
        let semi = rest
            .find(';')
            .ok_or_else(|| XmlError::UnknownEntity(rest.chars().take(8).collect()))?;
        let entity = &rest[..semi];
        out.push(resolve_entity(entity)?);
        rest = &rest[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_entity(entity: &str) -> Result<char, XmlError> {
    let unknown = || XmlError::UnknownEntity(entity.to_owned());
    match entity {
        "lt" => Ok('<'),
        "gt" => Ok('>'),
        "amp" => Ok('&'),
        "quot" => Ok('"'),
        "apos" => Ok('\''),
        _ => {
            let code = if let Some(hex) = entity.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).map_err(|_| unknown())?
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().map_err(|_| unknown())?
            } else {
                return Err(unknown());
            };
            char::from_u32(code).ok_or_else(unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_first_element_and_ignores_trailing_bytes() {
        let buf = b"  <a x=\"1\"><b/>hi</a><c";
        let range = frame_end(buf).unwrap().unwrap();
        assert_eq!(&buf[range], b"<a x=\"1\"><b/>hi</a>");
    }

    #[test]
    fn every_strict_prefix_needs_more_input() {
        let doc = b"<?xml version=\"1.0\"?><value val=\"good\"><pair><string>a &amp; b</string><![CDATA[<x>]]></pair></value>";
        for cut in 0..doc.len() {
            assert_eq!(frame_end(&doc[..cut]), Ok(None), "prefix of length {cut}");
        }
        assert!(frame_end(doc).unwrap().is_some());
    }

    #[test]
    fn mismatched_close_is_an_error() {
        let err = frame_end(b"<a><b></a></b>").unwrap_err();
        assert!(matches!(err, XmlError::MismatchedTag { .. }));
    }

    #[test]
    fn stray_text_is_an_error() {
        assert_eq!(frame_end(b"oops<a/>"), Err(XmlError::StrayText(0)));
    }

    #[test]
    fn parse_decodes_standard_and_numeric_entities() {
        let el = parse("<s k=\"&quot;q&quot;\">&lt;&#65;&#x42;&gt;</s>").unwrap();
        assert_eq!(el.attr("k"), Some("\"q\""));
        assert_eq!(el.text(), "<AB>");
    }

    #[test]
    fn parse_rejects_unknown_entities() {
        let err = parse("<s>&nbsp;</s>").unwrap_err();
        assert_eq!(err, XmlError::UnknownEntity("nbsp".into()));
    }

    #[test]
    fn text_concatenates_nested_content() {
        let el = parse("<richpp><_><kw>Lemma</kw> foo : <t>True</t></_></richpp>").unwrap();
        assert_eq!(el.text(), "Lemma foo : True");
    }

    #[test]
    fn without_strips_named_descendants() {
        let el = parse("<value val=\"fail\"><state_id val=\"3\"/><string>bad</string></value>").unwrap();
        assert_eq!(
            el.without("state_id").to_markup(),
            "<value val=\"fail\"><string>bad</string></value>"
        );
    }

    #[test]
    fn escape_round_trips_through_parse() {
        let text = "a < b && c > \"d\" 'e'";
        let el = parse(&format!("<string>{}</string>", escape(text))).unwrap();
        assert_eq!(el.text(), text);
    }
}
