//! Lenient XML reading for feed documents.
//!
//! Feeds are frequently not well-formed XML: HTML entities like `&nbsp;`
//! appear without a DTD, end tags do not always match, and garbage trails
//! the root element. This module decodes the body according to its
//! declared charset and builds a small element tree on top of quick-xml,
//! keyed by local names so namespace prefixes (`dc:date`,
//! `content:encoded`) do not matter.

use encoding_rs::{Encoding, UTF_8};
use quick_xml::escape::{resolve_html5_entity, resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use thiserror::Error;

/// Maximum element nesting accepted before the document is rejected.
const MAX_DEPTH: usize = 256;

/// Longest reference considered for unescaping, `&` and `;` included.
const MAX_REFERENCE_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(String),

    #[error("document has no root element")]
    NoRoot,

    #[error("unexpected end of document inside <{0}>")]
    Unclosed(String),

    #[error("elements nested deeper than {0} levels")]
    TooDeep(usize),
}

/// An element with its local name, attributes, accumulated text and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Self {
        let attributes = start
            .attributes()
            .with_checks(false)
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                let raw = String::from_utf8_lossy(&attr.value);
                (key, unescape_lenient(&raw).into_owned())
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Attach `unclosed` as an empty child and take over its text and children.
    fn close_void(&mut self, unclosed: Element) {
        self.text.push_str(&unclosed.text);
        self.children.push(Element {
            name: unclosed.name,
            attributes: unclosed.attributes,
            ..Element::default()
        });
        self.children.extend(unclosed.children);
    }

    /// First child with the given local name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given local name, in document order
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Text content with surrounding ASCII whitespace removed.
    ///
    /// Non-breaking spaces produced by `&nbsp;` are content and are kept.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim_matches(|c: char| c.is_ascii_whitespace())
    }

    /// Trimmed text of the first child named `name`, if that text is non-empty
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(Element::trimmed_text)
            .filter(|text| !text.is_empty())
    }
}

/// Decode `body` and parse its root element.
///
/// Parsing stops at the end of the root element; anything after it is
/// ignored.
///
/// # Errors
///
/// Returns [`XmlError`] when the document has no root, ends inside an
/// open element, nests too deeply, or contains markup quick-xml cannot
/// tokenize.
pub fn parse_document(body: &[u8]) -> Result<Element, XmlError> {
    let text = decode(body);
    let mut reader = Reader::from_str(&text);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;

    let mut stack: Vec<Element> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(XmlError::TooDeep(MAX_DEPTH));
                }
                stack.push(Element::from_start(&e));
            }
            Ok(Event::Empty(e)) => {
                let element = Element::from_start(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Ok(Event::End(e)) => {
                // Closes the nearest open element with this name. Elements
                // left open inside it (`<br>` in unescaped HTML) become empty
                // and their content moves up to the parent. An end tag
                // matching nothing open is dropped.
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(depth) = stack.iter().rposition(|open| open.name == name) {
                    while stack.len() > depth + 1 {
                        let Some(unclosed) = stack.pop() else { break };
                        if let Some(parent) = stack.last_mut() {
                            parent.close_void(unclosed);
                        }
                    }
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => return Ok(element),
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = stack.last_mut() {
                    let raw = e.into_inner();
                    current
                        .text
                        .push_str(&unescape_lenient(&String::from_utf8_lossy(&raw)));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::Eof) => {
                return Err(match stack.pop() {
                    Some(open) => XmlError::Unclosed(open.name),
                    None => XmlError::NoRoot,
                });
            }
            Ok(_) => {}
            Err(e) => return Err(XmlError::Syntax(e.to_string())),
        }
        buf.clear();
    }
}

/// Decode `body` to UTF-8 using its byte-order mark, else its XML
/// declaration, else UTF-8. Malformed sequences become U+FFFD.
pub fn decode(body: &[u8]) -> Cow<'_, str> {
    let encoding = declared_encoding(body)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, actual, had_errors) = encoding.decode(body);
    if had_errors {
        tracing::debug!(encoding = actual.name(), "Replaced malformed sequences while decoding feed");
    }
    text
}

/// The `encoding` pseudo-attribute of the XML declaration, if any.
fn declared_encoding(body: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Decl(decl)) => {
                return decl
                    .encoding()?
                    .ok()
                    .map(|label| String::from_utf8_lossy(&label).into_owned());
            }
            // Whitespace before the declaration
            Ok(Event::Text(_)) => {}
            _ => return None,
        }
        buf.clear();
    }
}

/// Replace character and entity references, leaving any reference that
/// does not resolve as literal text.
///
/// Resolves numeric references, the five XML entities and the HTML5
/// named entities.
pub fn unescape_lenient(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let resolved = tail
            .find(';')
            .filter(|end| *end < MAX_REFERENCE_LEN)
            .and_then(|end| resolve_reference(&tail[..=end]).map(|value| (value, end + 1)));
        match resolved {
            Some((value, consumed)) => {
                out.push_str(&value);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn resolve_reference(reference: &str) -> Option<Cow<'_, str>> {
    unescape_with(reference, |name| {
        resolve_predefined_entity(name).or_else(|| resolve_html5_entity(name))
    })
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unescape_lenient() {
        let cases = [
            ("plain", "plain"),
            ("Joe&#160;Blogger&#039;s Site", "Joe\u{a0}Blogger's Site"),
            ("Joe&nbsp;Blogger", "Joe\u{a0}Blogger"),
            ("&lt;b&gt; &amp; &quot;q&quot;", "<b> & \"q\""),
            ("&hellip;&mdash;&copy;", "\u{2026}\u{2014}\u{a9}"),
            ("&#x41;&#66;", "AB"),
            ("fish & chips", "fish & chips"),
            ("&bogus; stays", "&bogus; stays"),
            ("&#xZZ; stays", "&#xZZ; stays"),
            ("dangling &", "dangling &"),
            ("a & b; c", "a & b; c"),
        ];
        for (input, expected) in cases {
            assert_eq!(unescape_lenient(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_document_builds_tree_by_local_name() {
        let xml = br#"<?xml version="1.0"?>
            <rss xmlns:dc="http://purl.org/dc/elements/1.1/">
              <channel>
                <title> Example </title>
                <dc:date>2014-01-03</dc:date>
                <atom:link href="https://example.com/feed" rel="self"/>
              </channel>
            </rss>"#;

        let root = parse_document(xml).unwrap();
        assert_eq!(root.name, "rss");
        let channel = root.child("channel").unwrap();
        assert_eq!(channel.child_text("title"), Some("Example"));
        assert_eq!(channel.child_text("date"), Some("2014-01-03"));
        assert_eq!(
            channel.child("link").and_then(|l| l.attribute("href")),
            Some("https://example.com/feed")
        );
    }

    #[test]
    fn test_parse_document_cdata_and_entities() {
        let xml = b"<r><a><![CDATA[<p>1 &amp; 2</p>]]></a><b>x &nbsp;&unknown; y</b></r>";

        let root = parse_document(xml).unwrap();
        assert_eq!(root.child_text("a"), Some("<p>1 &amp; 2</p>"));
        assert_eq!(root.child_text("b"), Some("x \u{a0}&unknown; y"));
    }

    #[test]
    fn test_parse_document_ignores_trailing_garbage() {
        let root = parse_document(b"<?xml version=\"1.0\"?><rss><channel/></rss></xml>junk").unwrap();
        assert_eq!(root.name, "rss");
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_parse_document_ignores_unmatched_end_tags() {
        let root = parse_document(b"<r><a>text</b><c/></a><d/></r>").unwrap();
        let a = root.child("a").unwrap();
        assert_eq!(a.trimmed_text(), "text");
        assert!(a.child("c").is_some());
        assert!(root.child("d").is_some());
    }

    #[test]
    fn test_parse_document_end_tag_closes_elements_left_open_inside() {
        let root = parse_document(b"<r><a>one<br>two</a><b/></r>").unwrap();
        assert_eq!(root.children.len(), 2);
        let a = root.child("a").unwrap();
        assert_eq!(a.text, "onetwo");
        assert_eq!(a.child("br"), Some(&Element { name: "br".to_string(), ..Element::default() }));
        assert!(root.child("b").is_some());

        let root = parse_document(b"<r><a><i>open</r>").unwrap();
        assert_eq!(root.name, "r");
        assert_eq!(root.trimmed_text(), "open");
        assert!(root.child("a").unwrap().children.is_empty());
        assert!(root.child("i").is_some());
    }

    #[test]
    fn test_parse_document_errors() {
        assert_eq!(parse_document(b""), Err(XmlError::NoRoot));
        assert_eq!(parse_document(b"just text"), Err(XmlError::NoRoot));
        assert_eq!(
            parse_document(b"<rss><channel>"),
            Err(XmlError::Unclosed("channel".to_string()))
        );

        let deep = "<a>".repeat(MAX_DEPTH + 1);
        assert_eq!(
            parse_document(deep.as_bytes()),
            Err(XmlError::TooDeep(MAX_DEPTH))
        );
    }

    #[test]
    fn test_decode_honors_declared_encoding() {
        let mut body = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><t>caf".to_vec();
        body.push(0xE9);
        body.extend_from_slice(b"</t>");

        let root = parse_document(&body).unwrap();
        assert_eq!(root.trimmed_text(), "caf\u{e9}");
    }

    #[test]
    fn test_decode_defaults_to_utf8() {
        assert_eq!(decode("<t>\u{e9}</t>".as_bytes()), "<t>\u{e9}</t>");
        assert_eq!(declared_encoding(b"<t/>"), None);
        assert_eq!(
            declared_encoding(b"  <?xml version=\"1.0\" encoding=\"windows-1252\"?><t/>"),
            Some("windows-1252".to_string())
        );
    }
}
