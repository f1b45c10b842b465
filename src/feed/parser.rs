use chrono::{DateTime, Utc};
use thiserror::Error;

use super::date::parse_time;
use super::xml::{parse_document, Element, XmlError};
use crate::storage::{ParsedFeed, ParsedItem};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// Neither grammar produced a feed with a name and linked items
    #[error("invalid RSS ({rss}); invalid Atom ({atom})")]
    Invalid {
        rss: &'static str,
        atom: &'static str,
    },
}

/// Parse an RSS or Atom document.
///
/// RSS is tried first; Atom only if the document does not form a valid
/// RSS feed. Unparsable item dates leave `publication_time` empty rather
/// than failing the feed.
///
/// # Errors
///
/// Returns `ParseError::Xml` if the body is not readable as XML and
/// `ParseError::Invalid` with both grammars' reasons otherwise.
pub fn parse_feed(body: &[u8]) -> Result<ParsedFeed, ParseError> {
    let root = parse_document(body)?;

    let rss = match parse_rss(&root) {
        Ok(feed) => return Ok(feed),
        Err(reason) => reason,
    };
    parse_atom(&root).map_err(|atom| ParseError::Invalid { rss, atom })
}

// ============================================================================
// RSS 0.9x / 1.0 / 2.0
// ============================================================================

fn parse_rss(root: &Element) -> Result<ParsedFeed, &'static str> {
    let channel = root.child("channel").ok_or("no channel")?;
    let name = channel
        .child_text("title")
        .or_else(|| channel.child_text("description"))
        .unwrap_or_default();

    // RSS 1.0 places items next to the channel instead of inside it.
    let mut items: Vec<&Element> = root.children_named("item").collect();
    if items.is_empty() {
        items = channel.children_named("item").collect();
    }

    validate(ParsedFeed {
        name: name.to_string(),
        items: items.into_iter().map(rss_item).collect(),
    })
}

fn rss_item(item: &Element) -> ParsedItem {
    let url = item
        .children_named("link")
        .find_map(|link| {
            Some(link.trimmed_text())
                .filter(|text| !text.is_empty())
                .or_else(|| non_empty_href(link))
        })
        .unwrap_or_default();

    ParsedItem {
        url: url.to_string(),
        title: item.child_text("title").unwrap_or_default().to_string(),
        publication_time: publication_time(item, &["pubDate", "date"]),
        body: item
            .child_text("description")
            .or_else(|| item.child_text("encoded"))
            .map(str::to_string),
    }
}

// ============================================================================
// Atom
// ============================================================================

fn parse_atom(root: &Element) -> Result<ParsedFeed, &'static str> {
    validate(ParsedFeed {
        name: root.child_text("title").unwrap_or_default().to_string(),
        items: root.children_named("entry").map(atom_entry).collect(),
    })
}

fn atom_entry(entry: &Element) -> ParsedItem {
    let links: Vec<(Option<&str>, &str)> = entry
        .children_named("link")
        .filter_map(|link| non_empty_href(link).map(|href| (link.attribute("rel"), href)))
        .collect();
    let url = links
        .iter()
        .find(|(rel, _)| matches!(rel, None | Some("alternate")))
        .or_else(|| links.first())
        .map(|(_, href)| *href)
        .unwrap_or_default();

    ParsedItem {
        url: url.to_string(),
        title: entry.child_text("title").unwrap_or_default().to_string(),
        publication_time: publication_time(entry, &["published", "updated"]),
        body: entry
            .child_text("content")
            .or_else(|| entry.child_text("summary"))
            .map(str::to_string),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn validate(feed: ParsedFeed) -> Result<ParsedFeed, &'static str> {
    if feed.name.is_empty() {
        Err("missing title")
    } else if !feed.is_valid() {
        Err("item without link")
    } else {
        Ok(feed)
    }
}

fn non_empty_href(link: &Element) -> Option<&str> {
    link.attribute("href")
        .map(str::trim)
        .filter(|href| !href.is_empty())
}

/// The first field present wins, even if it does not parse.
fn publication_time(element: &Element, fields: &[&str]) -> Option<DateTime<Utc>> {
    let text = fields.iter().find_map(|field| element.child_text(field))?;
    match parse_time(text) {
        Ok(time) => Some(time),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparsable publication date");
            None
        }
    }
}
