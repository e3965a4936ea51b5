//! RSS 2.0 and Atom parsing into [`FeedEntry`] values.
//!
//! The root element decides the format (`<rss>` / `<rdf:RDF>` vs `<feed>`);
//! the body is then deserialized with `quick_xml::de`. arXiv API responses
//! are Atom documents whose entries carry a `<link title="pdf">`.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;

use crate::error::SourceFetchError;
use crate::models::FeedEntry;
use crate::utils::collapse_whitespace;

/// Text content of an element, ignoring its attributes.
#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    text: String,
}

impl TextNode {
    fn value(&self) -> Option<String> {
        let v = collapse_whitespace(&self.text);
        (!v.is_empty()).then_some(v)
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RdfRoot {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: Option<TextNode>,
    #[serde(default)]
    link: Option<TextNode>,
    #[serde(default)]
    guid: Option<TextNode>,
    #[serde(rename = "pubDate", alias = "dc:date", alias = "date", default)]
    pub_date: Option<TextNode>,
    #[serde(default)]
    author: Option<TextNode>,
    #[serde(rename = "creator", alias = "dc:creator", default)]
    creators: Vec<TextNode>,
    #[serde(default)]
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(default)]
    id: Option<TextNode>,
    #[serde(default)]
    title: Option<TextNode>,
    #[serde(default)]
    published: Option<TextNode>,
    #[serde(default)]
    updated: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
    #[serde(rename = "@type", default)]
    kind: Option<String>,
    #[serde(rename = "@title", default)]
    title: Option<String>,
}

impl AtomLink {
    fn is_pdf(&self) -> bool {
        self.kind.as_deref() == Some("application/pdf") || self.title.as_deref() == Some("pdf")
    }
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    #[serde(default)]
    name: Option<TextNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedFormat {
    Rss,
    Rdf,
    Atom,
}

/// Find the document's root element.
fn detect_format(xml: &str) -> Result<FeedFormat, SourceFetchError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return match e.local_name().as_ref() {
                    b"rss" => Ok(FeedFormat::Rss),
                    b"RDF" => Ok(FeedFormat::Rdf),
                    b"feed" => Ok(FeedFormat::Atom),
                    other => Err(SourceFetchError::Malformed(format!(
                        "unknown root element <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Ok(Event::Eof) => {
                return Err(SourceFetchError::Malformed("document has no root element".into()));
            }
            Err(e) => return Err(SourceFetchError::Malformed(e.to_string())),
            _ => {}
        }
    }
}

/// Parse an RSS 2.0 / RSS 1.0 (RDF) / Atom document.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, SourceFetchError> {
    let malformed = |e: quick_xml::de::DeError| SourceFetchError::Malformed(e.to_string());
    let entries = match detect_format(xml)? {
        FeedFormat::Rss => {
            let rss: Rss = quick_xml::de::from_str(xml).map_err(malformed)?;
            rss.channel.items.into_iter().map(rss_entry).collect()
        }
        FeedFormat::Rdf => {
            let rdf: RdfRoot = quick_xml::de::from_str(xml).map_err(malformed)?;
            rdf.items.into_iter().map(rss_entry).collect()
        }
        FeedFormat::Atom => {
            let feed: AtomFeed = quick_xml::de::from_str(xml).map_err(malformed)?;
            feed.entries.into_iter().map(atom_entry).collect()
        }
    };
    Ok(entries)
}

fn rss_entry(item: RssItem) -> FeedEntry {
    let document_url = item
        .enclosure
        .filter(|enc| enc.kind.as_deref() == Some("application/pdf"))
        .map(|enc| enc.url);
    let authors = item
        .creators
        .iter()
        .chain(item.author.iter())
        .filter_map(TextNode::value)
        .unique()
        .collect();

    FeedEntry {
        guid: item.guid.as_ref().and_then(TextNode::value),
        title: item.title.as_ref().and_then(TextNode::value),
        link: item.link.as_ref().and_then(TextNode::value),
        document_url,
        published_at: item.pub_date.as_ref().and_then(TextNode::value).and_then(|d| parse_date(&d)),
        authors,
    }
}

fn atom_entry(entry: AtomEntry) -> FeedEntry {
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate") && !l.is_pdf())
        .map(|l| l.href.clone());
    let document_url = entry.links.iter().find(|l| l.is_pdf()).map(|l| l.href.clone());
    let published = entry.published.as_ref().or(entry.updated.as_ref());

    FeedEntry {
        guid: entry.id.as_ref().and_then(TextNode::value),
        title: entry.title.as_ref().and_then(TextNode::value),
        link,
        document_url,
        published_at: published.and_then(TextNode::value).and_then(|d| parse_date(&d)),
        authors: entry
            .authors
            .iter()
            .filter_map(|a| a.name.as_ref().and_then(TextNode::value))
            .unique()
            .collect(),
    }
}

/// Parse RFC 3339 (Atom) or RFC 2822 (RSS) timestamps.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
