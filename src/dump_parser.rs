use std::num::ParseIntError;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use compact_str::CompactString;
use rustc_hash::FxHashSet;
use tracing::instrument;

use crate::utils::{extract_all, extract_text, find_text, split_at_element, strip_elements};

/// Sentinel for an absent page or revision id.
pub const MISSING_ID: i64 = -1;

/// One edit event of an article.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    pub id: i64,
    /// User name or IP address literal, empty if the dump has neither.
    pub contributor: CompactString,
    pub timestamp: DateTime<Utc>,
}

impl Revision {
    /// Calendar year of the revision in UTC, the reference time zone of all statistics.
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    pub fn year_in<Tz: TimeZone>(&self, tz: &Tz) -> i32 {
        self.timestamp.with_timezone(tz).year()
    }
}

/// One page of the dump together with its revision history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Article {
    pub id: i64,
    pub title: CompactString,
    /// In document order, i.e. the first revision created the article.
    pub revisions: Vec<Revision>,
}

impl Article {
    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }

    /// Contributor of every revision in revision order, not deduplicated.
    pub fn contributors(&self) -> impl Iterator<Item = &str> + '_ {
        self.revisions.iter().map(|r| r.contributor.as_str())
    }

    pub fn distinct_contributor_count(&self) -> usize {
        self.contributors().collect::<FxHashSet<_>>().len()
    }

    /// Year of the first revision.
    ///
    /// Always `Some` for articles produced by the parser; `None` only for hand-built articles without revisions.
    pub fn creation_year(&self) -> Option<i32> {
        self.revisions.first().map(Revision::year)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid number in <{field}>: {value:?}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        block: String,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid ISO-8601 timestamp in <{field}>: {value:?}")]
    InvalidTimestamp {
        field: &'static str,
        value: String,
        block: String,
        #[source]
        source: chrono::ParseError,
    },
}

impl ParseError {
    /// Name of the offending tag.
    pub fn field(&self) -> &'static str {
        match self {
            ParseError::InvalidNumber { field, .. } | ParseError::InvalidTimestamp { field, .. } => {
                field
            }
        }
    }

    /// Raw text of the offending article block.
    pub fn block(&self) -> &str {
        match self {
            ParseError::InvalidNumber { block, .. } | ParseError::InvalidTimestamp { block, .. } => {
                block
            }
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ParseError::InvalidNumber { value, .. } | ParseError::InvalidTimestamp { value, .. } => {
                value
            }
        }
    }
}

// empty text is treated like an absent tag
fn parse_id(text: &str, field: &'static str, block: &str) -> Result<i64, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(MISSING_ID);
    }

    text.parse().map_err(|source| ParseError::InvalidNumber {
        field,
        value: text.to_string(),
        block: block.to_string(),
        source,
    })
}

// an absent timestamp is an error as well, there is no sensible sentinel instant
fn parse_timestamp(
    text: &str,
    field: &'static str,
    block: &str,
) -> Result<DateTime<Utc>, ParseError> {
    let text = text.trim();

    // RFC 3339 also admits a space between date and time, ISO 8601 does not
    let parsed = if matches!(text.as_bytes().get(10), Some(b'T' | b't')) {
        DateTime::parse_from_rfc3339(text)
    } else {
        DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%:z")
    };

    parsed
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|source| ParseError::InvalidTimestamp {
            field,
            value: text.to_string(),
            block: block.to_string(),
            source,
        })
}

fn parse_contributor(xml: &str) -> CompactString {
    let username = extract_text(xml, "username");
    if !username.is_empty() {
        return CompactString::from(username);
    }

    CompactString::from(extract_text(xml, "ip"))
}

// first `tag` in any of `parts`, which together make up the element's own text
fn own_field<'a>(parts: &[&'a str], tag: &str) -> &'a str {
    parts
        .iter()
        .find_map(|&part| find_text(part, tag))
        .unwrap_or("")
}

fn parse_revision(revision_xml: &str, block: &str) -> Result<Revision, ParseError> {
    // the contributor has an <id> of its own
    let (contributor, own_fields) = match split_at_element(revision_xml, "contributor") {
        Some((before, contributor_xml, after)) => (parse_contributor(contributor_xml), [before, after]),
        None => (parse_contributor(revision_xml), [revision_xml, ""]),
    };

    Ok(Revision {
        id: parse_id(own_field(&own_fields, "id"), "id", block)?,
        contributor,
        timestamp: parse_timestamp(own_field(&own_fields, "timestamp"), "timestamp", block)?,
    })
}

/// Parse one `<page>` block into an [`Article`].
///
/// Only the `title`, `id`, `revision`, `contributor`, `username`, `ip` and `timestamp` tags are interpreted,
/// everything else (including wrapper tags around the page) is ignored. Absent ids become [`MISSING_ID`],
/// absent contributors the empty string. Present but malformed numbers and timestamps are a [`ParseError`].
///
/// An article without any revision is returned as is; dropping those is up to the caller.
#[instrument(level = "trace", skip_all, fields(len = block.len()))]
pub fn parse_article(block: &str) -> Result<Article, ParseError> {
    // page fields must not be picked up from inside a revision
    let header = strip_elements(block, "revision");

    let revisions = extract_all(block, "revision")
        .map(|revision_xml| parse_revision(revision_xml, block))
        .collect::<Result<Vec<_>, _>>()?;

    let article = Article {
        id: parse_id(extract_text(&header, "id"), "id", block)?,
        title: CompactString::from(extract_text(&header, "title")),
        revisions,
    };
    tracing::trace!(
        title = article.title.as_str(),
        revisions = article.revisions.len()
    );

    Ok(article)
}
