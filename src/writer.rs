//! Plain XML re-serialization of parsed articles, for inspection.
//!
//! Text fields are written verbatim: the parser performs no entity decoding, so titles and contributors
//! still hold their escaped form from the dump and must not be escaped a second time.
//! The output parses back to an equal [`Article`].

use std::{io::Cursor, net::IpAddr};

use chrono::SecondsFormat;
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::dump_parser::{Article, Revision, MISSING_ID};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("XML error")]
    Xml(#[from] quick_xml::Error),
    #[error("serialized article is not valid UTF-8")]
    NonUtf8(#[from] std::string::FromUtf8Error),
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<(), WriteError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::from_escaped(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_revision<W: std::io::Write>(
    writer: &mut Writer<W>,
    revision: &Revision,
) -> Result<(), WriteError> {
    writer.write_event(Event::Start(BytesStart::new("revision")))?;

    if revision.id != MISSING_ID {
        write_text_element(writer, "id", &revision.id.to_string())?;
    }
    write_text_element(
        writer,
        "timestamp",
        &revision
            .timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )?;

    if revision.contributor.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("contributor")))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new("contributor")))?;
        // anonymous edits are attributed to an IP address
        let tag = if revision.contributor.parse::<IpAddr>().is_ok() {
            "ip"
        } else {
            "username"
        };
        write_text_element(writer, tag, &revision.contributor)?;
        writer.write_event(Event::End(BytesEnd::new("contributor")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("revision")))?;
    Ok(())
}

/// Serialize `article` as a `<page>` element.
pub fn article_to_xml(article: &Article) -> Result<String, WriteError> {
    let mut xml = Vec::new();
    let mut writer = Writer::new(Cursor::new(&mut xml));

    writer.write_event(Event::Start(BytesStart::new("page")))?;
    write_text_element(&mut writer, "title", &article.title)?;
    if article.id != MISSING_ID {
        write_text_element(&mut writer, "id", &article.id.to_string())?;
    }
    for revision in &article.revisions {
        write_revision(&mut writer, revision)?;
    }
    writer.write_event(Event::End(BytesEnd::new("page")))?;

    Ok(String::from_utf8(xml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dump_parser::parse_article,
        test_support::{article, prelude::*, revision, SCENARIO_BLOCK},
    };

    #[test]
    fn test_scenario_is_written_back() {
        let parsed = parse_article(SCENARIO_BLOCK).unwrap();
        let xml = article_to_xml(&parsed).unwrap();

        assert!(xml.starts_with("<page><title>T</title><id>5</id><revision><id>1</id>"));
        assert!(xml.contains("<contributor><username>Alice</username></contributor>"));
        assert!(xml.contains("<contributor><ip>1.2.3.4</ip></contributor>"));
        assert!(xml.ends_with("</revision></page>"));
        assert_eq!(parse_article(&xml).unwrap(), parsed);
    }

    #[test]
    fn test_sentinels_and_escaped_text() {
        let original = article(
            MISSING_ID,
            "AT&amp;T",
            vec![
                revision(MISSING_ID, "", "2001-01-01T00:00:00Z"),
                revision(4, "2001:db8::1", "2002-02-02T12:30:00.250Z"),
            ],
        );
        let xml = article_to_xml(&original).unwrap();

        assert!(xml.contains("<title>AT&amp;T</title>"));
        assert!(xml.contains("<contributor/>"));
        assert!(xml.contains("<ip>2001:db8::1</ip>"));
        assert_eq!(parse_article(&xml).unwrap(), original);
    }

    proptest! {
        #[test]
        fn written_articles_parse_back(original in arb_article()) {
            let xml = article_to_xml(&original).unwrap();
            prop_assert_eq!(parse_article(&xml).unwrap(), original);
        }
    }
}
