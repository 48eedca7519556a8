use chrono::{DateTime, Utc};

use crate::dump_parser::{Article, Revision};

pub mod prelude {
    pub(crate) use super::proptest::*;
    pub(crate) use proptest::prelude::*;
}

pub const SCENARIO_BLOCK: &str = "<page><title>T</title><id>5</id><revision><id>1</id><contributor><username>Alice</username></contributor><timestamp>2013-05-01T00:00:00Z</timestamp></revision><revision><id>2</id><contributor><ip>1.2.3.4</ip></contributor><timestamp>2014-01-01T00:00:00Z</timestamp></revision></page>";

pub fn timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn revision(id: i64, contributor: &str, at: &str) -> Revision {
    Revision {
        id,
        contributor: contributor.into(),
        timestamp: timestamp(at),
    }
}

pub fn article(id: i64, title: &str, revisions: Vec<Revision>) -> Article {
    Article {
        id,
        title: title.into(),
        revisions,
    }
}

pub mod proptest {
    use chrono::DateTime;
    use compact_str::CompactString;
    use proptest::prelude::*;
    use proptest::strategy::Strategy;

    use crate::dump_parser::{Article, Revision, MISSING_ID};

    // 2001-01-01 .. 2021-01-01
    const FIRST_SECOND: i64 = 978_307_200;
    const LAST_SECOND: i64 = 1_609_459_200;

    pub fn id() -> impl Strategy<Value = i64> {
        prop_oneof![
            1 => Just(MISSING_ID),
            9 => 0..1_000_000i64,
        ]
    }

    // a small pool, so that contributors overlap between articles and corpora
    pub fn contributor() -> impl Strategy<Value = CompactString> {
        prop_oneof![
            1 => Just(CompactString::default()),
            6 => "[A-E][a-z]{0,3}( [A-Z][a-z]{0,2})?".prop_map(CompactString::from),
            2 => (0u8..4).prop_map(|octet| CompactString::from(format!("10.0.0.{octet}"))),
        ]
    }

    prop_compose! {
        pub fn arb_revision()
                (id in id(), contributor in contributor(), second in FIRST_SECOND..LAST_SECOND)
        -> Revision {
            Revision {
                id,
                contributor,
                timestamp: DateTime::from_timestamp(second, 0).unwrap(),
            }
        }
    }

    prop_compose! {
        pub fn arb_article()
                (id in id(), title in "[A-Za-z0-9][A-Za-z0-9 ()]{0,15}", revisions in prop::collection::vec(arb_revision(), 1..8))
        -> Article {
            Article {
                id,
                title: title.into(),
                revisions,
            }
        }
    }

    pub fn corpus(max_articles: usize) -> impl Strategy<Value = Vec<Article>> {
        prop::collection::vec(arb_article(), 0..max_articles)
    }
}
