// SPDX-License-Identifier: MPL-2.0
//! # revstats
//!
//! Streaming extraction of articles and their revision history from encyclopedia XML dumps
//! (e.g. Wikipedia `pages-meta-history` files), together with a battery of aggregate statistics
//! over the extracted records.
//!
//! ## Overview
//!
//! The crate is split into a small pipeline:
//!
//! - **`corpus`**: splits a raw byte source into article blocks at a configurable delimiter (usually `</page>`),
//!   without ever holding more than one block in memory.
//! - **`dump_parser`**: turns one block into an [`Article`](dump_parser::Article) with its
//!   [`Revision`](dump_parser::Revision)s. No DOM is built and no XML validation is performed.
//! - **`utils`**: the regex-free tag extractor both of the above are built on.
//! - **`aggregation`**: counts, distinct counts, per-year groupings, top-K rankings and the co-group join
//!   of two corpora by contributor. Every statistic is a fold per shard plus an associative merge, so it can
//!   run sequentially or in parallel with identical results.
//! - **`report`**: the fixed sequence of named queries printed by the `revstats` binary.
//! - **`writer`**: plain XML re-serialization of parsed articles, for inspection.
//!
//! ## Getting Started
//!
//! ```rust
//! use revstats::aggregation::{top_articles_by_revision_count, total_revisions_and_articles};
//! use revstats::corpus::{to_articles, DEFAULT_DELIMITER};
//! use std::io::BufReader;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // any `BufRead` works, e.g. a `BufReader<File>` over a (decompressed) dump
//!     let dump = "<mediawiki>
//!       <page>
//!         <title>Einstein</title>
//!         <id>736</id>
//!         <revision>
//!           <id>1</id>
//!           <timestamp>2001-11-06T08:27:30Z</timestamp>
//!           <contributor><username>Alice</username><id>5</id></contributor>
//!         </revision>
//!       </page>
//!     </mediawiki>";
//!     let reader = BufReader::new(dump.as_bytes());
//!
//!     let articles = to_articles(reader, DEFAULT_DELIMITER)?.collect::<Result<Vec<_>, _>>()?;
//!
//!     assert_eq!(total_revisions_and_articles(&articles), (1, 1));
//!     assert_eq!(top_articles_by_revision_count(&articles, Some(10)), [("Einstein", 1)]);
//!     Ok(())
//! }
//! ```
//!
//! ### Parallel Processing
//!
//! Parsing is inherently linear, but once the articles are collected every statistic can be computed in
//! parallel on the `rayon` thread pool:
//!
//! ```rust
//! use revstats::aggregation::{run, Execution, TopContributors};
//! # let articles: Vec<revstats::dump_parser::Article> = Vec::new();
//!
//! let top = run(&TopContributors { limit: Some(10) }, &articles, Execution::Parallel { shard_size: 1024 });
//! # assert!(top.is_empty());
//! ```
//!
//! Long-running aggregations can be cancelled between shards with
//! [`run_cancellable`](aggregation::run_cancellable).
//!
//! ## Error Handling and Logging
//!
//! - Absent ids become `-1`, absent contributors the empty string; neither is an error.
//! - Present but malformed numbers and timestamps are a [`ParseError`](dump_parser::ParseError) naming the
//!   field and carrying the raw block. By default reading stops at the first one, use
//!   [`MalformedBlocks::Skip`](corpus::MalformedBlocks::Skip) to log and skip such blocks instead.
//! - Uses the `tracing` crate for logging; the binary prints to stderr and honours `RUST_LOG`.
//!
//! ## Limitations
//!
//! - Elements with the same name must not be nested (the first closing tag always wins).
//! - Entities are not decoded, titles and contributors keep their escaped form.
//! - Years are computed in UTC.
//! - The `revstats` binary streams the dump text but keeps the parsed records of both corpora in memory,
//!   since the queries borrow from them. Single-pass statistics can instead consume
//!   [`to_articles`](corpus::to_articles) lazily, one article at a time.

pub mod aggregation;
pub mod corpus;
pub mod dump_parser;
pub mod report;
#[cfg(test)]
mod test_support;
pub mod utils;
pub mod writer;
