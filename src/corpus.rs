//! Streaming split of a raw dump into article blocks.
//!
//! The reader never holds more than the current block (plus one `fill_buf` worth of lookahead) in memory,
//! so arbitrarily large dumps can be processed. Line structure is irrelevant, blocks are cut purely at
//! the delimiter, which is usually the closing tag of the record element.

use std::{
    fmt::Debug,
    io::{self, BufRead},
    iter::FusedIterator,
};

use memchr::memmem;

use crate::dump_parser::{parse_article, Article, ParseError};

pub const DEFAULT_DELIMITER: &str = "</page>";

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("record delimiter must not be empty")]
    EmptyDelimiter,
    #[error("block {index} is not valid UTF-8")]
    NonUtf8 {
        index: usize,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("failed to parse block {index}")]
    Parse {
        index: usize,
        #[source]
        source: ParseError,
    },
}

/// Pull-based iterator over the raw blocks of a dump.
///
/// Every yielded block ends with the delimiter. Empty and whitespace-only chunks are discarded.
/// Text after the last delimiter is yielded as well, with the delimiter appended.
pub struct BlockReader<R: BufRead> {
    reader: R,
    delimiter: memmem::Finder<'static>,
    buf: Vec<u8>,
    // bytes before this offset in `buf` were already handed out
    start: usize,
    // everything before this offset in `buf` is known not to contain the start of a delimiter
    scan_from: usize,
    blocks: usize,
    discarded: usize,
    finished: bool,
}

impl<R: BufRead> Debug for BlockReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field(
                "delimiter",
                &String::from_utf8_lossy(self.delimiter.needle()).as_ref(),
            )
            .field("buf.len", &self.buf.len())
            .field("buf.capacity", &self.buf.capacity())
            .field("blocks", &self.blocks)
            .field("discarded", &self.discarded)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<R: BufRead> BlockReader<R> {
    pub fn new(reader: R, delimiter: &str) -> Result<Self, CorpusError> {
        if delimiter.is_empty() {
            return Err(CorpusError::EmptyDelimiter);
        }

        Ok(Self {
            reader,
            delimiter: memmem::Finder::new(delimiter.as_bytes()).into_owned(),
            // preallocate 64 KiB, a typical page with its full history is larger than that anyway
            buf: Vec::with_capacity(64 * 1024),
            start: 0,
            scan_from: 0,
            blocks: 0,
            discarded: 0,
            finished: false,
        })
    }

    /// Number of blocks yielded so far.
    pub fn blocks_read(&self) -> usize {
        self.blocks
    }

    /// Number of empty or whitespace-only chunks skipped so far.
    pub fn blank_chunks(&self) -> usize {
        self.discarded
    }

    fn take_block(&mut self, end: usize) -> Result<Option<String>, CorpusError> {
        let chunk = self.buf[self.start..end].to_vec();
        self.start = end;
        self.scan_from = end;
        self.finish_chunk(chunk)
    }

    // drop the consumed prefix, only the unfinished tail is moved
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scan_from -= self.start;
            self.start = 0;
        }
    }

    // `None` means the chunk was blank and has been discarded
    fn finish_chunk(&mut self, chunk: Vec<u8>) -> Result<Option<String>, CorpusError> {
        let content_len = chunk.len().saturating_sub(self.delimiter.needle().len());
        if chunk[..content_len].iter().all(u8::is_ascii_whitespace) {
            self.discarded += 1;
            return Ok(None);
        }

        let index = self.blocks;
        self.blocks += 1;
        String::from_utf8(chunk)
            .map(Some)
            .map_err(|source| CorpusError::NonUtf8 { index, source })
    }

    fn next_block(&mut self) -> Result<Option<String>, CorpusError> {
        let delimiter_len = self.delimiter.needle().len();

        loop {
            if let Some(offset) = self.delimiter.find(&self.buf[self.scan_from..]) {
                let end = self.scan_from + offset + delimiter_len;
                match self.take_block(end)? {
                    Some(block) => return Ok(Some(block)),
                    None => continue,
                }
            }
            // the delimiter may straddle the boundary to the next read
            self.scan_from = self
                .buf
                .len()
                .saturating_sub(delimiter_len - 1)
                .max(self.start);
            self.compact();

            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if available.is_empty() {
                // end of input, yield the trailing text if there is any
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let mut chunk = std::mem::take(&mut self.buf);
                chunk.extend_from_slice(self.delimiter.needle());
                self.start = 0;
                self.scan_from = 0;
                match self.finish_chunk(chunk)? {
                    Some(block) => return Ok(Some(block)),
                    None => return Ok(None),
                }
            }

            let len = available.len();
            self.buf.extend_from_slice(available);
            self.reader.consume(len);
        }
    }
}

impl<R: BufRead> Iterator for BlockReader<R> {
    type Item = Result<String, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_block() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                tracing::error!(message = "Aborting block reading due to error", error = %e, blocks_read = self.blocks);
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> FusedIterator for BlockReader<R> {}

/// Split `source` into raw article blocks at every occurrence of `delimiter`.
pub fn read_blocks<R: BufRead>(source: R, delimiter: &str) -> Result<BlockReader<R>, CorpusError> {
    BlockReader::new(source, delimiter)
}

/// What [`Articles`] does with a block that fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedBlocks {
    /// Yield the error and stop.
    #[default]
    Abort,
    /// Log a warning and continue with the next block.
    Skip,
}

/// Counters collected while reading articles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadStats {
    pub blocks: usize,
    pub articles: usize,
    /// Articles dropped because they have no revisions.
    pub without_revisions: usize,
    pub skipped_malformed: usize,
}

/// Iterator over the parsed articles of a dump, see [`to_articles`].
pub struct Articles<R: BufRead> {
    blocks: BlockReader<R>,
    policy: MalformedBlocks,
    stats: ReadStats,
    finished: bool,
}

impl<R: BufRead> Debug for Articles<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Articles")
            .field("blocks", &self.blocks)
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<R: BufRead> Articles<R> {
    pub fn with_policy(mut self, policy: MalformedBlocks) -> Self {
        self.policy = policy;
        self
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for Articles<R> {
    type Item = Result<Article, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let block = match self.blocks.next()? {
                Ok(block) => block,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            let index = self.stats.blocks;
            self.stats.blocks += 1;

            match parse_article(&block) {
                Ok(article) if article.revisions.is_empty() => {
                    self.stats.without_revisions += 1;
                }
                Ok(article) => {
                    self.stats.articles += 1;
                    return Some(Ok(article));
                }
                Err(source) => match self.policy {
                    MalformedBlocks::Skip => {
                        tracing::warn!(
                            message = "Skipping malformed block",
                            index,
                            field = source.field(),
                            value = source.value()
                        );
                        self.stats.skipped_malformed += 1;
                    }
                    MalformedBlocks::Abort => {
                        tracing::error!(message = "Malformed block", index, error = %source);
                        self.finished = true;
                        return Some(Err(CorpusError::Parse { index, source }));
                    }
                },
            }
        }
    }
}

impl<R: BufRead> FusedIterator for Articles<R> {}

/// Read all articles with at least one revision from `source`.
///
/// # Example
///
/// ```
/// use revstats::corpus::{to_articles, DEFAULT_DELIMITER};
///
/// let dump = "<page><title>A</title><revision><timestamp>2001-01-15T00:00:00Z</timestamp></revision></page>\n\
///             <page><title>Empty</title></page>\n";
/// let articles = to_articles(dump.as_bytes(), DEFAULT_DELIMITER)?
///     .collect::<Result<Vec<_>, _>>()?;
///
/// assert_eq!(articles.len(), 1);
/// assert_eq!(articles[0].title, "A");
/// # Ok::<(), revstats::corpus::CorpusError>(())
/// ```
pub fn to_articles<R: BufRead>(source: R, delimiter: &str) -> Result<Articles<R>, CorpusError> {
    Ok(Articles {
        blocks: read_blocks(source, delimiter)?,
        policy: MalformedBlocks::default(),
        stats: ReadStats::default(),
        finished: false,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor, Read};

    use super::*;
    use crate::test_support::SCENARIO_BLOCK;

    fn blocks(input: &str, delimiter: &str, capacity: usize) -> Vec<String> {
        let reader = BufReader::with_capacity(capacity, input.as_bytes());
        read_blocks(reader, delimiter)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_split_and_reappend_delimiter() {
        let input = "<page>a</page><page>b</page>\n<page>c</page>";
        let expected = ["<page>a</page>", "<page>b</page>", "\n<page>c</page>"];

        assert_eq!(blocks(input, "</page>", 8 * 1024), expected);
    }

    #[test]
    fn test_delimiter_straddles_buffer_boundary() {
        let input = "<page>a</page><page>bb</page>\n\n<page>ccc</page>\n";
        let expected = blocks(input, "</page>", 8 * 1024);

        for capacity in 1..16 {
            assert_eq!(blocks(input, "</page>", capacity), expected, "capacity {capacity}");
        }
    }

    #[test]
    fn test_many_blocks_from_one_large_read() {
        // a slice hands out the whole input with a single `fill_buf`
        let count = 200_000;
        let input: String = (0..count).map(|i| format!("<page>{i}</page>")).collect();
        let mut reader = read_blocks(input.as_bytes(), "</page>").unwrap();

        for i in 0..count {
            assert_eq!(reader.next().unwrap().unwrap(), format!("<page>{i}</page>"));
            assert_eq!(reader.start, reader.scan_from);
        }
        assert!(reader.next().is_none());
        assert_eq!(reader.blocks_read(), count);
        assert!(reader.buf.is_empty());
    }

    #[test]
    fn test_blank_chunks_are_discarded() {
        let input = "</page></page>  \n</page><page>x</page>\n \t";
        let mut reader = read_blocks(input.as_bytes(), "</page>").unwrap();

        assert_eq!(reader.next().unwrap().unwrap(), "<page>x</page>");
        assert!(reader.next().is_none());
        assert_eq!(reader.blocks_read(), 1);
        assert_eq!(reader.blank_chunks(), 4);
    }

    #[test]
    fn test_trailing_text() {
        let input = "<mediawiki><page>a</page>\n</mediawiki>\n";
        assert_eq!(
            blocks(input, "</page>", 4),
            ["<mediawiki><page>a</page>", "\n</mediawiki>\n</page>"]
        );
    }

    #[test]
    fn test_custom_delimiter() {
        let input = "<doc>1</doc><doc>2</doc>";
        assert_eq!(blocks(input, "</doc>", 3), ["<doc>1</doc>", "<doc>2</doc>"]);
    }

    #[test]
    fn test_empty_input_and_delimiter() {
        assert!(blocks("", "</page>", 16).is_empty());
        assert!(matches!(
            read_blocks(Cursor::new(""), ""),
            Err(CorpusError::EmptyDelimiter)
        ));
    }

    #[test]
    fn test_non_utf8_block() {
        let input: &[u8] = b"<page>ok</page><page>\xff</page>";
        let results: Vec<_> = read_blocks(input, "</page>").unwrap().collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(CorpusError::NonUtf8 { index: 1, .. })));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }
    }

    #[test]
    fn test_io_error_is_fatal() {
        let mut reader = read_blocks(BufReader::new(FailingReader), "</page>").unwrap();

        assert!(matches!(reader.next(), Some(Err(CorpusError::Io(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_to_articles_drops_articles_without_revisions() {
        let input = format!("<mediawiki>\n{SCENARIO_BLOCK}\n<page><title>Empty</title><id>9</id></page>\n</mediawiki>\n");
        let mut articles = to_articles(input.as_bytes(), DEFAULT_DELIMITER).unwrap();

        let parsed: Vec<_> = articles.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, 5);
        assert_eq!(
            articles.stats(),
            ReadStats {
                blocks: 3,
                articles: 1,
                without_revisions: 2,
                skipped_malformed: 0,
            }
        );
    }

    const MALFORMED_BLOCK: &str = "<page><id>1</id><revision><timestamp>not-a-date</timestamp></revision></page>";

    #[test]
    fn test_malformed_block_aborts_by_default() {
        let input = format!("{MALFORMED_BLOCK}{SCENARIO_BLOCK}");
        let results: Vec<_> = to_articles(input.as_bytes(), DEFAULT_DELIMITER)
            .unwrap()
            .collect();

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(CorpusError::Parse { index, source }) => {
                assert_eq!(*index, 0);
                assert_eq!(source.field(), "timestamp");
                assert_eq!(source.block(), MALFORMED_BLOCK);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_block_skipped() {
        let input = format!("{MALFORMED_BLOCK}{SCENARIO_BLOCK}");
        let mut articles = to_articles(input.as_bytes(), DEFAULT_DELIMITER)
            .unwrap()
            .with_policy(MalformedBlocks::Skip);

        let parsed: Vec<_> = articles.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(articles.stats().skipped_malformed, 1);
    }
}
