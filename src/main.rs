use clap::Parser;
use revstats::aggregation::Execution;
use revstats::corpus::{to_articles, CorpusError, MalformedBlocks, DEFAULT_DELIMITER};
use revstats::dump_parser::Article;
use revstats::report::{run_queries, timed, QueryParams};
use revstats::writer::{article_to_xml, WriteError};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const LONG_ABOUT: &str = "Compute revision statistics over one or two encyclopedia XML dumps.

The dump text is streamed block by block, but the parsed records (article ids, titles and the id, \
contributor and timestamp of every revision) of both corpora are held in memory while the queries run.";

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = LONG_ABOUT)]
struct CommandLine {
    /// Dump to compute all statistics over
    corpus_a: PathBuf,

    /// Second dump, joined with the first by contributor
    corpus_b: Option<PathBuf>,

    /// Literal text that ends every record
    #[arg(long, default_value = DEFAULT_DELIMITER)]
    delimiter: String,

    #[arg(long, default_value_t = 10)]
    min_revisions: usize,

    #[arg(long, default_value_t = 5)]
    min_contributors: usize,

    /// Year of the per-year contributor ranking
    #[arg(long, default_value_t = 2010)]
    year: i32,

    /// Length of every ranking
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Minimum revisions in each corpus for a contributor to count as active in both
    #[arg(long, default_value_t = 1)]
    shared_min_revisions: usize,

    /// Log and skip blocks with malformed ids or timestamps instead of aborting
    #[arg(long)]
    skip_malformed: bool,

    /// Number of worker threads (defaults to the number of CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// Articles per shard
    #[arg(long, default_value_t = 4096)]
    shard_size: usize,

    /// Aggregate on the current thread only
    #[arg(long)]
    sequential: bool,

    /// Print the first N parsed articles of the first corpus as XML
    #[arg(long, value_name = "N")]
    inspect: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("failed to open {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}", path.display())]
    Corpus {
        path: PathBuf,
        #[source]
        source: CorpusError,
    },
    #[error("skipping malformed blocks is disabled by the `strict` feature")]
    StrictMode,
    #[error("failed to set up the thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to serialize article")]
    Write(#[from] WriteError),
}

fn read_corpus(path: &Path, delimiter: &str, policy: MalformedBlocks) -> Result<Vec<Article>, AppError> {
    let file = File::open(path).map_err(|source| AppError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let corpus_error = |source| AppError::Corpus {
        path: path.to_path_buf(),
        source,
    };

    let mut articles = to_articles(BufReader::new(file), delimiter)
        .map_err(corpus_error)?
        .with_policy(policy);
    let parsed = articles
        .by_ref()
        .collect::<Result<Vec<_>, _>>()
        .map_err(corpus_error)?;

    let stats = articles.stats();
    tracing::info!(
        path = %path.display(),
        blocks = stats.blocks,
        articles = stats.articles,
        without_revisions = stats.without_revisions,
        skipped_malformed = stats.skipped_malformed,
        "read corpus"
    );
    Ok(parsed)
}

fn run(args: CommandLine) -> Result<(), AppError> {
    let policy = if args.skip_malformed {
        if cfg!(feature = "strict") {
            return Err(AppError::StrictMode);
        }
        MalformedBlocks::Skip
    } else {
        MalformedBlocks::Abort
    };

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let (corpus_a, timing) = timed("read corpus A", || {
        read_corpus(&args.corpus_a, &args.delimiter, policy)
    });
    let corpus_a = corpus_a?;
    eprintln!("{}: {:.2?}", timing.label, timing.elapsed);

    let corpus_b = match &args.corpus_b {
        Some(path) => {
            let (corpus_b, timing) = timed("read corpus B", || read_corpus(path, &args.delimiter, policy));
            eprintln!("{}: {:.2?}", timing.label, timing.elapsed);
            Some(corpus_b?)
        }
        None => None,
    };

    if let Some(count) = args.inspect {
        for article in corpus_a.iter().take(count) {
            println!("{}", article_to_xml(article)?);
        }
    }

    let params = QueryParams {
        min_revisions: args.min_revisions,
        min_contributors: args.min_contributors,
        target_year: args.year,
        top: args.top,
        shared_min_revisions: args.shared_min_revisions,
    };
    let execution = if args.sequential {
        Execution::Sequential
    } else {
        Execution::Parallel {
            shard_size: args.shard_size,
        }
    };

    let report = run_queries(&corpus_a, corpus_b.as_deref(), &params, execution);
    print!("{report}");

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CommandLine::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_line() {
        CommandLine::command().debug_assert();

        let args = CommandLine::parse_from(["revstats", "a.xml", "b.xml", "--top", "3", "--sequential"]);
        assert_eq!(args.corpus_b.as_deref(), Some(Path::new("b.xml")));
        assert_eq!(args.top, 3);
        assert_eq!(args.delimiter, DEFAULT_DELIMITER);
        assert!(args.sequential);
    }

    #[test]
    fn test_help_mentions_memory_use() {
        let help = CommandLine::command().render_long_help().to_string();
        assert!(help.contains("memory"));
    }
}
