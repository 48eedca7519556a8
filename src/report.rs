//! The fixed battery of named queries run by the `revstats` binary.

use std::{
    fmt::{self, Display},
    time::{Duration, Instant},
};

use crate::{
    aggregation::{
        self, cogroup_by_contributor_with, contributor_counts_per_year, filter_cogroup,
        lookup_per_year, rank_counts, CreationYears, DistinctContributors, Execution,
        MinRevisions, MinRevisionsAndContributors, RevisionCount, RevisionsByYear, TopArticles,
        TopContributors, Totals, UniqueContributors,
    },
    dump_parser::Article,
};

/// Tunables of the queries, all passed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParams {
    pub min_revisions: usize,
    pub min_contributors: usize,
    /// Year of the per-year contributor ranking.
    pub target_year: i32,
    /// Length of every ranking.
    pub top: usize,
    /// Minimum revisions on *each* side for a contributor to count as active in both corpora.
    pub shared_min_revisions: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            min_revisions: 10,
            min_contributors: 5,
            target_year: 2010,
            top: 10,
            shared_min_revisions: 1,
        }
    }
}

/// How long a labelled piece of work took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub label: String,
    pub elapsed: Duration,
}

/// Run `f` and return its result together with the time it took.
pub fn timed<T>(label: impl Into<String>, f: impl FnOnce() -> T) -> (T, Timing) {
    let start = Instant::now();
    let value = f();
    let timing = Timing {
        label: label.into(),
        elapsed: start.elapsed(),
    };
    tracing::debug!(label = timing.label.as_str(), elapsed = ?timing.elapsed, "query finished");
    (value, timing)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub timing: Timing,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub queries: Vec<QueryResult>,
}

impl Report {
    fn push(&mut self, label: impl Into<String>, query: impl FnOnce() -> Vec<String>) {
        let (lines, timing) = timed(label, query);
        self.queries.push(QueryResult { timing, lines });
    }

    /// Lines of the query with the given label.
    pub fn lines(&self, label: &str) -> Option<&[String]> {
        self.queries
            .iter()
            .find(|query| query.timing.label == label)
            .map(|query| query.lines.as_slice())
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for query in &self.queries {
            writeln!(f, "== {} ({:.2?})", query.timing.label, query.timing.elapsed)?;
            for line in &query.lines {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}

pub const TOTALS: &str = "revisions and articles";
pub const UNIQUE_CONTRIBUTORS: &str = "unique contributors (summed per article)";
pub const CREATION_YEARS: &str = "creation years";
pub const ACTIVE_ARTICLES: &str = "articles above revision and contributor thresholds";
pub const TOP_ARTICLES: &str = "top articles by revision count";
pub const TOP_CONTRIBUTORS: &str = "top contributors by revision count";
pub const REVISIONS_PER_YEAR: &str = "revisions per year";
pub const CONTRIBUTORS_PER_YEAR: &str = "distinct contributors per year";
pub const TOP_CONTRIBUTORS_OF_YEAR: &str = "top contributors of target year";
pub const SHARED_CONTRIBUTORS: &str = "contributors active in both corpora";

/// Run all queries over `corpus_a`; the join query additionally needs `corpus_b`.
#[tracing::instrument(skip_all, fields(articles_a = corpus_a.len(), articles_b = corpus_b.map_or(0, <[Article]>::len)))]
pub fn run_queries(
    corpus_a: &[Article],
    corpus_b: Option<&[Article]>,
    params: &QueryParams,
    execution: Execution,
) -> Report {
    let mut report = Report::default();
    let top = Some(params.top);

    report.push(TOTALS, || {
        let (revisions, articles) = aggregation::run(&Totals, corpus_a, execution);
        vec![format!("{revisions} revisions in {articles} articles")]
    });
    report.push(UNIQUE_CONTRIBUTORS, || {
        vec![aggregation::run(&UniqueContributors, corpus_a, execution).to_string()]
    });
    report.push(CREATION_YEARS, || {
        let years = aggregation::run(&CreationYears, corpus_a, execution);
        vec![years
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(", ")]
    });
    report.push(ACTIVE_ARTICLES, || {
        let threshold = MinRevisionsAndContributors {
            min_revisions: params.min_revisions,
            min_contributors: params.min_contributors,
        };
        vec![format!(
            "{} articles with >= {} revisions and >= {} contributors",
            aggregation::run(&threshold, corpus_a, execution),
            params.min_revisions,
            params.min_contributors
        )]
    });
    report.push(TOP_ARTICLES, || {
        aggregation::run(&TopArticles { limit: top }, corpus_a, execution)
            .into_iter()
            .map(|(title, count)| format!("{count:>8}  {title}"))
            .collect()
    });
    report.push(TOP_CONTRIBUTORS, || {
        aggregation::run(&TopContributors { limit: top }, corpus_a, execution)
            .into_iter()
            .map(|(contributor, count)| format!("{count:>8}  {}", display_contributor(contributor)))
            .collect()
    });

    let (groups, timing) = timed("group revisions by year", || {
        aggregation::run(&RevisionsByYear, corpus_a, execution)
    });
    report.queries.push(QueryResult {
        timing,
        lines: vec![format!("{} distinct years", groups.len())],
    });

    report.push(REVISIONS_PER_YEAR, || {
        lookup_per_year(&groups, &RevisionCount)
            .into_iter()
            .map(|(year, count)| format!("{year}: {count}"))
            .collect()
    });
    report.push(CONTRIBUTORS_PER_YEAR, || {
        lookup_per_year(&groups, &DistinctContributors)
            .into_iter()
            .map(|(year, count)| format!("{year}: {count}"))
            .collect()
    });
    report.push(
        format!("{TOP_CONTRIBUTORS_OF_YEAR} ({})", params.target_year),
        || {
            let mut per_year = contributor_counts_per_year(&groups);
            match per_year.remove(&params.target_year) {
                Some(counts) => rank_counts(counts, top)
                    .into_iter()
                    .map(|(contributor, count)| {
                        format!("{count:>8}  {}", display_contributor(contributor))
                    })
                    .collect(),
                None => vec![format!("no revisions in {}", params.target_year)],
            }
        },
    );

    if let Some(corpus_b) = corpus_b {
        report.push(SHARED_CONTRIBUTORS, || {
            let cogroup = cogroup_by_contributor_with(corpus_a, corpus_b, execution);
            let shared = filter_cogroup(&cogroup, &MinRevisions(params.shared_min_revisions));

            let mut ranked: Vec<_> = shared
                .iter()
                .map(|(&contributor, (left, right))| (contributor, left.len(), right.len()))
                .collect();
            ranked.sort_unstable_by(|a, b| {
                (b.1 + b.2).cmp(&(a.1 + a.2)).then_with(|| a.0.cmp(b.0))
            });

            let mut lines = vec![format!(
                "{} of {} contributors with >= {} revisions in each corpus",
                shared.len(),
                cogroup.len(),
                params.shared_min_revisions
            )];
            lines.extend(ranked.into_iter().take(params.top).map(
                |(contributor, left, right)| {
                    format!("{left:>8} {right:>8}  {}", display_contributor(contributor))
                },
            ));
            lines
        });
    }

    report
}

fn display_contributor(contributor: &str) -> &str {
    if contributor.is_empty() {
        "(unknown)"
    } else {
        contributor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{article, revision};

    fn corpus_a() -> Vec<Article> {
        vec![
            article(
                1,
                "Rust",
                vec![
                    revision(1, "alice", "2010-01-01T00:00:00Z"),
                    revision(2, "bob", "2010-02-01T00:00:00Z"),
                    revision(3, "alice", "2011-01-01T00:00:00Z"),
                ],
            ),
            article(2, "Go", vec![revision(4, "", "2011-05-01T00:00:00Z")]),
        ]
    }

    fn corpus_b() -> Vec<Article> {
        vec![article(
            9,
            "Elsewhere",
            vec![
                revision(90, "alice", "2015-01-01T00:00:00Z"),
                revision(91, "carol", "2015-01-02T00:00:00Z"),
            ],
        )]
    }

    fn params() -> QueryParams {
        QueryParams {
            min_revisions: 2,
            min_contributors: 2,
            target_year: 2010,
            top: 5,
            shared_min_revisions: 1,
        }
    }

    #[test]
    fn test_queries() {
        let a = corpus_a();
        let b = corpus_b();
        let report = run_queries(&a, Some(&b), &params(), Execution::Sequential);

        assert_eq!(report.lines(TOTALS).unwrap(), ["4 revisions in 2 articles"]);
        assert_eq!(report.lines(UNIQUE_CONTRIBUTORS).unwrap(), ["3"]);
        assert_eq!(report.lines(CREATION_YEARS).unwrap(), ["2010, 2011"]);
        assert_eq!(
            report.lines(ACTIVE_ARTICLES).unwrap(),
            ["1 articles with >= 2 revisions and >= 2 contributors"]
        );
        assert_eq!(
            report.lines(TOP_ARTICLES).unwrap(),
            ["       3  Rust", "       1  Go"]
        );
        assert_eq!(
            report.lines(TOP_CONTRIBUTORS).unwrap(),
            ["       2  alice", "       1  (unknown)", "       1  bob"]
        );
        assert_eq!(report.lines(REVISIONS_PER_YEAR).unwrap(), ["2010: 2", "2011: 2"]);
        assert_eq!(report.lines(CONTRIBUTORS_PER_YEAR).unwrap(), ["2010: 2", "2011: 2"]);
        assert_eq!(
            report.lines("top contributors of target year (2010)").unwrap(),
            ["       1  alice", "       1  bob"]
        );
        assert_eq!(
            report.lines(SHARED_CONTRIBUTORS).unwrap(),
            [
                "1 of 4 contributors with >= 1 revisions in each corpus",
                "       2        1  alice"
            ]
        );
    }

    #[test]
    fn test_execution_does_not_change_report() {
        let a = corpus_a();
        let lines = |execution| {
            run_queries(&a, None, &params(), execution)
                .queries
                .into_iter()
                .map(|query| query.lines)
                .collect::<Vec<_>>()
        };

        let sequential = lines(Execution::Sequential);
        assert_eq!(lines(Execution::Sharded { shard_size: 1 }), sequential);
        assert_eq!(lines(Execution::Parallel { shard_size: 1 }), sequential);
    }

    #[test]
    fn test_missing_target_year_and_second_corpus() {
        let a = corpus_a();
        let params = QueryParams {
            target_year: 1999,
            ..params()
        };
        let report = run_queries(&a, None, &params, Execution::Sequential);

        assert_eq!(
            report.lines("top contributors of target year (1999)").unwrap(),
            ["no revisions in 1999"]
        );
        assert!(report.lines(SHARED_CONTRIBUTORS).is_none());
    }

    #[test]
    fn test_timed() {
        let (value, timing) = timed("answer", || 42);
        assert_eq!(value, 42);
        assert_eq!(timing.label, "answer");
    }
}
