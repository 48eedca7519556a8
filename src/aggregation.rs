//! Aggregate statistics over parsed articles.
//!
//! Every statistic over an article sequence is an [`Aggregator`]: a per-shard fold plus an associative merge
//! of the shard-local partial results. This makes the same operator usable sequentially, over consecutive
//! shards or in parallel via `rayon`, always with identical results. The final ordering of ranked output is
//! applied in [`Aggregator::finish`], i.e. only after all partial results are merged.
//!
//! Results borrow from the articles they were computed from; aggregation never clones or mutates its input.
//!
//! The free functions named after the individual statistics run their aggregator sequentially over any
//! iterator of articles, [`run`] and [`run_cancellable`] select the execution strategy explicitly.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicBool, Ordering},
};

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::dump_parser::{Article, Revision};

/// All revisions of the corpus grouped by [`Revision::year`], years in ascending order.
pub type YearGroups<'a> = BTreeMap<i32, Vec<&'a Revision>>;

/// Number of revisions per contributor.
pub type ContributorCounts<'a> = FxHashMap<&'a str, u64>;

/// Revisions of one corpus grouped by contributor.
pub type ContributorBags<'a> = FxHashMap<&'a str, Vec<&'a Revision>>;

/// Full outer join of two corpora by contributor: `(revisions in A, revisions in B)`, either side may be empty.
pub type CoGroup<'a> = FxHashMap<&'a str, (Vec<&'a Revision>, Vec<&'a Revision>)>;

/// A statistic over a sequence of articles, computed as fold per shard and merge across shards.
///
/// `merge` must be associative and must not depend on how the articles were split into shards,
/// `init` must be its identity.
pub trait Aggregator<'a>: Sync {
    type Partial: Send;
    type Output;

    fn init(&self) -> Self::Partial;
    fn fold(&self, partial: Self::Partial, article: &'a Article) -> Self::Partial;
    fn merge(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial;
    fn finish(&self, partial: Self::Partial) -> Self::Output;
}

/// How [`run`] splits the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// A single fold over all articles.
    #[default]
    Sequential,
    /// Shards of `shard_size` articles folded one after another on the current thread.
    Sharded { shard_size: usize },
    /// Shards of `shard_size` articles folded on the `rayon` thread pool.
    Parallel { shard_size: usize },
}

/// Returned by [`run_cancellable`] when the cancellation flag was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("aggregation cancelled")]
pub struct Cancelled;

/// Run `aggregator` sequentially over an arbitrary (possibly lazy) sequence of articles.
pub fn aggregate<'a, A: Aggregator<'a>>(
    aggregator: &A,
    articles: impl IntoIterator<Item = &'a Article>,
) -> A::Output {
    let partial = articles
        .into_iter()
        .fold(aggregator.init(), |partial, article| {
            aggregator.fold(partial, article)
        });
    aggregator.finish(partial)
}

pub fn run<'a, A: Aggregator<'a>>(
    aggregator: &A,
    articles: &'a [Article],
    execution: Execution,
) -> A::Output {
    match run_cancellable(aggregator, articles, execution, &AtomicBool::new(false)) {
        Ok(output) => output,
        Err(Cancelled) => unreachable!("cancellation flag is never set"),
    }
}

/// Like [`run`], but checks `cancel` before each shard and gives up if it is set.
///
/// Partial results of a cancelled run are simply dropped, they have no side effects.
pub fn run_cancellable<'a, A: Aggregator<'a>>(
    aggregator: &A,
    articles: &'a [Article],
    execution: Execution,
    cancel: &AtomicBool,
) -> Result<A::Output, Cancelled> {
    let fold_shard = |shard: &'a [Article]| {
        shard
            .iter()
            .fold(aggregator.init(), |partial, article| aggregator.fold(partial, article))
    };
    let is_cancelled = || cancel.load(Ordering::Relaxed);

    let partial = match execution {
        Execution::Sequential => {
            if is_cancelled() {
                return Err(Cancelled);
            }
            fold_shard(articles)
        }
        Execution::Sharded { shard_size } => {
            let mut partial = aggregator.init();
            for shard in articles.chunks(shard_size.max(1)) {
                if is_cancelled() {
                    return Err(Cancelled);
                }
                partial = aggregator.merge(partial, fold_shard(shard));
            }
            partial
        }
        Execution::Parallel { shard_size } => articles
            .par_chunks(shard_size.max(1))
            .map(|shard| (!is_cancelled()).then(|| fold_shard(shard)))
            .try_reduce(
                || aggregator.init(),
                |left, right| Some(aggregator.merge(left, right)),
            )
            .ok_or(Cancelled)?,
    };

    Ok(aggregator.finish(partial))
}

fn merge_counts<'a>(
    left: ContributorCounts<'a>,
    right: ContributorCounts<'a>,
) -> ContributorCounts<'a> {
    let (mut into, from) = if left.len() >= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    for (contributor, count) in from {
        *into.entry(contributor).or_insert(0) += count;
    }
    into
}

// keeps the order of `left` before `right` for every key
fn merge_bags<'a, K, M>(mut left: M, right: M) -> M
where
    M: BagMap<'a, K> + IntoIterator<Item = (K, Vec<&'a Revision>)>,
{
    for (key, mut bag) in right {
        left.bag_mut(key).append(&mut bag);
    }
    left
}

trait BagMap<'a, K> {
    fn bag_mut(&mut self, key: K) -> &mut Vec<&'a Revision>;
}

impl<'a> BagMap<'a, i32> for YearGroups<'a> {
    fn bag_mut(&mut self, key: i32) -> &mut Vec<&'a Revision> {
        self.entry(key).or_default()
    }
}

impl<'a> BagMap<'a, &'a str> for ContributorBags<'a> {
    fn bag_mut(&mut self, key: &'a str) -> &mut Vec<&'a Revision> {
        self.entry(key).or_default()
    }
}

/// `(total number of revisions, number of articles)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Totals;

impl<'a> Aggregator<'a> for Totals {
    type Partial = (u64, u64);
    type Output = (u64, u64);

    fn init(&self) -> Self::Partial {
        (0, 0)
    }

    fn fold(&self, (revisions, articles): Self::Partial, article: &'a Article) -> Self::Partial {
        (revisions + article.revision_count() as u64, articles + 1)
    }

    fn merge(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial {
        (left.0 + right.0, left.1 + right.1)
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        partial
    }
}

/// Sum over all articles of the number of distinct contributors *within* each article.
///
/// A contributor editing two articles is counted twice, this is not a corpus-wide distinct count.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueContributors;

impl<'a> Aggregator<'a> for UniqueContributors {
    type Partial = u64;
    type Output = u64;

    fn init(&self) -> Self::Partial {
        0
    }

    fn fold(&self, partial: Self::Partial, article: &'a Article) -> Self::Partial {
        partial + article.distinct_contributor_count() as u64
    }

    fn merge(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial {
        left + right
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        partial
    }
}

/// Distinct [`Article::creation_year`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreationYears;

impl<'a> Aggregator<'a> for CreationYears {
    type Partial = BTreeSet<i32>;
    type Output = BTreeSet<i32>;

    fn init(&self) -> Self::Partial {
        BTreeSet::new()
    }

    fn fold(&self, mut partial: Self::Partial, article: &'a Article) -> Self::Partial {
        partial.extend(article.creation_year());
        partial
    }

    fn merge(&self, mut left: Self::Partial, mut right: Self::Partial) -> Self::Partial {
        left.append(&mut right);
        left
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        partial
    }
}

/// Number of articles with at least `min_revisions` revisions and at least `min_contributors`
/// distinct contributors. Both thresholds are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct MinRevisionsAndContributors {
    pub min_revisions: usize,
    pub min_contributors: usize,
}

impl<'a> Aggregator<'a> for MinRevisionsAndContributors {
    type Partial = u64;
    type Output = u64;

    fn init(&self) -> Self::Partial {
        0
    }

    fn fold(&self, partial: Self::Partial, article: &'a Article) -> Self::Partial {
        // the cheap check first
        let matches = article.revision_count() >= self.min_revisions
            && article.distinct_contributor_count() >= self.min_contributors;
        partial + u64::from(matches)
    }

    fn merge(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial {
        left + right
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        partial
    }
}

/// Articles ranked by revision count, descending.
///
/// Ties are broken by title and then article id, so the ranking does not depend on the execution strategy.
/// With a `limit` only the top `limit` entries are kept, per shard and overall.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopArticles {
    pub limit: Option<usize>,
}

type ArticleRank<'a> = (&'a str, usize, i64);

impl TopArticles {
    fn sort_and_truncate(&self, ranks: &mut Vec<ArticleRank<'_>>) {
        ranks.sort_unstable_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.cmp(b.0))
                .then_with(|| a.2.cmp(&b.2))
        });
        if let Some(limit) = self.limit {
            ranks.truncate(limit);
        }
    }
}

impl<'a> Aggregator<'a> for TopArticles {
    type Partial = Vec<ArticleRank<'a>>;
    type Output = Vec<(&'a str, usize)>;

    fn init(&self) -> Self::Partial {
        Vec::new()
    }

    fn fold(&self, mut partial: Self::Partial, article: &'a Article) -> Self::Partial {
        partial.push((article.title.as_str(), article.revision_count(), article.id));
        // bound the memory of a shard to a multiple of the limit
        if let Some(limit) = self.limit {
            if partial.len() >= limit.max(512).saturating_mul(2) {
                self.sort_and_truncate(&mut partial);
            }
        }
        partial
    }

    fn merge(&self, mut left: Self::Partial, mut right: Self::Partial) -> Self::Partial {
        left.append(&mut right);
        if self.limit.is_some() {
            self.sort_and_truncate(&mut left);
        }
        left
    }

    fn finish(&self, mut partial: Self::Partial) -> Self::Output {
        self.sort_and_truncate(&mut partial);
        partial
            .into_iter()
            .map(|(title, count, _)| (title, count))
            .collect()
    }
}

/// Contributors ranked by their total number of revisions over all articles, descending.
///
/// Ties are broken by contributor name.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopContributors {
    pub limit: Option<usize>,
}

impl<'a> Aggregator<'a> for TopContributors {
    type Partial = ContributorCounts<'a>;
    type Output = Vec<(&'a str, u64)>;

    fn init(&self) -> Self::Partial {
        ContributorCounts::default()
    }

    fn fold(&self, mut partial: Self::Partial, article: &'a Article) -> Self::Partial {
        for contributor in article.contributors() {
            *partial.entry(contributor).or_insert(0) += 1;
        }
        partial
    }

    fn merge(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial {
        merge_counts(left, right)
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        rank_counts(partial, self.limit)
    }
}

/// Sort contributor counts descending by count, then ascending by name, and keep the first `limit`.
pub fn rank_counts<'a>(counts: ContributorCounts<'a>, limit: Option<usize>) -> Vec<(&'a str, u64)> {
    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }
    ranked
}

/// All revisions grouped by [`Revision::year`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionsByYear;

impl<'a> Aggregator<'a> for RevisionsByYear {
    type Partial = YearGroups<'a>;
    type Output = YearGroups<'a>;

    fn init(&self) -> Self::Partial {
        YearGroups::new()
    }

    fn fold(&self, mut partial: Self::Partial, article: &'a Article) -> Self::Partial {
        for revision in &article.revisions {
            partial.entry(revision.year()).or_default().push(revision);
        }
        partial
    }

    fn merge(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial {
        merge_bags(left, right)
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        partial
    }
}

/// Flat `(contributor, revision)` pairs of all articles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContributorPartition;

impl<'a> Aggregator<'a> for ContributorPartition {
    type Partial = Vec<(&'a str, &'a Revision)>;
    type Output = Vec<(&'a str, &'a Revision)>;

    fn init(&self) -> Self::Partial {
        Vec::new()
    }

    fn fold(&self, mut partial: Self::Partial, article: &'a Article) -> Self::Partial {
        partial.extend(
            article
                .revisions
                .iter()
                .map(|revision| (revision.contributor.as_str(), revision)),
        );
        partial
    }

    fn merge(&self, mut left: Self::Partial, mut right: Self::Partial) -> Self::Partial {
        left.append(&mut right);
        left
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        partial
    }
}

/// Revisions grouped by contributor, one side of [`cogroup_by_contributor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionsByContributor;

impl<'a> Aggregator<'a> for RevisionsByContributor {
    type Partial = ContributorBags<'a>;
    type Output = ContributorBags<'a>;

    fn init(&self) -> Self::Partial {
        ContributorBags::default()
    }

    fn fold(&self, mut partial: Self::Partial, article: &'a Article) -> Self::Partial {
        for revision in &article.revisions {
            partial
                .entry(revision.contributor.as_str())
                .or_default()
                .push(revision);
        }
        partial
    }

    fn merge(&self, left: Self::Partial, right: Self::Partial) -> Self::Partial {
        merge_bags(left, right)
    }

    fn finish(&self, partial: Self::Partial) -> Self::Output {
        partial
    }
}

/// Reduces the revisions of one year to a single number, see [`lookup_per_year`].
pub trait YearReducer {
    fn reduce(&self, revisions: &[&Revision]) -> i64;
}

impl<F> YearReducer for F
where
    F: Fn(&[&Revision]) -> i64,
{
    fn reduce(&self, revisions: &[&Revision]) -> i64 {
        self(revisions)
    }
}

/// Number of revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionCount;

impl YearReducer for RevisionCount {
    fn reduce(&self, revisions: &[&Revision]) -> i64 {
        revisions.len() as i64
    }
}

/// Number of distinct contributors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistinctContributors;

impl YearReducer for DistinctContributors {
    fn reduce(&self, revisions: &[&Revision]) -> i64 {
        revisions
            .iter()
            .map(|revision| revision.contributor.as_str())
            .collect::<FxHashSet<_>>()
            .len() as i64
    }
}

/// Decides whether one side of a co-group entry is kept, see [`filter_cogroup`].
pub trait BagPredicate {
    fn test(&self, revisions: &[&Revision]) -> bool;
}

impl<F> BagPredicate for F
where
    F: Fn(&[&Revision]) -> bool,
{
    fn test(&self, revisions: &[&Revision]) -> bool {
        self(revisions)
    }
}

/// Holds for bags with at least this many revisions.
#[derive(Debug, Clone, Copy)]
pub struct MinRevisions(pub usize);

impl BagPredicate for MinRevisions {
    fn test(&self, revisions: &[&Revision]) -> bool {
        revisions.len() >= self.0
    }
}

pub fn total_revisions_and_articles<'a>(articles: impl IntoIterator<Item = &'a Article>) -> (u64, u64) {
    aggregate(&Totals, articles)
}

/// See [`UniqueContributors`] for the exact (per article) semantics.
pub fn unique_contributor_count<'a>(articles: impl IntoIterator<Item = &'a Article>) -> u64 {
    aggregate(&UniqueContributors, articles)
}

pub fn creation_years<'a>(articles: impl IntoIterator<Item = &'a Article>) -> BTreeSet<i32> {
    aggregate(&CreationYears, articles)
}

pub fn count_with_min_revisions_and_contributors<'a>(
    articles: impl IntoIterator<Item = &'a Article>,
    min_revisions: usize,
    min_contributors: usize,
) -> u64 {
    aggregate(
        &MinRevisionsAndContributors {
            min_revisions,
            min_contributors,
        },
        articles,
    )
}

pub fn top_articles_by_revision_count<'a>(
    articles: impl IntoIterator<Item = &'a Article>,
    limit: Option<usize>,
) -> Vec<(&'a str, usize)> {
    aggregate(&TopArticles { limit }, articles)
}

pub fn top_contributors_by_revision_count<'a>(
    articles: impl IntoIterator<Item = &'a Article>,
    limit: Option<usize>,
) -> Vec<(&'a str, u64)> {
    aggregate(&TopContributors { limit }, articles)
}

pub fn group_revisions_by_year<'a>(articles: impl IntoIterator<Item = &'a Article>) -> YearGroups<'a> {
    aggregate(&RevisionsByYear, articles)
}

pub fn partition_by_contributor<'a>(
    articles: impl IntoIterator<Item = &'a Article>,
) -> Vec<(&'a str, &'a Revision)> {
    aggregate(&ContributorPartition, articles)
}

/// Apply `reducer` to the revisions of every year.
///
/// # Example
///
/// ```
/// use revstats::aggregation::{group_revisions_by_year, lookup_per_year, RevisionCount};
/// # let articles: Vec<revstats::dump_parser::Article> = Vec::new();
///
/// let groups = group_revisions_by_year(&articles);
/// let revisions_per_year = lookup_per_year(&groups, &RevisionCount);
/// let edits_by_anonymous = lookup_per_year(&groups, &|bag: &[&revstats::dump_parser::Revision]| {
///     bag.iter().filter(|r| r.contributor.parse::<std::net::IpAddr>().is_ok()).count() as i64
/// });
/// # assert!(revisions_per_year.is_empty() && edits_by_anonymous.is_empty());
/// ```
pub fn lookup_per_year<R: YearReducer + ?Sized>(
    groups: &YearGroups<'_>,
    reducer: &R,
) -> BTreeMap<i32, i64> {
    groups
        .iter()
        .map(|(&year, revisions)| (year, reducer.reduce(revisions)))
        .collect()
}

/// Number of revisions per contributor, for every year.
pub fn contributor_counts_per_year<'a>(
    groups: &YearGroups<'a>,
) -> BTreeMap<i32, ContributorCounts<'a>> {
    groups
        .iter()
        .map(|(&year, revisions)| {
            let mut counts = ContributorCounts::default();
            for revision in revisions {
                *counts.entry(revision.contributor.as_str()).or_insert(0) += 1;
            }
            (year, counts)
        })
        .collect()
}

/// Full outer join of two revision groupings on the contributor (exact, case-sensitive match).
pub fn join_by_contributor<'a>(left: ContributorBags<'a>, right: ContributorBags<'a>) -> CoGroup<'a> {
    let mut cogroup: CoGroup<'a> = left
        .into_iter()
        .map(|(contributor, bag)| (contributor, (bag, Vec::new())))
        .collect();
    for (contributor, bag) in right {
        cogroup.entry(contributor).or_default().1 = bag;
    }
    cogroup
}

/// Co-group the revisions of two corpora by contributor.
///
/// Every contributor of either corpus appears exactly once; a contributor present in only one corpus
/// has an empty bag on the other side.
pub fn cogroup_by_contributor<'a>(
    articles_a: impl IntoIterator<Item = &'a Article>,
    articles_b: impl IntoIterator<Item = &'a Article>,
) -> CoGroup<'a> {
    join_by_contributor(
        aggregate(&RevisionsByContributor, articles_a),
        aggregate(&RevisionsByContributor, articles_b),
    )
}

/// [`cogroup_by_contributor`] with an explicit execution strategy for both sides.
pub fn cogroup_by_contributor_with<'a>(
    articles_a: &'a [Article],
    articles_b: &'a [Article],
    execution: Execution,
) -> CoGroup<'a> {
    join_by_contributor(
        run(&RevisionsByContributor, articles_a, execution),
        run(&RevisionsByContributor, articles_b, execution),
    )
}

/// Keep the entries for which `predicate` holds for *both* sides.
pub fn filter_cogroup<'a, P: BagPredicate + ?Sized>(cogroup: &CoGroup<'a>, predicate: &P) -> CoGroup<'a> {
    cogroup
        .iter()
        .filter(|(_, (left, right))| predicate.test(left) && predicate.test(right))
        .map(|(&contributor, bags)| (contributor, bags.clone()))
        .collect()
}
