//! Score-ordered multimap.
//!
//! Backs leaderboards and order books. Total order is `(score ascending,
//! member lexicographic ascending)` for every rank and range operation.

use super::Score;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// An entry in a sorted index.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedSetEntry {
    /// The member name
    pub member: Bytes,
    /// The score
    pub score: Score,
}

impl SortedSetEntry {
    /// Create a new entry.
    pub fn new(member: Bytes, score: Score) -> Self {
        Self { member, score }
    }
}

/// One side of an order-book view at a given depth.
#[derive(Debug, Clone)]
pub struct BookLevel {
    /// Order identifier
    pub member: Bytes,
    /// Stored score (asks keep their negative stored form)
    pub score: Score,
    /// True price (negation undone for asks)
    pub price: Score,
}

/// Wrapper giving scores a total order (NaN sorts first).
#[derive(Debug, Clone, Copy)]
struct OrderedScore(Score);

impl PartialEq for OrderedScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedScore {}

impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal),
        }
    }
}

/// Key for the score-ordered map: (score, member).
#[derive(Debug, Clone, Eq, PartialEq)]
struct ScoreKey {
    score: OrderedScore,
    member: Bytes,
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A sorted index with O(log N) ordered operations.
///
/// # Implementation
///
/// Two structures are kept in lockstep:
/// - `HashMap<member, score>` for O(1) score lookup by member
/// - `BTreeMap<(score, member), ()>` for ordered iteration and rank
///
/// The same shape as a skiplist + hashtable pairing, using std collections.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    /// Member to score mapping
    scores: HashMap<Bytes, Score>,
    /// Score-ordered index
    by_score: BTreeMap<ScoreKey, ()>,
}

impl SortedSet {
    /// Create a new empty sorted index.
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            by_score: BTreeMap::new(),
        }
    }

    /// Returns the number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns true if the index is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Add a member with a score, or update an existing member's score.
    ///
    /// Returns true if newly added, false if updated.
    pub fn add(&mut self, member: Bytes, score: Score) -> bool {
        if let Some(&old_score) = self.scores.get(&member) {
            if old_score.to_bits() == score.to_bits() {
                return false;
            }
            self.by_score.remove(&ScoreKey {
                score: OrderedScore(old_score),
                member: member.clone(),
            });
            self.scores.insert(member.clone(), score);
            self.by_score.insert(
                ScoreKey {
                    score: OrderedScore(score),
                    member,
                },
                (),
            );
            false
        } else {
            self.scores.insert(member.clone(), score);
            self.by_score.insert(
                ScoreKey {
                    score: OrderedScore(score),
                    member,
                },
                (),
            );
            true
        }
    }

    /// Remove a member. Returns true if it existed.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        if let Some(score) = self.scores.remove(member) {
            self.by_score.remove(&ScoreKey {
                score: OrderedScore(score),
                member: Bytes::copy_from_slice(member),
            });
            true
        } else {
            false
        }
    }

    /// Remove multiple members. Returns the count removed.
    pub fn remove_multi<'a>(&mut self, members: impl IntoIterator<Item = &'a [u8]>) -> usize {
        members.into_iter().filter(|m| self.remove(m)).count()
    }

    /// Get the score of a member.
    #[inline]
    pub fn score(&self, member: &[u8]) -> Option<Score> {
        self.scores.get(member).copied()
    }

    /// Increment a member's score by delta, creating it at `delta` if absent.
    /// Returns the new score.
    pub fn incr(&mut self, member: Bytes, delta: Score) -> Score {
        let new_score = self.scores.get(&member).copied().unwrap_or(0.0) + delta;
        self.add(member, new_score);
        new_score
    }

    /// Ascending rank of a member: the number of members strictly before it
    /// in `(score, member)` order. 0-based.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.scores.get(member)?;
        let key = ScoreKey {
            score: OrderedScore(*score),
            member: Bytes::copy_from_slice(member),
        };
        Some(self.by_score.range(..&key).count())
    }

    /// Descending rank of a member. 0-based.
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        let rank = self.rank(member)?;
        Some(self.len() - 1 - rank)
    }

    /// Range by rank with negative-index and clamping semantics.
    ///
    /// Negative indices count from the end; out-of-range indices clamp;
    /// a reversed range after normalization yields an empty result.
    pub fn range(&self, start: i64, stop: i64) -> Vec<SortedSetEntry> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }

        let start = if start < 0 {
            (len + start).max(0) as usize
        } else {
            (start as usize).min(self.len())
        };

        let stop = if stop < 0 {
            let s = len + stop;
            if s < 0 {
                return Vec::new();
            }
            s as usize
        } else {
            (stop as usize).min(self.len() - 1)
        };

        if start > stop {
            return Vec::new();
        }

        self.by_score
            .keys()
            .skip(start)
            .take(stop - start + 1)
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
            .collect()
    }

    /// Reverse range by rank: index 0 is the highest-ordered member.
    pub fn rev_range(&self, start: i64, stop: i64) -> Vec<SortedSetEntry> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }

        // Map reverse positions onto forward positions and flip.
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || stop < 0 {
            return Vec::new();
        }

        let fwd_start = len - 1 - stop;
        let fwd_stop = len - 1 - start;
        let mut result = self.range(fwd_start, fwd_stop);
        result.reverse();
        result
    }

    /// Range by score bounds, in ascending order.
    pub fn range_by_score(&self, min: ScoreBound, max: ScoreBound) -> Vec<SortedSetEntry> {
        self.by_score
            .keys()
            .filter(|k| min.accepts_above(k.score.0) && max.accepts_below(k.score.0))
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
            .collect()
    }

    /// Count members in a score range.
    pub fn count_by_score(&self, min: ScoreBound, max: ScoreBound) -> usize {
        self.by_score
            .keys()
            .filter(|k| min.accepts_above(k.score.0) && max.accepts_below(k.score.0))
            .count()
    }

    /// Remove members by rank range. Returns the count removed.
    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> usize {
        let entries = self.range(start, stop);
        let count = entries.len();
        for entry in entries {
            self.remove(&entry.member);
        }
        count
    }

    /// Remove members by score range. Returns the count removed.
    pub fn remove_range_by_score(&mut self, min: ScoreBound, max: ScoreBound) -> usize {
        let entries = self.range_by_score(min, max);
        let count = entries.len();
        for entry in entries {
            self.remove(&entry.member);
        }
        count
    }

    /// Iterate over entries in ascending `(score, member)` order.
    pub fn iter(&self) -> impl Iterator<Item = SortedSetEntry> + '_ {
        self.by_score
            .keys()
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.scores.clear();
        self.by_score.clear();
    }

    /// Estimate memory usage.
    pub fn memory_usage(&self) -> usize {
        let base = size_of::<Self>();
        let scores_overhead = self.scores.capacity() * (size_of::<Bytes>() + 8);
        let btree_overhead = self.by_score.len() * size_of::<ScoreKey>();
        let member_data: usize = self.scores.keys().map(|k| k.len()).sum();
        base + scores_overhead + btree_overhead + member_data * 2
    }

    // ───────────────────────────────────────────────────────────────────
    // Order-book views
    //
    // Convention: positive scores are bids (higher = better); asks are
    // stored negated so the best ask is the largest negative score.
    // ───────────────────────────────────────────────────────────────────

    /// The best bid: the largest positive-score member.
    pub fn best_bid(&self) -> Option<SortedSetEntry> {
        self.by_score
            .keys()
            .next_back()
            .filter(|k| k.score.0 > 0.0)
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
    }

    /// The best ask: the largest (least negative) negative-score member.
    pub fn best_ask(&self) -> Option<SortedSetEntry> {
        let zero = ScoreKey {
            score: OrderedScore(0.0),
            member: Bytes::new(),
        };
        self.by_score
            .range(..&zero)
            .next_back()
            .map(|(k, ())| SortedSetEntry::new(k.member.clone(), k.score.0))
            .filter(|e| e.score < 0.0)
    }

    /// The bid/ask spread: `(-best_ask) - best_bid` when both sides exist.
    pub fn spread(&self) -> Option<Score> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(-ask.score - bid.score)
    }

    /// A depth-limited order-book view: up to `depth` bids (best first,
    /// descending score) and up to `depth` asks (best first, ascending
    /// true price).
    pub fn book(&self, depth: usize) -> (Vec<BookLevel>, Vec<BookLevel>) {
        let bids = self
            .by_score
            .keys()
            .rev()
            .filter(|k| k.score.0 > 0.0)
            .take(depth)
            .map(|k| BookLevel {
                member: k.member.clone(),
                score: k.score.0,
                price: k.score.0,
            })
            .collect();

        let zero = ScoreKey {
            score: OrderedScore(0.0),
            member: Bytes::new(),
        };
        let asks = self
            .by_score
            .range(..&zero)
            .rev()
            .map(|(k, ())| k)
            .filter(|k| k.score.0 < 0.0)
            .take(depth)
            .map(|k| BookLevel {
                member: k.member.clone(),
                score: k.score.0,
                price: -k.score.0,
            })
            .collect();

        (bids, asks)
    }
}

/// Score bound for range queries.
#[derive(Debug, Clone, Copy)]
pub enum ScoreBound {
    /// Inclusive bound
    Inclusive(Score),
    /// Exclusive bound
    Exclusive(Score),
    /// Negative infinity
    NegInf,
    /// Positive infinity
    PosInf,
}

impl ScoreBound {
    /// As a lower bound: does `s` sit at or above this bound?
    fn accepts_above(self, s: Score) -> bool {
        match self {
            Self::Inclusive(v) => s >= v,
            Self::Exclusive(v) => s > v,
            Self::NegInf => true,
            Self::PosInf => false,
        }
    }

    /// As an upper bound: does `s` sit at or below this bound?
    fn accepts_below(self, s: Score) -> bool {
        match self {
            Self::Inclusive(v) => s <= v,
            Self::Exclusive(v) => s < v,
            Self::NegInf => false,
            Self::PosInf => true,
        }
    }

    /// Parse bound syntax: `1.5`, `(1.5`, `-inf`, `+inf`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();

        if s.eq_ignore_ascii_case("-inf") {
            return Some(Self::NegInf);
        }
        if s.eq_ignore_ascii_case("+inf") || s.eq_ignore_ascii_case("inf") {
            return Some(Self::PosInf);
        }

        if let Some(rest) = s.strip_prefix('(') {
            rest.parse().ok().map(Self::Exclusive)
        } else {
            s.parse().ok().map(Self::Inclusive)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_add_and_update() {
        let mut zset = SortedSet::new();
        assert!(zset.add(b("a"), 1.0));
        assert!(zset.add(b("b"), 2.0));
        assert!(!zset.add(b("a"), 1.5));

        assert_eq!(zset.len(), 2);
        assert_eq!(zset.score(b"a"), Some(1.5));
        assert_eq!(zset.score(b"b"), Some(2.0));
    }

    #[test]
    fn test_rank_with_tie_break() {
        let mut zset = SortedSet::new();
        zset.add(b("beta"), 1.0);
        zset.add(b("alpha"), 1.0);
        zset.add(b("gamma"), 2.0);

        // Equal scores order lexicographically by member
        assert_eq!(zset.rank(b"alpha"), Some(0));
        assert_eq!(zset.rank(b"beta"), Some(1));
        assert_eq!(zset.rank(b"gamma"), Some(2));
        assert_eq!(zset.rank(b"missing"), None);

        assert_eq!(zset.rev_rank(b"gamma"), Some(0));
        assert_eq!(zset.rev_rank(b"alpha"), Some(2));
    }

    #[test]
    fn test_rank_total_order_law() {
        let mut zset = SortedSet::new();
        let members = [("m1", 3.0), ("m2", 1.0), ("m3", 2.0), ("m4", 2.0)];
        for (m, s) in members {
            zset.add(b(m), s);
        }

        for (ma, sa) in members {
            for (mb, sb) in members {
                let ra = zset.rank(ma.as_bytes()).unwrap();
                let rb = zset.rank(mb.as_bytes()).unwrap();
                let key_a = (sa, ma);
                let key_b = (sb, mb);
                assert_eq!(
                    ra < rb,
                    key_a.partial_cmp(&key_b) == Some(Ordering::Less),
                    "rank order must follow (score, member) order for {ma} vs {mb}"
                );
            }
        }
    }

    #[test]
    fn test_range_negative_indices() {
        let mut zset = SortedSet::new();
        zset.add(b("a"), 1.0);
        zset.add(b("b"), 2.0);
        zset.add(b("c"), 3.0);

        let range = zset.range(0, 1);
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].member, b("a"));

        let range = zset.range(-2, -1);
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].member, b("b"));
        assert_eq!(range[1].member, b("c"));

        // Out-of-range clamps; reversed is empty
        assert_eq!(zset.range(0, 100).len(), 3);
        assert!(zset.range(2, 1).is_empty());
    }

    #[test]
    fn test_rev_range_is_exact_reverse() {
        let mut zset = SortedSet::new();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            zset.add(b(m), s);
        }

        let fwd: Vec<_> = zset.range(0, -1).into_iter().map(|e| e.member).collect();
        let mut rev: Vec<_> = zset.rev_range(0, -1).into_iter().map(|e| e.member).collect();
        rev.reverse();
        assert_eq!(fwd, rev);

        let top2 = zset.rev_range(0, 1);
        assert_eq!(top2[0].member, b("d"));
        assert_eq!(top2[1].member, b("c"));
    }

    #[test]
    fn test_range_by_score() {
        let mut zset = SortedSet::new();
        zset.add(b("a"), 1.0);
        zset.add(b("b"), 2.0);
        zset.add(b("c"), 3.0);

        let range = zset.range_by_score(ScoreBound::Inclusive(1.5), ScoreBound::Inclusive(2.5));
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].member, b("b"));

        let range = zset.range_by_score(ScoreBound::Exclusive(1.0), ScoreBound::PosInf);
        assert_eq!(range.len(), 2);

        assert_eq!(
            zset.count_by_score(ScoreBound::NegInf, ScoreBound::Inclusive(2.0)),
            2
        );
    }

    #[test]
    fn test_incr() {
        let mut zset = SortedSet::new();
        assert_eq!(zset.incr(b("a"), 5.0), 5.0);
        assert_eq!(zset.incr(b("a"), 3.0), 8.0);
        assert_eq!(zset.incr(b("a"), -2.0), 6.0);
    }

    #[test]
    fn test_remove_ranges() {
        let mut zset = SortedSet::new();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            zset.add(b(m), s);
        }

        assert_eq!(zset.remove_range_by_rank(0, 1), 2);
        assert_eq!(zset.len(), 2);
        assert_eq!(
            zset.remove_range_by_score(ScoreBound::Inclusive(4.0), ScoreBound::PosInf),
            1
        );
        assert_eq!(zset.len(), 1);
        assert_eq!(zset.score(b"c"), Some(3.0));
    }

    #[test]
    fn test_order_book() {
        let mut book = SortedSet::new();
        // Bids: positive scores; asks stored negated
        book.add(b("bid:1"), 150.20);
        book.add(b("bid:2"), 150.15);
        book.add(b("ask:1"), -150.25);
        book.add(b("ask:2"), -150.30);

        let bid = book.best_bid().unwrap();
        assert_eq!(bid.member, b("bid:1"));
        assert_eq!(bid.score, 150.20);

        let ask = book.best_ask().unwrap();
        assert_eq!(ask.member, b("ask:1"));
        assert_eq!(ask.score, -150.25);

        let spread = book.spread().unwrap();
        assert!((spread - 0.05).abs() < 1e-9);

        let (bids, asks) = book.book(2);
        assert_eq!(bids[0].member, b("bid:1"));
        assert_eq!(bids[1].member, b("bid:2"));
        assert_eq!(asks[0].member, b("ask:1"));
        assert!((asks[0].price - 150.25).abs() < 1e-9);
        assert_eq!(asks[1].member, b("ask:2"));
    }

    #[test]
    fn test_one_sided_book_has_no_spread() {
        let mut book = SortedSet::new();
        book.add(b("bid:1"), 100.0);
        assert!(book.best_bid().is_some());
        assert!(book.best_ask().is_none());
        assert!(book.spread().is_none());
    }

    #[test]
    fn test_score_bound_parse() {
        assert!(matches!(ScoreBound::parse("1.5"), Some(ScoreBound::Inclusive(_))));
        assert!(matches!(ScoreBound::parse("(1.5"), Some(ScoreBound::Exclusive(_))));
        assert!(matches!(ScoreBound::parse("-inf"), Some(ScoreBound::NegInf)));
        assert!(matches!(ScoreBound::parse("+INF"), Some(ScoreBound::PosInf)));
        assert!(ScoreBound::parse("abc").is_none());
    }
}
