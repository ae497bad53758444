//! Per-entity version timelines.
//!
//! A timeline keeps, for each transaction that touched the entity, a view:
//! the non-overlapping valid time segments visible as of that transaction,
//! each owned by the version that wins there, plus every version written
//! up to it. A new transaction paints its own versions over the previous
//! view, which is correct because the newest transaction always wins where
//! it applies.
//!
//! Views are persistent maps, so consecutive views share everything the
//! transaction did not touch and a timeline with `n` revisions holds
//! `O(n log n)` nodes. Resolving `(valid_time, tx_bound)` is two floor
//! lookups: the view at the bound, then the segment at the valid time.

use super::persistent::PersistentMap;
use super::version::{ends_after, EntityVersion};
use crate::entity::EntityId;
use crate::types::{Timestamp, TxId};
use std::fmt;
use std::sync::Arc;

/// A stretch of valid time owned by one version.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub valid_from: Timestamp,
    pub valid_to: Option<Timestamp>,
    pub version: Arc<EntityVersion>,
}

type Segments = PersistentMap<Timestamp, Segment>;
type Versions = PersistentMap<(Timestamp, TxId), Arc<EntityVersion>>;

#[derive(Clone)]
struct TimelineView {
    segments: Segments,
    /// Keyed by `(valid_from, tx_id)`.
    versions: Versions,
}

/// Every version of one entity, with per-transaction resolution views.
///
/// Immutable once built; the index swaps whole timelines.
#[derive(Clone)]
pub struct EntityTimeline {
    entity_id: EntityId,
    views: PersistentMap<TxId, TimelineView>,
}

impl EntityTimeline {
    /// Builds the timeline that results from applying one transaction's
    /// versions on top of `base`.
    ///
    /// `versions` must not overlap each other and `tx_id` must be greater
    /// than any transaction already in `base`. Returns the new timeline and
    /// the versions it added.
    pub(crate) fn with_transaction(
        base: Option<&EntityTimeline>,
        entity_id: EntityId,
        tx_id: TxId,
        versions: Vec<EntityVersion>,
    ) -> (Self, Vec<Arc<EntityVersion>>) {
        debug_assert!(base.and_then(EntityTimeline::latest_tx).map_or(true, |t| t < tx_id));

        let previous = base.and_then(EntityTimeline::latest_view);
        let mut segments = previous.map(|v| v.segments.clone()).unwrap_or_default();
        let mut all = previous.map(|v| v.versions.clone()).unwrap_or_default();
        let added: Vec<Arc<EntityVersion>> = versions.into_iter().map(Arc::new).collect();
        for version in &added {
            segments = paint(&segments, version);
            all = all.insert((version.valid_from, version.tx_id), Arc::clone(version));
        }

        let views = base
            .map(|b| b.views.clone())
            .unwrap_or_default()
            .insert(tx_id, TimelineView { segments, versions: all });
        (Self { entity_id, views }, added)
    }

    /// The entity.
    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// All versions, sorted by valid time then tx id.
    pub fn versions(&self) -> impl Iterator<Item = Arc<EntityVersion>> {
        self.latest_view()
            .map(|view| view.versions.iter())
            .into_iter()
            .flatten()
            .map(|(_, version)| version)
    }

    /// The last transaction that touched the entity.
    #[must_use]
    pub fn latest_tx(&self) -> Option<TxId> {
        self.views.last().map(|(tx_id, _)| *tx_id)
    }

    /// The version visible at `valid_time` to a reader bounded at
    /// `tx_bound`: among versions with `tx_id <= tx_bound` covering
    /// `valid_time`, the one with the greatest tx id. May be a tombstone.
    #[must_use]
    pub fn resolve(&self, valid_time: Timestamp, tx_bound: TxId) -> Option<&Arc<EntityVersion>> {
        let (_, segment) = self.view(tx_bound)?.segments.floor(&valid_time)?;
        ends_after(segment.valid_to, valid_time).then_some(&segment.version)
    }

    /// [`resolve`](Self::resolve) with no transaction bound.
    #[must_use]
    pub fn resolve_latest(&self, valid_time: Timestamp) -> Option<&Arc<EntityVersion>> {
        self.resolve(valid_time, TxId::new(u64::MAX))
    }

    /// The timeline as it stood after `tx_bound`, or `None` if no
    /// transaction at or before it touched the entity.
    #[must_use]
    pub(crate) fn as_of(&self, tx_bound: TxId) -> Option<Self> {
        let views = self.views.through(&tx_bound);
        views.last()?;
        Some(Self {
            entity_id: self.entity_id.clone(),
            views,
        })
    }

    /// The segments visible at `tx_bound`, in valid time order from the
    /// one starting at or after `from`, or in reverse order from the one
    /// starting at or before `from`.
    pub(crate) fn segments(
        &self,
        tx_bound: TxId,
        from: Option<Timestamp>,
        reverse: bool,
    ) -> impl Iterator<Item = Segment> + Send {
        self.view(tx_bound)
            .map(|view| {
                if reverse {
                    view.segments.walk_back_from(from.as_ref())
                } else {
                    view.segments.walk_from(from.as_ref())
                }
            })
            .into_iter()
            .flatten()
            .map(|(_, segment)| segment)
    }

    /// Every version written at or before `tx_bound`, ordered like
    /// [`segments`](Self::segments) by `(valid_from, tx_id)`.
    pub(crate) fn versions_as_of(
        &self,
        tx_bound: TxId,
        from: Option<(Timestamp, TxId)>,
        reverse: bool,
    ) -> impl Iterator<Item = Arc<EntityVersion>> + Send {
        self.view(tx_bound)
            .map(|view| {
                if reverse {
                    view.versions.walk_back_from(from.as_ref())
                } else {
                    view.versions.walk_from(from.as_ref())
                }
            })
            .into_iter()
            .flatten()
            .map(|(_, version)| version)
    }

    fn view(&self, tx_bound: TxId) -> Option<&TimelineView> {
        self.views.floor(&tx_bound).map(|(_, view)| view)
    }

    fn latest_view(&self) -> Option<&TimelineView> {
        self.views.last().map(|(_, view)| view)
    }
}

impl fmt::Debug for EntityTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityTimeline")
            .field("entity_id", &self.entity_id)
            .field("latest_tx", &self.latest_tx())
            .finish_non_exhaustive()
    }
}

/// Makes `version` own `[valid_from, valid_to)`, trimming or splitting
/// whatever it overlaps.
fn paint(segments: &Segments, version: &Arc<EntityVersion>) -> Segments {
    let from = version.valid_from;
    let to = version.valid_to;
    if to.is_some_and(|to| to <= from) {
        return segments.clone();
    }

    let (mut below, rest) = segments.split(&from);
    let (covered, mut above) = match to {
        Some(to) => rest.split(&to),
        None => (rest, Segments::new()),
    };

    // a segment that starts before `from` and runs into the range
    let straddling = below
        .last()
        .filter(|(_, seg)| ends_after(seg.valid_to, from))
        .map(|(&start, seg)| (start, seg.clone()));
    if let Some((start, seg)) = straddling {
        below = below.insert(
            start,
            Segment {
                valid_to: Some(from),
                ..seg.clone()
            },
        );
        if let Some(to) = to.filter(|&to| ends_after(seg.valid_to, to)) {
            above = above.insert(
                to,
                Segment {
                    valid_from: to,
                    ..seg
                },
            );
        }
    }

    // the last covered segment may run past the range
    if let Some(to) = to {
        let tail = covered
            .last()
            .filter(|(_, seg)| ends_after(seg.valid_to, to))
            .map(|(_, seg)| seg.clone());
        if let Some(seg) = tail {
            above = above.insert(
                to,
                Segment {
                    valid_from: to,
                    ..seg
                },
            );
        }
    }

    let own = Segments::new().insert(
        from,
        Segment {
            valid_from: from,
            valid_to: to,
            version: Arc::clone(version),
        },
    );
    below.concat(&own).concat(&above)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ContentHash;
    use crate::index::version::VersionContent;
    use proptest::prelude::*;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn version(tx: u64, from: i64, to: Option<i64>, tag: u8) -> EntityVersion {
        EntityVersion {
            entity_id: EntityId::from("e"),
            valid_from: ts(from),
            valid_to: to.map(ts),
            tx_id: TxId::new(tx),
            tx_time: ts(tx as i64),
            content: if tag == 0 {
                VersionContent::Tombstone
            } else {
                VersionContent::Document(ContentHash::from_bytes([tag; 32]))
            },
        }
    }

    fn build(versions: &[EntityVersion]) -> EntityTimeline {
        let mut timeline: Option<EntityTimeline> = None;
        for v in versions {
            let (next, _) = EntityTimeline::with_transaction(
                timeline.as_ref(),
                v.entity_id.clone(),
                v.tx_id,
                vec![v.clone()],
            );
            timeline = Some(next);
        }
        timeline.unwrap()
    }

    fn tag_at(timeline: &EntityTimeline, vt: i64, bound: u64) -> Option<u8> {
        timeline
            .resolve(ts(vt), TxId::new(bound))
            .map(|v| v.content_hash().map_or(0, |h| h.as_bytes()[0]))
    }

    #[test]
    fn later_transactions_win_where_they_apply() {
        let timeline = build(&[
            version(0, 0, None, 1),
            version(1, 10, Some(20), 2),
            version(2, 15, None, 0),
        ]);
        assert_eq!(tag_at(&timeline, 5, 2), Some(1));
        assert_eq!(tag_at(&timeline, 12, 2), Some(2));
        assert_eq!(tag_at(&timeline, 15, 2), Some(0));
        assert_eq!(tag_at(&timeline, 30, 2), Some(0));

        // as of tx 1 the tombstone is not yet visible
        assert_eq!(tag_at(&timeline, 17, 1), Some(2));
        assert_eq!(tag_at(&timeline, 25, 1), Some(1));
        assert_eq!(tag_at(&timeline, -1, 2), None);
    }

    #[test]
    fn versions_stay_sorted_by_valid_time_then_tx() {
        let timeline = build(&[
            version(0, 10, None, 1),
            version(1, 0, None, 2),
            version(2, 10, None, 3),
        ]);
        let keys: Vec<(i64, u64)> = timeline
            .versions()
            .map(|v| (v.valid_from.as_millis(), v.tx_id.as_u64()))
            .collect();
        assert_eq!(keys, vec![(0, 1), (10, 0), (10, 2)]);
        assert_eq!(timeline.latest_tx(), Some(TxId::new(2)));
    }

    #[test]
    fn as_of_drops_later_transactions() {
        let timeline = build(&[version(3, 0, None, 1), version(7, 5, None, 2)]);
        assert!(timeline.as_of(TxId::new(2)).is_none());
        let old = timeline.as_of(TxId::new(6)).unwrap();
        assert_eq!(old.versions().count(), 1);
        assert_eq!(tag_at(&old, 10, u64::MAX), Some(1));
    }

    #[test]
    fn bounded_corrections_leave_the_rest_visible() {
        let timeline = build(&[version(0, 10, None, 1), version(1, 0, Some(20), 2)]);
        let pieces = |bound: u64, from: Option<i64>, reverse: bool| -> Vec<(i64, Option<i64>, u64)> {
            timeline
                .segments(TxId::new(bound), from.map(ts), reverse)
                .map(|s| {
                    (
                        s.valid_from.as_millis(),
                        s.valid_to.map(Timestamp::as_millis),
                        s.version.tx_id.as_u64(),
                    )
                })
                .collect()
        };
        assert_eq!(pieces(0, None, false), vec![(10, None, 0)]);
        assert_eq!(pieces(1, None, false), vec![(0, Some(20), 1), (20, None, 0)]);
        assert_eq!(pieces(1, Some(15), true), vec![(0, Some(20), 1)]);
        assert_eq!(pieces(1, Some(5), false), vec![(20, None, 0)]);

        let split = build(&[version(0, 0, None, 1), version(1, 10, Some(20), 2)]);
        let starts: Vec<(i64, u64)> = split
            .segments(TxId::new(1), None, true)
            .map(|s| (s.valid_from.as_millis(), s.version.tx_id.as_u64()))
            .collect();
        assert_eq!(starts, vec![(20, 0), (10, 1), (0, 0)]);
    }

    #[test]
    fn long_histories_build_and_resolve() {
        let revisions = 20_000u64;
        let mut timeline: Option<EntityTimeline> = None;
        for tx in 0..revisions {
            let (next, _) = EntityTimeline::with_transaction(
                timeline.as_ref(),
                EntityId::from("e"),
                TxId::new(tx),
                vec![version(tx, tx as i64, None, (tx % 3 + 1) as u8)],
            );
            timeline = Some(next);
        }
        let timeline = timeline.unwrap();

        for (vt, bound) in [(0, 19_999), (7_000, 3_000), (3_000, 7_000), (19_999, 19_999)] {
            let winner = vt.min(bound);
            assert_eq!(tag_at(&timeline, vt as i64, bound), Some((winner % 3 + 1) as u8));
        }
        assert_eq!(timeline.as_of(TxId::new(4_999)).unwrap().versions().count(), 5_000);
        assert_eq!(timeline.versions().count(), revisions as usize);
    }

    fn oracle(versions: &[EntityVersion], vt: i64, bound: u64) -> Option<u8> {
        versions
            .iter()
            .filter(|v| v.tx_id.as_u64() <= bound && v.covers(ts(vt)))
            .max_by_key(|v| v.tx_id)
            .map(|v| v.content_hash().map_or(0, |h| h.as_bytes()[0]))
    }

    proptest! {
        #[test]
        fn resolution_matches_brute_force(
            spans in prop::collection::vec((0i64..50, prop::option::of(1i64..30), 0u8..4), 1..12),
            points in prop::collection::vec((-5i64..90, 0u64..14), 1..40),
        ) {
            let versions: Vec<EntityVersion> = spans
                .iter()
                .enumerate()
                .map(|(tx, &(from, len, tag))| version(tx as u64, from, len.map(|l| from + l), tag))
                .collect();
            let timeline = build(&versions);
            for (vt, bound) in points {
                prop_assert_eq!(tag_at(&timeline, vt, bound), oracle(&versions, vt, bound));
            }
        }
    }
}
