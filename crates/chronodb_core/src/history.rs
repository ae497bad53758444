//! Entity history.
//!
//! Without corrections, history describes what the entity resolves to: one
//! entry per stretch of valid time with a single winning version, so a
//! version that a bounded correction splits appears once per piece. With
//! corrections, every version appears once at its `valid_from`, and entries
//! sharing a valid time are listed oldest transaction first in either sort
//! order.

use crate::document::{ContentHash, Document};
use crate::entity::EntityId;
use crate::error::CoreResult;
use crate::index::{EntityTimeline, EntityVersion};
use crate::speculative::DocumentResolver;
use crate::types::{Timestamp, TxId};
use std::iter::Peekable;
use std::sync::Arc;
use std::time::Duration;
/// Order of history entries by valid time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest valid time first.
    Asc,
    /// Newest valid time first.
    #[default]
    Desc,
}

/// Filters and shape of a history read.
///
/// Every `start` bound is inclusive and every `end` bound exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Entry order.
    pub sort_order: SortOrder,
    /// Attach document bodies.
    pub with_docs: bool,
    /// Include versions later transactions corrected.
    pub with_corrections: bool,
    /// Earliest valid time.
    pub start_valid_time: Option<Timestamp>,
    /// Valid time upper bound.
    pub end_valid_time: Option<Timestamp>,
    /// Earliest transaction time.
    pub start_tx_time: Option<Timestamp>,
    /// Transaction time upper bound.
    pub end_tx_time: Option<Timestamp>,
}

impl HistoryOptions {
    /// Descending history without documents or corrections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the order.
    #[must_use]
    pub fn sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    /// Ascending order.
    #[must_use]
    pub fn ascending(self) -> Self {
        self.sort_order(SortOrder::Asc)
    }

    /// Attaches document bodies.
    #[must_use]
    pub fn with_docs(mut self, value: bool) -> Self {
        self.with_docs = value;
        self
    }

    /// Includes corrected versions.
    #[must_use]
    pub fn with_corrections(mut self, value: bool) -> Self {
        self.with_corrections = value;
        self
    }

    /// Restricts valid time to `[start, end)`; either side may be open.
    #[must_use]
    pub fn valid_time_range(mut self, start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        self.start_valid_time = start;
        self.end_valid_time = end;
        self
    }

    /// Restricts transaction time to `[start, end)`; either side may be
    /// open.
    #[must_use]
    pub fn tx_time_range(mut self, start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        self.start_tx_time = start;
        self.end_tx_time = end;
        self
    }
}

/// One entry in an entity's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// The entity.
    pub entity_id: EntityId,
    /// Start of the entry's validity.
    pub valid_time: Timestamp,
    /// End of the entry's validity, exclusive; `None` is the end of time.
    pub valid_to: Option<Timestamp>,
    /// Time of the writing transaction.
    pub tx_time: Timestamp,
    /// Writing transaction.
    pub tx_id: TxId,
    /// Document hash; `None` for a delete.
    pub content_hash: Option<ContentHash>,
    /// Document body, when requested and still held.
    pub document: Option<Document>,
}

/// `(valid_from, valid_to, version)` of one entry.
type Piece = (Timestamp, Option<Timestamp>, Arc<EntityVersion>);
type Pieces = Peekable<Box<dyn Iterator<Item = Piece> + Send>>;

/// Lazily walks an entity's history.
///
/// Holds the timeline view it was opened on. Document bodies are fetched
/// one entry at a time.
pub struct HistoryCursor {
    entity_id: Option<EntityId>,
    pieces: Option<Pieces>,
    /// Rest of a valid-time group, oldest transaction last.
    group: Vec<Piece>,
    options: HistoryOptions,
    documents: DocumentResolver,
}

impl HistoryCursor {
    pub(crate) fn new(
        visible: Option<(Arc<EntityTimeline>, TxId)>,
        ceiling: Timestamp,
        options: HistoryOptions,
        documents: DocumentResolver,
    ) -> Self {
        let entity_id = visible.as_ref().map(|(t, _)| t.entity_id().clone());
        let pieces = visible.map(|(timeline, bound)| walk(&timeline, bound, ceiling, &options));
        Self {
            entity_id,
            pieces,
            group: Vec::new(),
            options,
            documents,
        }
    }

    /// Stops the walk and releases the timeline.
    pub fn close(self) {}

    fn next_piece(&mut self) -> Option<Piece> {
        let pieces = self.pieces.as_mut()?;
        let Some(first) = pieces.next() else {
            self.pieces = None;
            return None;
        };
        if !self.options.with_corrections || self.options.sort_order == SortOrder::Asc {
            return Some(first);
        }

        // the reverse walk yields a group newest transaction first
        let valid_time = first.0;
        let mut group = vec![first];
        while let Some(piece) = pieces.next_if(|p| p.0 == valid_time) {
            group.push(piece);
        }
        let oldest = group.pop();
        self.group = group;
        oldest
    }

    fn entry(&self, (valid_time, valid_to, version): Piece) -> CoreResult<HistoryEntry> {
        let content_hash = version.content_hash();
        let document = match (self.options.with_docs, content_hash) {
            (true, Some(hash)) => self.documents.get(&hash)?,
            _ => None,
        };
        Ok(HistoryEntry {
            entity_id: version.entity_id.clone(),
            valid_time,
            valid_to,
            tx_time: version.tx_time,
            tx_id: version.tx_id,
            content_hash,
            document,
        })
    }
}

/// The pieces of `timeline` visible at `bound` that start in the options'
/// valid time range and not after `ceiling`, in the requested order.
fn walk(timeline: &EntityTimeline, bound: TxId, ceiling: Timestamp, options: &HistoryOptions) -> Pieces {
    let reverse = options.sort_order == SortOrder::Desc;
    let lower = options.start_valid_time;
    let upper = options
        .end_valid_time
        .map_or(ceiling, |end| ceiling.min(end.saturating_sub(Duration::from_millis(1))));

    let source: Box<dyn Iterator<Item = Piece> + Send> = if options.with_corrections {
        let seek = if reverse {
            Some((upper, TxId::new(u64::MAX)))
        } else {
            lower.map(|lower| (lower, TxId::FIRST))
        };
        Box::new(
            timeline
                .versions_as_of(bound, seek, reverse)
                .map(|v| (v.valid_from, v.valid_to, v)),
        )
    } else {
        let seek = if reverse { Some(upper) } else { lower };
        Box::new(
            timeline
                .segments(bound, seek, reverse)
                .map(|s| (s.valid_from, s.valid_to, s.version)),
        )
    };

    let (start_tx, end_tx) = (options.start_tx_time, options.end_tx_time);
    let pieces: Box<dyn Iterator<Item = Piece> + Send> = Box::new(
        source
            .take_while(move |(from, _, _)| lower.map_or(true, |l| *from >= l) && *from <= upper)
            .filter(move |(_, _, v)| {
                start_tx.map_or(true, |s| v.tx_time >= s) && end_tx.map_or(true, |e| v.tx_time < e)
            }),
    );
    pieces.peekable()
}

impl Iterator for HistoryCursor {
    type Item = CoreResult<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let piece = match self.group.pop() {
            Some(piece) => piece,
            None => self.next_piece()?,
        };
        Some(self.entry(piece))
    }
}

impl std::fmt::Debug for HistoryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCursor")
            .field("entity", &self.entity_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentStore;
    use crate::index::VersionContent;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    /// (tx, valid_from, valid_to, tombstone)
    fn timeline(txs: &[(u64, i64, Option<i64>, bool)]) -> Arc<EntityTimeline> {
        let mut current: Option<EntityTimeline> = None;
        for &(tx, from, to, tombstone) in txs {
            let version = EntityVersion {
                entity_id: EntityId::from("e"),
                valid_from: ts(from),
                valid_to: to.map(ts),
                tx_id: TxId::new(tx),
                tx_time: ts(1_000 + tx as i64),
                content: if tombstone {
                    VersionContent::Tombstone
                } else {
                    VersionContent::Document(ContentHash::from_bytes([tx as u8; 32]))
                },
            };
            let (next, _) = EntityTimeline::with_transaction(
                current.as_ref(),
                EntityId::from("e"),
                TxId::new(tx),
                vec![version],
            );
            current = Some(next);
        }
        Arc::new(current.unwrap())
    }

    fn walk(
        timeline: &Arc<EntityTimeline>,
        bound: u64,
        ceiling: i64,
        options: HistoryOptions,
    ) -> Vec<(i64, u64)> {
        let resolver = DocumentResolver {
            store: Arc::new(InMemoryDocumentStore::new()),
            layer: None,
        };
        HistoryCursor::new(
            Some((Arc::clone(timeline), TxId::new(bound))),
            ts(ceiling),
            options,
            resolver,
        )
        .map(|e| {
            let e = e.unwrap();
            (e.valid_time.as_millis(), e.tx_id.as_u64())
        })
        .collect()
    }

    #[test]
    fn put_then_delete_lists_newest_first() {
        let t = timeline(&[(0, 10, None, false), (1, 20, None, true)]);
        assert_eq!(walk(&t, 1, 100, HistoryOptions::new()), vec![(20, 1), (10, 0)]);
        assert_eq!(
            walk(&t, 1, 100, HistoryOptions::new().ascending()),
            vec![(10, 0), (20, 1)]
        );
    }

    #[test]
    fn corrections_are_hidden_unless_asked_for() {
        let t = timeline(&[
            (0, 10, None, false),
            (1, 20, None, false),
            (2, 10, None, false),
            (3, 20, Some(30), false),
        ]);
        // tx 3 splits tx 2's range, so tx 2 is listed again from 30
        assert_eq!(
            walk(&t, 3, 100, HistoryOptions::new()),
            vec![(30, 2), (20, 3), (10, 2)]
        );
        assert_eq!(
            walk(&t, 3, 100, HistoryOptions::new().with_corrections(true)),
            vec![(20, 1), (20, 3), (10, 0), (10, 2)]
        );
        assert_eq!(
            walk(&t, 3, 100, HistoryOptions::new().with_corrections(true).ascending()),
            vec![(10, 0), (10, 2), (20, 1), (20, 3)]
        );
    }

    #[test]
    fn versions_visible_again_after_a_correction_are_listed() {
        let t = timeline(&[(0, 10, None, false), (1, 0, Some(20), false)]);
        assert_eq!(walk(&t, 1, 100, HistoryOptions::new()), vec![(20, 0), (0, 1)]);
        assert_eq!(walk(&t, 0, 100, HistoryOptions::new()), vec![(10, 0)]);

        let resolver = DocumentResolver {
            store: Arc::new(InMemoryDocumentStore::new()),
            layer: None,
        };
        let entries: Vec<HistoryEntry> = HistoryCursor::new(
            Some((Arc::clone(&t), TxId::new(1))),
            ts(100),
            HistoryOptions::new().ascending(),
            resolver,
        )
        .collect::<CoreResult<_>>()
        .unwrap();
        assert_eq!(entries[0].valid_to, Some(ts(20)));
        assert_eq!(entries[1].valid_to, None);
        assert_eq!(entries[1].content_hash, Some(ContentHash::from_bytes([0; 32])));
    }

    #[test]
    fn bounds_cap_what_is_listed() {
        let t = timeline(&[(0, 10, None, false), (1, 20, None, false), (2, 10, None, false)]);
        // the tx bound hides tx 2, so tx 0 wins again at 10
        assert_eq!(walk(&t, 1, 100, HistoryOptions::new()), vec![(20, 1), (10, 0)]);
        // the snapshot valid time hides the entry at 20
        assert_eq!(walk(&t, 2, 15, HistoryOptions::new()), vec![(10, 2)]);

        let ranged = HistoryOptions::new()
            .with_corrections(true)
            .valid_time_range(Some(ts(10)), Some(ts(20)))
            .tx_time_range(Some(ts(1_001)), None);
        assert_eq!(walk(&t, 2, 100, ranged), vec![(10, 2)]);
    }

    #[test]
    fn absent_entities_have_empty_history() {
        let resolver = DocumentResolver {
            store: Arc::new(InMemoryDocumentStore::new()),
            layer: None,
        };
        let mut cursor = HistoryCursor::new(None, ts(0), HistoryOptions::new(), resolver);
        assert!(cursor.next().is_none());
    }
}
