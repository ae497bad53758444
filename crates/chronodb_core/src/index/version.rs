//! Entity versions.

use crate::document::ContentHash;
use crate::entity::EntityId;
use crate::types::{Timestamp, TxId};

/// What a version holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionContent {
    /// A document body, by hash.
    Document(ContentHash),
    /// The entity is deleted over the version's range.
    Tombstone,
}

/// One put or delete of an entity, valid over `[valid_from, valid_to)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityVersion {
    /// Owning entity.
    pub entity_id: EntityId,
    /// Start of validity, inclusive.
    pub valid_from: Timestamp,
    /// End of validity, exclusive; `None` is the end of time.
    pub valid_to: Option<Timestamp>,
    /// Writing transaction.
    pub tx_id: TxId,
    /// Time of the writing transaction.
    pub tx_time: Timestamp,
    /// Document or tombstone.
    pub content: VersionContent,
}

impl EntityVersion {
    /// Returns `true` if the version is valid at `valid_time`.
    #[must_use]
    pub fn covers(&self, valid_time: Timestamp) -> bool {
        self.valid_from <= valid_time && ends_after(self.valid_to, valid_time)
    }

    /// Returns `true` if the version's range intersects `[from, to)`.
    #[must_use]
    pub fn overlaps(&self, from: Timestamp, to: Option<Timestamp>) -> bool {
        ends_after(self.valid_to, from) && ends_after(to, self.valid_from)
    }

    /// Returns `true` if `later` corrects this version: it was written by a
    /// later transaction and their valid ranges intersect.
    #[must_use]
    pub fn is_corrected_by(&self, later: &EntityVersion) -> bool {
        later.tx_id > self.tx_id && self.overlaps(later.valid_from, later.valid_to)
    }

    /// The document hash; `None` for a tombstone.
    #[must_use]
    pub fn content_hash(&self) -> Option<ContentHash> {
        match self.content {
            VersionContent::Document(hash) => Some(hash),
            VersionContent::Tombstone => None,
        }
    }

    /// Returns `true` for a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.content == VersionContent::Tombstone
    }

    /// The parts of this version left after removing `[from, to)`.
    pub(crate) fn without(&self, from: Timestamp, to: Option<Timestamp>) -> Vec<EntityVersion> {
        if !self.overlaps(from, to) {
            return vec![self.clone()];
        }
        let mut parts = Vec::with_capacity(2);
        if self.valid_from < from {
            parts.push(EntityVersion {
                valid_to: Some(from),
                ..self.clone()
            });
        }
        if let Some(to) = to {
            if ends_after(self.valid_to, to) {
                parts.push(EntityVersion {
                    valid_from: to,
                    ..self.clone()
                });
            }
        }
        parts
    }
}

/// `true` if a range ending at `end` extends past `instant`.
pub(crate) fn ends_after(end: Option<Timestamp>, instant: Timestamp) -> bool {
    end.map_or(true, |end| instant < end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn version(from: i64, to: Option<i64>, tx: u64) -> EntityVersion {
        EntityVersion {
            entity_id: EntityId::from("e"),
            valid_from: ts(from),
            valid_to: to.map(ts),
            tx_id: TxId::new(tx),
            tx_time: ts(tx as i64),
            content: VersionContent::Tombstone,
        }
    }

    #[test]
    fn coverage_is_half_open() {
        let v = version(10, Some(20), 0);
        assert!(!v.covers(ts(9)));
        assert!(v.covers(ts(10)));
        assert!(v.covers(ts(19)));
        assert!(!v.covers(ts(20)));
        assert!(version(10, None, 0).covers(ts(i64::MAX)));
    }

    #[test]
    fn correction_needs_a_later_tx_and_an_overlap() {
        let base = version(10, Some(20), 1);
        assert!(base.is_corrected_by(&version(15, None, 2)));
        assert!(base.is_corrected_by(&version(0, Some(11), 2)));
        assert!(!base.is_corrected_by(&version(20, None, 2)));
        assert!(!base.is_corrected_by(&version(0, Some(10), 2)));
        assert!(!base.is_corrected_by(&version(12, Some(13), 1)));
        assert!(!base.is_corrected_by(&version(12, Some(13), 0)));
    }

    #[test]
    fn removing_a_range_leaves_the_outside_parts() {
        let v = version(0, None, 0);
        let parts = v.without(ts(10), Some(ts(20)));
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].valid_from, parts[0].valid_to), (ts(0), Some(ts(10))));
        assert_eq!((parts[1].valid_from, parts[1].valid_to), (ts(20), None));

        assert!(v.without(ts(0), None).is_empty());
        assert_eq!(version(30, Some(40), 0).without(ts(10), Some(ts(20))).len(), 1);
    }
}
