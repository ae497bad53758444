//! Core type definitions for ChronoDB.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of a transaction in the log.
///
/// Ids start at 0 and are gapless: the n-th submitted transaction has id
/// n - 1, whether or not it later commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub u64);

impl TxId {
    /// The first transaction id.
    pub const FIRST: Self = Self(0);

    /// Creates a transaction id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Milliseconds since the Unix epoch.
///
/// Used for both valid time and transaction time. Open bounds are expressed
/// as `Option<Timestamp>`, never as a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The epoch.
    pub const EPOCH: Self = Self(0);

    /// Creates a timestamp from epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Current wall-clock time. Clocks set before 1970 read as the epoch.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Self(millis)
    }

    /// Adds a duration, saturating at the representable range.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Subtracts a duration, saturating at the representable range.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// The next representable instant.
    #[must_use]
    pub const fn succ(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

/// A point on the transaction-time axis: a transaction id with the time it
/// was recorded.
///
/// Returned by submission and by every await; it means "no earlier than
/// this point".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitemporalInstant {
    /// Transaction id.
    pub tx_id: TxId,
    /// Transaction time.
    pub tx_time: Timestamp,
}

impl BitemporalInstant {
    /// Creates an instant.
    #[must_use]
    pub const fn new(tx_id: TxId, tx_time: Timestamp) -> Self {
        Self { tx_id, tx_time }
    }
}

impl fmt::Display for BitemporalInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.tx_id, self.tx_time)
    }
}

/// What a caller waits for, or asked to read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitTarget {
    /// A transaction id must be indexed.
    Tx(TxId),
    /// Some transaction at or after this time must be indexed.
    TxTime(Timestamp),
}

impl AwaitTarget {
    /// Returns `true` if `indexed` satisfies the target.
    #[must_use]
    pub fn is_reached_by(self, indexed: Option<BitemporalInstant>) -> bool {
        match (self, indexed) {
            (_, None) => false,
            (Self::Tx(id), Some(at)) => at.tx_id >= id,
            (Self::TxTime(time), Some(at)) => at.tx_time >= time,
        }
    }
}

impl fmt::Display for AwaitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx(id) => write!(f, "{id}"),
            Self::TxTime(time) => write!(f, "tx time {time}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_ids_are_ordered_and_displayed() {
        assert!(TxId::FIRST < TxId::new(1));
        assert_eq!(TxId::new(4).next(), TxId::new(5));
        assert_eq!(TxId::new(42).to_string(), "tx:42");
    }

    #[test]
    fn timestamp_arithmetic_saturates() {
        let t = Timestamp::from_millis(i64::MAX - 1);
        assert_eq!(t.saturating_add(Duration::from_secs(1)).as_millis(), i64::MAX);
        assert_eq!(Timestamp::from_millis(10).succ(), Timestamp::from_millis(11));
        assert_eq!(
            Timestamp::from_millis(10).saturating_sub(Duration::from_millis(4)),
            Timestamp::from_millis(6)
        );
        assert!(Timestamp::now() > Timestamp::EPOCH);
    }

    #[test]
    fn await_targets() {
        let at = Some(BitemporalInstant::new(TxId::new(3), Timestamp::from_millis(100)));
        assert!(AwaitTarget::Tx(TxId::new(3)).is_reached_by(at));
        assert!(!AwaitTarget::Tx(TxId::new(4)).is_reached_by(at));
        assert!(AwaitTarget::TxTime(Timestamp::from_millis(100)).is_reached_by(at));
        assert!(!AwaitTarget::TxTime(Timestamp::from_millis(101)).is_reached_by(at));
        assert!(!AwaitTarget::Tx(TxId::FIRST).is_reached_by(None));
    }
}
