//! Transaction record framing.
//!
//! ```text
//! | magic "CTXL" (4) | version u16 | tx_id u64 | tx_time i64 | len u32 | header crc32 u32 | payload (len) | crc32 u32 |
//! ```
//!
//! All integers are little endian. The header CRC covers the 26 bytes
//! before it; the trailing CRC covers everything before it. A header that
//! checks out can be trusted for its length, so recovery can tell a record
//! cut short by a crash from a damaged one.

use crate::error::{CoreError, CoreResult};
use crate::operation::TxOperation;
use crate::types::{BitemporalInstant, Timestamp, TxId};

/// Magic bytes opening every record.
pub const LOG_MAGIC: [u8; 4] = *b"CTXL";

/// Current record format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + tx id (8) + tx time (8) + length (4)
const HEADER_FIELDS: usize = 26;

/// Header fields plus their CRC.
pub(crate) const HEADER_SIZE: usize = HEADER_FIELDS + 4;

pub(crate) const CRC_SIZE: usize = 4;

/// A transaction as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction id.
    pub tx_id: TxId,
    /// Transaction time.
    pub tx_time: Timestamp,
    /// Operations, unless the reader asked to skip them.
    pub operations: Option<Vec<TxOperation>>,
}

impl TransactionRecord {
    /// The record's position on the transaction-time axis.
    #[must_use]
    pub fn instant(&self) -> BitemporalInstant {
        BitemporalInstant::new(self.tx_id, self.tx_time)
    }
}

/// Parsed fixed-size header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub tx_id: TxId,
    pub tx_time: Timestamp,
    pub payload_len: usize,
}

impl RecordHeader {
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len + CRC_SIZE
    }

    pub fn parse(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CoreError::log_corruption("short record header"));
        }
        if bytes[0..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption("bad record magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported record version {version}"
            )));
        }
        let tx_id = u64::from_le_bytes(array(&bytes[6..14]));
        let tx_time = i64::from_le_bytes(array(&bytes[14..22]));
        let stored = u32::from_le_bytes(array(&bytes[HEADER_FIELDS..HEADER_SIZE]));
        let actual = crc32fast::hash(&bytes[..HEADER_FIELDS]);
        if stored != actual {
            return Err(CoreError::log_corruption(format!(
                "header checksum mismatch: expected {stored:08x}, got {actual:08x}"
            )));
        }
        let payload_len = u32::from_le_bytes(array(&bytes[22..26])) as usize;
        Ok(Self {
            tx_id: TxId::new(tx_id),
            tx_time: Timestamp::from_millis(tx_time),
            payload_len,
        })
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Builds a complete frame.
pub(crate) fn encode_frame(tx: BitemporalInstant, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("transaction payload larger than 4 GiB"))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
    frame.extend_from_slice(&tx.tx_id.as_u64().to_le_bytes());
    frame.extend_from_slice(&tx.tx_time.as_millis().to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    let header_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&header_crc.to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Checks the CRC of a complete frame and returns its payload.
pub(crate) fn verify_frame<'a>(header: &RecordHeader, frame: &'a [u8]) -> CoreResult<&'a [u8]> {
    let (body, stored) = frame.split_at(frame.len() - CRC_SIZE);
    let expected = u32::from_le_bytes(array(stored));
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CoreError::log_corruption(format!(
            "checksum mismatch in {}: expected {expected:08x}, got {actual:08x}",
            header.tx_id
        )));
    }
    Ok(&body[HEADER_SIZE..])
}

/// Decodes a verified frame into a record.
pub(crate) fn decode_record(
    header: &RecordHeader,
    frame: &[u8],
    include_operations: bool,
) -> CoreResult<TransactionRecord> {
    let payload = verify_frame(header, frame)?;
    let operations = if include_operations {
        Some(TxOperation::decode_all(payload)?)
    } else {
        None
    };
    Ok(TransactionRecord {
        tx_id: header.tx_id,
        tx_time: header.tx_time,
        operations,
    })
}
