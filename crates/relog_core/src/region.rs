//! Region packing and unpacking.
//!
//! A region is the byte image of one window's contiguous records, the unit
//! handed to the append device.
//!
//! ## Region Format
//!
//! ```text
//! | version (2) | checksum A (8) | checksum B (8) | format tag (2) |   header
//! | record tag (2) | lsn (8) | marker (8) | length (8) | payload |   x N
//! ```
//!
//! All integers are big-endian. Checksum B duplicates checksum A. The region
//! format tag names the checksum (Adler-32 over the concatenated payloads, or
//! none). In the current format the record marker is the record's lowest live
//! LSN; in the legacy format it is the previous LSN.
//!
//! Every malformation is an integrity failure: recovery never guesses.

use crate::checksum::Adler32;
use crate::config::{ChecksumKind, FormatPolicy};
use crate::error::{CoreError, CoreResult};
use crate::record::LogRecord;
use crate::types::Lsn;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Current region format version.
pub const REGION_VERSION: u16 = 2;

/// Legacy region format version (read-only).
pub const LEGACY_REGION_VERSION: u16 = 1;

/// Region format tag for Adler-32 checksummed regions ("AD").
pub const FORMAT_ADLER32: u16 = 0x4144;

/// Region format tag for unchecksummed regions ("NO").
pub const FORMAT_NONE: u16 = 0x4E4F;

/// Record tag in the current format ("LR").
pub const RECORD_TAG: u16 = 0x4C52;

/// Record tag in the legacy format ("L1").
pub const LEGACY_RECORD_TAG: u16 = 0x4C31;

/// version (2) + checksum A (8) + checksum B (8) + format tag (2)
pub const REGION_HEADER_SIZE: usize = 20;

/// tag (2) + lsn (8) + marker (8) + length (8)
pub const RECORD_HEADER_SIZE: usize = 26;

/// On-disk region format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionFormat {
    /// Version 2: the record marker holds the lowest live LSN.
    Current,
    /// Version 1: the record marker holds the previous LSN.
    Legacy,
}

impl RegionFormat {
    const fn version(self) -> u16 {
        match self {
            Self::Current => REGION_VERSION,
            Self::Legacy => LEGACY_REGION_VERSION,
        }
    }

    const fn record_tag(self) -> u16 {
        match self {
            Self::Current => RECORD_TAG,
            Self::Legacy => LEGACY_RECORD_TAG,
        }
    }
}

/// Packs records into a current-format region.
///
/// Records must be non-empty, sorted and contiguous; the daemon guarantees
/// this by construction.
#[must_use]
pub fn pack(records: &[LogRecord], checksum: ChecksumKind) -> Bytes {
    pack_as(records, checksum, RegionFormat::Current)
}

/// Packs records in an explicit format.
///
/// The engine only writes [`RegionFormat::Current`]; the legacy format is
/// available for migration tooling and compatibility tests.
#[must_use]
pub fn pack_as(records: &[LogRecord], checksum: ChecksumKind, format: RegionFormat) -> Bytes {
    let body: usize = records.iter().map(LogRecord::encoded_len).sum();
    let mut buf = BytesMut::with_capacity(REGION_HEADER_SIZE + body);

    let mut adler = Adler32::new();
    for record in records {
        adler.update(record.payload());
    }
    let (word, tag) = match checksum {
        ChecksumKind::Adler32 => (u64::from(adler.finish()), FORMAT_ADLER32),
        ChecksumKind::None => (0, FORMAT_NONE),
    };

    buf.put_u16(format.version());
    buf.put_u64(word);
    buf.put_u64(word);
    buf.put_u16(tag);

    for record in records {
        let marker = match format {
            RegionFormat::Current => record.lowest_lsn(),
            RegionFormat::Legacy => record.previous_lsn(),
        };
        buf.put_u16(format.record_tag());
        buf.put_u64(record.lsn().as_u64());
        buf.put_u64(marker.as_u64());
        buf.put_u64(record.payload().len() as u64);
        buf.put_slice(record.payload());
    }

    buf.freeze()
}

/// Unpacks the region the device stored at `lsn`.
///
/// Returns the records in ascending LSN order.
///
/// # Errors
///
/// Returns [`CoreError::Integrity`] for any structural problem and
/// [`CoreError::ChecksumMismatch`] if the payloads do not match the header.
pub fn unpack(lsn: Lsn, region: Bytes, policy: FormatPolicy) -> CoreResult<Vec<LogRecord>> {
    if region.len() < REGION_HEADER_SIZE {
        return Err(CoreError::integrity(
            lsn,
            format!("region of {} bytes has no header", region.len()),
        ));
    }

    let mut buf = region;
    let version = buf.get_u16();
    let format = match (policy, version) {
        (FormatPolicy::Legacy | FormatPolicy::Auto, LEGACY_REGION_VERSION) => RegionFormat::Legacy,
        (FormatPolicy::Auto | FormatPolicy::Current, REGION_VERSION) => RegionFormat::Current,
        (_, other) => {
            return Err(CoreError::integrity(
                lsn,
                format!("region version {other} not accepted under {policy:?} policy"),
            ))
        }
    };

    let word_a = buf.get_u64();
    let word_b = buf.get_u64();
    if word_a != word_b {
        return Err(CoreError::integrity(
            lsn,
            format!("checksum words disagree: {word_a:#x} vs {word_b:#x}"),
        ));
    }
    let checksum = match buf.get_u16() {
        FORMAT_ADLER32 => ChecksumKind::Adler32,
        FORMAT_NONE => ChecksumKind::None,
        other => {
            return Err(CoreError::integrity(
                lsn,
                format!("unknown region format tag {other:#06x}"),
            ))
        }
    };

    let mut records = Vec::new();
    let mut adler = Adler32::new();
    while buf.has_remaining() {
        if buf.remaining() < RECORD_HEADER_SIZE {
            return Err(CoreError::integrity(
                lsn,
                format!("truncated record header: {} bytes left", buf.remaining()),
            ));
        }
        let tag = buf.get_u16();
        if tag != format.record_tag() {
            return Err(CoreError::integrity(
                lsn,
                format!("unexpected record tag {tag:#06x} in {format:?} region"),
            ));
        }
        let record_lsn = Lsn::new(buf.get_u64());
        let marker = Lsn::new(buf.get_u64());
        let len = usize::try_from(buf.get_u64())
            .ok()
            .filter(|&len| len <= buf.remaining())
            .ok_or_else(|| {
                CoreError::integrity(lsn, format!("payload of {record_lsn} overruns region"))
            })?;

        if let Some(previous) = records.last().map(LogRecord::lsn) {
            if record_lsn != previous.next() {
                return Err(CoreError::integrity(
                    lsn,
                    format!("record {record_lsn} does not follow {previous}"),
                ));
            }
        }

        let payload = buf.split_to(len);
        adler.update(&payload);
        let lowest = match format {
            RegionFormat::Current => marker,
            RegionFormat::Legacy => Lsn::FIRST,
        };
        records.push(LogRecord::new(record_lsn, lowest, payload));
    }

    match records.last() {
        None => return Err(CoreError::integrity(lsn, "region holds no records")),
        Some(last) if last.lsn() != lsn => {
            return Err(CoreError::integrity(
                lsn,
                format!("region ends at {} but was written at {lsn}", last.lsn()),
            ))
        }
        Some(_) => {}
    }

    if checksum == ChecksumKind::Adler32 {
        let actual = adler.finish();
        if word_a != u64::from(actual) {
            return Err(CoreError::ChecksumMismatch {
                lsn,
                expected: word_a as u32,
                actual,
            });
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn records(first: u64, payloads: &[&[u8]]) -> Vec<LogRecord> {
        payloads
            .iter()
            .enumerate()
            .map(|(i, p)| {
                LogRecord::new(
                    Lsn::new(first + i as u64),
                    Lsn::FIRST,
                    Bytes::copy_from_slice(p),
                )
            })
            .collect()
    }

    #[test]
    fn header_layout() {
        let region = pack(&records(100, &[b"ab"]), ChecksumKind::Adler32);
        assert_eq!(region.len(), REGION_HEADER_SIZE + RECORD_HEADER_SIZE + 2);
        assert_eq!(&region[0..2], &REGION_VERSION.to_be_bytes());
        assert_eq!(region[2..10], region[10..18]);
        assert_eq!(&region[18..20], b"AD");
        assert_eq!(&region[20..22], b"LR");
    }

    #[test]
    fn checksum_covers_payloads_only() {
        let region = pack(&records(100, &[b"Wiki", b"pedia"]), ChecksumKind::Adler32);
        let word = u64::from_be_bytes(region[2..10].try_into().unwrap());
        assert_eq!(word, 0x11E6_0398);
    }

    #[test]
    fn unpack_detects_flipped_payload_byte() {
        let region = pack(&records(100, &[b"hello", b"world"]), ChecksumKind::Adler32);
        let mut bytes = region.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let result = unpack(Lsn::new(101), Bytes::from(bytes), FormatPolicy::Auto);
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn unchecksummed_region_skips_verification() {
        let region = pack(&records(100, &[b"hello"]), ChecksumKind::None);
        assert_eq!(&region[18..20], b"NO");
        let mut bytes = region.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let unpacked = unpack(Lsn::new(100), Bytes::from(bytes), FormatPolicy::Auto).unwrap();
        assert_eq!(unpacked[0].payload().as_ref(), b"helln");
    }

    #[test]
    fn disagreeing_checksum_words_are_rejected() {
        let mut bytes = pack(&records(100, &[b"x"]), ChecksumKind::Adler32).to_vec();
        bytes[17] ^= 0xFF;
        let result = unpack(Lsn::new(100), Bytes::from(bytes), FormatPolicy::Auto);
        assert!(matches!(result, Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn truncated_region_is_rejected() {
        let mut bytes = pack(&records(100, &[b"hello"]), ChecksumKind::Adler32).to_vec();
        bytes.truncate(bytes.len() - 2);
        let result = unpack(Lsn::new(100), Bytes::from(bytes), FormatPolicy::Auto);
        assert!(matches!(result, Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn region_must_end_at_written_lsn() {
        let region = pack(&records(100, &[b"a", b"b"]), ChecksumKind::Adler32);
        let result = unpack(Lsn::new(105), region, FormatPolicy::Auto);
        assert!(matches!(result, Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn empty_region_is_rejected() {
        let region = pack(&[], ChecksumKind::Adler32);
        let result = unpack(Lsn::new(100), region, FormatPolicy::Auto);
        assert!(matches!(result, Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn legacy_region_is_auto_detected() {
        let input = records(200, &[b"old", b"data"]);
        let region = pack_as(&input, ChecksumKind::Adler32, RegionFormat::Legacy);
        assert_eq!(&region[0..2], &LEGACY_REGION_VERSION.to_be_bytes());

        let unpacked = unpack(Lsn::new(201), region, FormatPolicy::Auto).unwrap();
        assert_eq!(unpacked.len(), 2);
        assert_eq!(unpacked[1].lsn(), Lsn::new(201));
        assert_eq!(unpacked[1].previous_lsn(), Lsn::new(200));
        assert_eq!(unpacked[1].lowest_lsn(), Lsn::FIRST);
    }

    #[test]
    fn current_policy_rejects_legacy_region() {
        let region = pack_as(&records(200, &[b"old"]), ChecksumKind::Adler32, RegionFormat::Legacy);
        let result = unpack(Lsn::new(200), region, FormatPolicy::Current);
        assert!(matches!(result, Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn legacy_policy_rejects_current_record_tags() {
        let region = pack(&records(200, &[b"new"]), ChecksumKind::Adler32);
        let result = unpack(Lsn::new(200), region, FormatPolicy::Legacy);
        assert!(matches!(result, Err(CoreError::Integrity { .. })));
    }

    #[test]
    fn legacy_policy_rejects_current_version_header() {
        let legacy = pack_as(&records(200, &[b"old"]), ChecksumKind::Adler32, RegionFormat::Legacy);
        let mut region = BytesMut::from(&legacy[..]);
        region[0..2].copy_from_slice(&REGION_VERSION.to_be_bytes());

        let result = unpack(Lsn::new(200), region.freeze(), FormatPolicy::Legacy);
        assert!(matches!(result, Err(CoreError::Integrity { .. })));
    }

    proptest! {
        #[test]
        fn pack_unpack_preserves_records(
            first in 100u64..1_000_000,
            lowest in 100u64..1_000,
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..32),
        ) {
            let input: Vec<LogRecord> = payloads
                .iter()
                .enumerate()
                .map(|(i, p)| LogRecord::new(Lsn::new(first + i as u64), Lsn::new(lowest), Bytes::from(p.clone())))
                .collect();
            let end = input.last().unwrap().lsn();

            let output = unpack(end, pack(&input, ChecksumKind::Adler32), FormatPolicy::Auto).unwrap();

            prop_assert_eq!(output.len(), input.len());
            for (a, b) in input.iter().zip(&output) {
                prop_assert_eq!(a.lsn(), b.lsn());
                prop_assert_eq!(a.previous_lsn(), b.previous_lsn());
                prop_assert_eq!(a.lowest_lsn(), b.lowest_lsn());
                prop_assert_eq!(a.payload(), b.payload());
            }
        }
    }
}
