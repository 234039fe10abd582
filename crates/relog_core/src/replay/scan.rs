//! Newest-to-oldest iteration over the records of an append device.

use crate::config::FormatPolicy;
use crate::error::{CoreResult, RecoveryError};
use crate::record::LogRecord;
use crate::region;
use crate::types::Lsn;
use bytes::Bytes;
use relog_storage::{AppendDevice, Direction, SeekPosition};

/// Reads regions backward and yields their records in descending LSN order.
///
/// Every record must be exactly one below the previous one; anything else
/// is an [`RecoveryError::LsnGap`].
pub(crate) struct BackwardScan<'a, D> {
    device: &'a mut D,
    policy: FormatPolicy,
    pending: Vec<LogRecord>,
    expected: Option<Lsn>,
    regions: u64,
}

impl<'a, D: AppendDevice> BackwardScan<'a, D> {
    /// Positions `device` at its end.
    pub(crate) fn new(device: &'a mut D, policy: FormatPolicy) -> CoreResult<Self> {
        device.seek(SeekPosition::End)?;
        Ok(Self {
            device,
            policy,
            pending: Vec::new(),
            expected: None,
            regions: 0,
        })
    }

    /// Returns the next older record, or `None` at the start of the log.
    pub(crate) fn next_record(&mut self) -> CoreResult<Option<LogRecord>> {
        let record = loop {
            if let Some(record) = self.pending.pop() {
                break record;
            }
            let Some(chunk) = self.device.read(Direction::Backward)? else {
                return Ok(None);
            };
            self.regions += 1;
            self.pending = region::unpack(Lsn::new(chunk.lsn), Bytes::from(chunk.bytes), self.policy)?;
        };

        if let Some(expected) = self.expected {
            if record.lsn() != expected {
                return Err(RecoveryError::LsnGap {
                    expected,
                    found: record.lsn(),
                }
                .into());
            }
        }
        self.expected = Some(record.lsn().prev());
        Ok(Some(record))
    }

    /// Regions read so far.
    pub(crate) fn regions(&self) -> u64 {
        self.regions
    }
}
