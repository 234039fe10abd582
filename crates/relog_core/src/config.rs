//! Log engine configuration.

use crate::types::Lsn;
use std::time::Duration;

/// When the durability daemon syncs the append device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Sync only regions containing a record appended with a sync request.
    OnRequest,
    /// Sync after every region.
    Always,
}

/// Checksum written into region headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Rolling Adler-32 over all record payloads in the region.
    Adler32,
    /// No checksum; both header words are zero.
    None,
}

/// Which region formats the reader accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatPolicy {
    /// Detect the format from each region's version field.
    Auto,
    /// Accept only the current format.
    Current,
    /// Accept only the legacy format.
    Legacy,
}

/// Configuration for a [`crate::LogEngine`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of LSN slots per window.
    pub window_capacity: usize,

    /// When the daemon syncs the device.
    pub sync_policy: SyncPolicy,

    /// Checksum written into new regions.
    pub checksum: ChecksumKind,

    /// Region formats accepted during recovery.
    pub format_policy: FormatPolicy,

    /// Replay worker threads (0 = replay on the scan thread).
    pub replay_workers: usize,

    /// How long the daemon sleeps between checks of an idle window.
    pub daemon_poll_interval: Duration,

    /// Re-check interval while waiting for a window to become contiguous.
    pub contiguous_recheck_interval: Duration,

    /// Depth of the packing stage queue (0 = pack on the writer thread).
    pub packing_stage_depth: usize,

    /// Slot arrays kept for reuse by new windows.
    pub slot_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_capacity: 1024,
            sync_policy: SyncPolicy::OnRequest,
            checksum: ChecksumKind::Adler32,
            format_policy: FormatPolicy::Auto,
            replay_workers: 4,
            daemon_poll_interval: Duration::from_millis(10),
            contiguous_recheck_interval: Duration::from_millis(1),
            packing_stage_depth: 0,
            slot_pool_size: 4,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of LSN slots per window.
    #[must_use]
    pub const fn window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub const fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets the region checksum.
    #[must_use]
    pub const fn checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the region format policy used by recovery.
    #[must_use]
    pub const fn format_policy(mut self, policy: FormatPolicy) -> Self {
        self.format_policy = policy;
        self
    }

    /// Sets the number of replay worker threads.
    #[must_use]
    pub const fn replay_workers(mut self, workers: usize) -> Self {
        self.replay_workers = workers;
        self
    }

    /// Sets the daemon's idle poll interval.
    #[must_use]
    pub const fn daemon_poll_interval(mut self, interval: Duration) -> Self {
        self.daemon_poll_interval = interval;
        self
    }

    /// Sets the contiguity re-check interval.
    #[must_use]
    pub const fn contiguous_recheck_interval(mut self, interval: Duration) -> Self {
        self.contiguous_recheck_interval = interval;
        self
    }

    /// Sets the packing stage queue depth.
    #[must_use]
    pub const fn packing_stage_depth(mut self, depth: usize) -> Self {
        self.packing_stage_depth = depth;
        self
    }

    /// Sets how many slot arrays are kept for reuse.
    #[must_use]
    pub const fn slot_pool_size(mut self, size: usize) -> Self {
        self.slot_pool_size = size;
        self
    }

    pub(crate) fn validate(&self) -> crate::CoreResult<()> {
        if self.window_capacity == 0 {
            return Err(crate::CoreError::invalid_operation(
                "window capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Options for a single recovery pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryOptions {
    /// The oldest LSN still live in the store, as reported by compaction.
    ///
    /// `None` uses the lowest-LSN marker stored with the newest record.
    pub lowest_live_lsn: Option<Lsn>,
}

impl RecoveryOptions {
    /// Creates options that derive the boundary from the log itself.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the externally supplied lowest live LSN.
    #[must_use]
    pub const fn lowest_live_lsn(mut self, lsn: Lsn) -> Self {
        self.lowest_live_lsn = Some(lsn);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.window_capacity, 1024);
        assert_eq!(config.sync_policy, SyncPolicy::OnRequest);
        assert_eq!(config.checksum, ChecksumKind::Adler32);
        assert_eq!(config.format_policy, FormatPolicy::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .window_capacity(16)
            .sync_policy(SyncPolicy::Always)
            .replay_workers(0)
            .packing_stage_depth(2);

        assert_eq!(config.window_capacity, 16);
        assert_eq!(config.sync_policy, SyncPolicy::Always);
        assert_eq!(config.replay_workers, 0);
        assert_eq!(config.packing_stage_depth, 2);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Config::new().window_capacity(0).validate().is_err());
    }

    #[test]
    fn recovery_options_boundary() {
        assert_eq!(RecoveryOptions::new().lowest_live_lsn, None);
        let options = RecoveryOptions::new().lowest_live_lsn(Lsn::new(150));
        assert_eq!(options.lowest_live_lsn, Some(Lsn::new(150)));
    }
}
