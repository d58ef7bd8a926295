use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::header::Vcid;

/// Synchronizer options.
///
/// # Example
/// ```
/// use framesync::SyncConfig;
///
/// let config = SyncConfig::default()
///     .with_checksum_check(true)
///     .with_valid_vcids([0, 1, 5]);
/// assert!(config.is_valid_vcid(5));
/// assert!(!config.is_valid_vcid(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SyncConfig {
    /// Verify frame checksums for formats with error control.
    pub checksum_check: bool,
    /// Number of unsynchronized bytes accumulated before they are reported.
    pub out_of_sync_threshold: usize,
    /// Virtual channels frames are expected on. Empty means only VCID 0.
    pub valid_vcids: BTreeSet<Vcid>,
    /// Start in sync with a frame expected at the first byte of the stream.
    pub presynchronized: bool,
}

impl SyncConfig {
    pub const DEFAULT_OUT_OF_SYNC_THRESHOLD: usize = 800;

    #[must_use]
    pub fn with_checksum_check(mut self, enabled: bool) -> Self {
        self.checksum_check = enabled;
        self
    }

    /// A threshold of 0 is treated as 1.
    #[must_use]
    pub fn with_out_of_sync_threshold(mut self, bytes: usize) -> Self {
        self.out_of_sync_threshold = bytes;
        self
    }

    #[must_use]
    pub fn with_valid_vcids<I: IntoIterator<Item = Vcid>>(mut self, vcids: I) -> Self {
        self.valid_vcids = vcids.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_presynchronized(mut self, presynchronized: bool) -> Self {
        self.presynchronized = presynchronized;
        self
    }

    #[must_use]
    pub fn is_valid_vcid(&self, vcid: Vcid) -> bool {
        if self.valid_vcids.is_empty() {
            vcid == 0
        } else {
            self.valid_vcids.contains(&vcid)
        }
    }

    pub(crate) fn threshold(&self) -> usize {
        self.out_of_sync_threshold.max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            checksum_check: false,
            out_of_sync_threshold: Self::DEFAULT_OUT_OF_SYNC_THRESHOLD,
            valid_vcids: BTreeSet::new(),
            presynchronized: false,
        }
    }
}
