//! Scan progress reporting.
//!
//! Progress is published on a `watch` channel. Publishing never waits for
//! observers, so a slow or absent observer cannot stall a scan.

use serde::Serialize;
use tokio::sync::watch;

/// Highest percentage reported before a scan has finished.
const MAX_RUNNING_PERCENT: u8 = 99;

/// Publish every this many keys by default.
pub const DEFAULT_PROGRESS_STRIDE: u64 = 256;

/// Snapshot of a running or finished scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    /// Keys visited so far.
    pub scanned: u64,
    /// Advisory total used for the percentage.
    pub estimate: Option<u64>,
    /// 0..=99 while running, 100 once done.
    pub percent: u8,
    pub done: bool,
}

impl ScanProgress {
    fn advanced(self, scanned: u64) -> Self {
        let percent = match self.estimate {
            Some(total) if total > 0 => {
                let ratio = u128::from(scanned) * 100 / u128::from(total);
                u8::try_from(ratio.min(u128::from(MAX_RUNNING_PERCENT)))
                    .unwrap_or(MAX_RUNNING_PERCENT)
            }
            _ => 0,
        };
        Self {
            scanned: scanned.max(self.scanned),
            estimate: self.estimate,
            percent: percent.max(self.percent),
            done: false,
        }
    }

    fn finished(self, scanned: u64) -> Self {
        Self {
            scanned,
            estimate: self.estimate,
            percent: 100,
            done: true,
        }
    }
}

/// Write side of a scan's progress channel.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<ScanProgress>,
    stride: u64,
}

impl ProgressReporter {
    /// Create a reporter and its first observer.
    pub fn new(stride: u64) -> (Self, watch::Receiver<ScanProgress>) {
        let (tx, rx) = watch::channel(ScanProgress::default());
        (
            Self {
                tx,
                stride: stride.max(1),
            },
            rx,
        )
    }

    /// A reporter nobody observes yet.
    pub fn detached(stride: u64) -> Self {
        Self::new(stride).0
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ScanProgress {
        *self.tx.borrow()
    }

    pub(crate) fn start(&self, estimate: Option<u64>) {
        self.tx.send_replace(ScanProgress {
            estimate,
            ..ScanProgress::default()
        });
    }

    pub(crate) fn tick(&self, scanned: u64) {
        if scanned % self.stride == 0 {
            self.tx.send_modify(|p| *p = p.advanced(scanned));
        }
    }

    pub(crate) fn finish(&self, scanned: u64) {
        self.tx.send_modify(|p| *p = p.finished(scanned));
    }
}
