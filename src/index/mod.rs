//! Key-space indexing.
//!
//! [`build_index`] walks every key of a store once, in store order, and
//! files each display key under its [`PrefixRule`] group. The scan reports
//! progress as it goes, stops promptly when its cancellation token fires,
//! and turns an engine failure halfway through into a partial index instead
//! of an error.

mod prefix;
mod progress;

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::engine::{IndexEstimate, StoreEngine};
use crate::error::{Error, Result};
use crate::key::display_key;
use crate::logging::{debug, info, warn};

pub use prefix::{DEFAULT_SEPARATOR, PrefixRule};
pub use progress::{DEFAULT_PROGRESS_STRIDE, ProgressReporter, ScanProgress};

/// Optional caps on how much of the key space is kept.
///
/// Both are off by default, in which case the index holds every key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLimits {
    /// Stop scanning after this many keys.
    pub max_total_keys: Option<u64>,
    /// Keep at most this many keys per group; the scan continues.
    pub max_keys_per_prefix: Option<usize>,
}

/// How keys are grouped and bounded during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub rule: PrefixRule,
    pub limits: ScanLimits,
    pub progress_stride: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            rule: PrefixRule::default(),
            limits: ScanLimits::default(),
            progress_stride: DEFAULT_PROGRESS_STRIDE,
        }
    }
}

/// Present on an index when configured limits dropped keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexTruncation {
    pub max_total_keys: Option<u64>,
    pub max_keys_per_prefix: Option<usize>,
    /// True when the scan stopped at `max_total_keys`.
    pub stopped_early: bool,
    /// Keys visited but not stored because their group was full.
    pub keys_skipped: u64,
    /// Groups that hit `max_keys_per_prefix`.
    pub prefixes_capped: Vec<String>,
}

/// Group name and size, for tree views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefixSummary {
    pub prefix: String,
    pub keys: usize,
}

/// Prefix hierarchy of one connection's key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyIndex {
    pub connection: String,
    /// Group prefix to display keys, keys in store order.
    pub groups: BTreeMap<String, Vec<String>>,
    /// Keys actually visited by the scan.
    pub total_keys: u64,
    pub first_key: Option<String>,
    /// Set when the engine failed partway; `groups` holds what was read.
    pub scan_error: Option<String>,
    pub estimate: IndexEstimate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<IndexTruncation>,
}

impl KeyIndex {
    /// Whether the scan ran to the end without an engine error.
    pub fn is_complete(&self) -> bool {
        self.scan_error.is_none()
    }

    /// Turn a partial index into [`Error::ScanPartialFailure`].
    pub fn require_complete(self) -> Result<Self> {
        match &self.scan_error {
            None => Ok(self),
            Some(reason) => Err(Error::ScanPartialFailure {
                connection: self.connection.clone(),
                keys_scanned: self.total_keys,
                reason: reason.clone(),
            }),
        }
    }

    /// All indexed keys, group by group.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.values().flatten().map(String::as_str)
    }

    /// Number of keys held in groups.
    pub fn indexed_keys(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn group(&self, prefix: &str) -> Option<&[String]> {
        self.groups.get(prefix).map(Vec::as_slice)
    }

    pub fn prefixes(&self) -> Vec<PrefixSummary> {
        self.groups
            .iter()
            .map(|(prefix, keys)| PrefixSummary {
                prefix: prefix.clone(),
                keys: keys.len(),
            })
            .collect()
    }
}

/// Case-insensitive substring search over every indexed key.
///
/// An empty term matches everything. Returns a fresh vector each call.
pub fn filter_keys(index: &KeyIndex, term: &str) -> Vec<String> {
    let needle = term.to_lowercase();
    index
        .keys()
        .filter(|key| needle.is_empty() || key.to_lowercase().contains(&needle))
        .map(str::to_string)
        .collect()
}

/// Scan `engine` and build its key index.
///
/// Returns [`Error::Cancelled`] if `cancel` fires before the scan ends. An
/// engine failure mid-scan is not an error: the result carries the keys read
/// so far and a `scan_error`.
pub fn build_index(
    engine: &dyn StoreEngine,
    connection: &str,
    options: &IndexOptions,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<KeyIndex> {
    if cancel.is_cancelled() {
        return Err(cancelled(connection, 0));
    }

    let estimate = match engine.estimate() {
        Ok(estimate) => estimate,
        Err(_err) => {
            warn!(connection = connection, error = %_err, "estimate unavailable, progress will stay at 0");
            IndexEstimate::default()
        }
    };
    debug!(
        connection = connection,
        total_keys_estimate = estimate.total_keys_estimate,
        "starting key scan"
    );
    progress.start(estimate.total_keys_estimate);

    let rule = options.rule;
    let limits = options.limits;
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut capped: BTreeSet<String> = BTreeSet::new();
    let mut first_key: Option<String> = None;
    let mut scanned: u64 = 0;
    let mut skipped: u64 = 0;
    let mut stopped_early = false;
    let mut was_cancelled = false;

    let outcome = engine.visit_keys(&mut |raw| {
        if cancel.is_cancelled() {
            was_cancelled = true;
            return ControlFlow::Break(());
        }
        if limits.max_total_keys.is_some_and(|max| scanned >= max) {
            stopped_early = true;
            return ControlFlow::Break(());
        }

        scanned += 1;
        let key = display_key(raw);
        if first_key.is_none() {
            first_key = Some(key.clone());
        }

        let group = groups.entry(rule.group_of(&key).to_string()).or_default();
        if limits
            .max_keys_per_prefix
            .is_some_and(|max| group.len() >= max)
        {
            skipped += 1;
            capped.insert(rule.group_of(&key).to_string());
        } else {
            group.push(key);
        }

        progress.tick(scanned);
        ControlFlow::Continue(())
    });

    if was_cancelled {
        info!(connection = connection, scanned = scanned, "key scan cancelled");
        return Err(cancelled(connection, scanned));
    }

    let scan_error = match outcome {
        Ok(()) => None,
        Err(e) => {
            warn!(connection = connection, scanned = scanned, error = %e, "key scan stopped early");
            Some(e.to_string())
        }
    };

    let truncation = (stopped_early || skipped > 0).then(|| IndexTruncation {
        max_total_keys: limits.max_total_keys,
        max_keys_per_prefix: limits.max_keys_per_prefix,
        stopped_early,
        keys_skipped: skipped,
        prefixes_capped: capped.into_iter().collect(),
    });
    if truncation.is_some() {
        warn!(
            connection = connection,
            stopped_early = stopped_early,
            keys_skipped = skipped,
            "scan limits dropped keys"
        );
    }

    progress.finish(scanned);
    info!(
        connection = connection,
        total_keys = scanned,
        groups = groups.len(),
        "key scan finished"
    );

    Ok(KeyIndex {
        connection: connection.to_string(),
        groups,
        total_keys: scanned,
        first_key,
        scan_error,
        estimate,
        truncation,
    })
}

fn cancelled(connection: &str, scanned: u64) -> Error {
    Error::Cancelled(format!(
        "key scan for '{}' abandoned after {} keys",
        connection, scanned
    ))
}
