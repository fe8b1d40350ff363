//! # Orphan Reconciliation
//!
//! Out-of-band cleanup for the compensating submission path.
//!
//! ## Where orphans come from
//! 1. A limited form is written without a multi-key transaction: the entry is stored first.
//!
//! 2. The conditional counter update loses the race for the last slot.
//!
//! 3. The rollback delete of the staged entry fails (timeout, lost connection).
//!
//! 4. The entry id is added to `feedback:orphans`. Listings already hide it, but the record still takes
//!    space and still sits in the form's entry index.
//!
//! ## Sweep
//! - Read every recorded orphan id
//! - Delete the entry, drop it from its form's index and forget the id
//! - A failed purge is logged and left recorded for the next run
//!
//! Running the sweep twice is harmless: an id that is no longer recorded is skipped.
use indicatif::{ProgressBar, ProgressStyle};
use server::store::{FeedbackStore, StoreError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sweep {
    pub found: usize,
    pub purged: usize,
    pub failed: usize,
}

pub async fn sweep_orphans(store: &dyn FeedbackStore, dry_run: bool) -> Result<Sweep, StoreError> {
    let orphans = store.orphans().await?;

    let mut sweep = Sweep {
        found: orphans.len(),
        ..Sweep::default()
    };
    info!(backend = store.backend_tag(), found = sweep.found, "Loaded orphans");

    if dry_run || orphans.is_empty() {
        return Ok(sweep);
    }

    let pb = ProgressBar::new(orphans.len() as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }

    for entry_id in &orphans {
        pb.set_message(format!("Purging {entry_id}"));

        match store.purge_orphan(entry_id).await {
            Ok(true) => sweep.purged += 1,
            Ok(false) => info!(entry = %entry_id, "Orphan already gone"),
            Err(e) => {
                warn!(entry = %entry_id, "Failed to purge orphan: {e}");
                sweep.failed += 1;
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    info!(purged = sweep.purged, failed = sweep.failed, "Sweep finished");

    Ok(sweep)
}
