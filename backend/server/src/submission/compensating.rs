//! Compensating path for stores without atomic units.
//!
//! Two steps with a defined undo:
//!
//! 1. `stage`: insert the entry unconditionally. On its own it consumes no quota.
//! 2. `confirm`: conditional increment evaluated by the store (`limit == None || count < limit`).
//!    - match: the entry stands
//!    - no match, timeout or error: `undo` deletes the entry and the caller sees `LimitReached`
//!
//! The conditional increment is atomic per form, so no more than `limit` confirmations can ever
//! succeed. Which of several racing submissions wins the last slot is not defined.
//!
//! A failed undo leaves an orphan: the entry exists but counts against nothing. It is recorded for the
//! reconciliation job and logged, and the submission still reports `LimitReached`.
use model::{FeedbackEntry, Form};
use tracing::{debug, error, info, warn};

use super::{Submission, SubmissionWriter, SubmitError};
use crate::admission::Rejection;

pub async fn submit(
    writer: &SubmissionWriter,
    form: &Form,
    entry: FeedbackEntry,
) -> Result<Submission, SubmitError> {
    let staged = StagedEntry::stage(writer, entry).await?;

    Ok(staged.confirm(form).await)
}

/// An inserted entry that has not yet claimed a slot.
pub struct StagedEntry<'a> {
    writer: &'a SubmissionWriter,
    entry: FeedbackEntry,
}

impl<'a> StagedEntry<'a> {
    pub async fn stage(
        writer: &'a SubmissionWriter,
        entry: FeedbackEntry,
    ) -> Result<StagedEntry<'a>, SubmitError> {
        let staged = Self { writer, entry };

        // A failed or late insert may still have landed; it must not stay behind unclaimed.
        if let Err(e) = writer.bounded(writer.store().insert_entry(&staged.entry)).await {
            warn!(entry = %staged.entry.id, "Insert outcome unknown, rolling back: {e}");
            staged.undo().await;
            return Err(e.into());
        }
        debug!(entry = %staged.entry.id, "Entry staged");

        Ok(staged)
    }

    pub fn entry(&self) -> &FeedbackEntry {
        &self.entry
    }

    /// Keeps the entry without a conditional claim. Only for forms without a limit.
    pub fn keep(self) -> FeedbackEntry {
        self.entry
    }

    /// Claims a slot or rolls the entry back. Never retried.
    pub async fn confirm(self, form: &Form) -> Submission {
        let claim = self
            .writer
            .store()
            .increment_if_below_limit(&form.id, self.entry.time_on_page);

        match self.writer.bounded(claim).await {
            Ok(true) => {
                debug!(form = %form.custom_id, entry = %self.entry.id, "Entry confirmed");
                Submission::Created(self.entry)
            }
            Ok(false) => {
                info!(form = %form.custom_id, "Lost the race for the last slot");
                self.undo().await;
                Submission::Rejected(Rejection::LimitReached)
            }
            Err(e) => {
                warn!(form = %form.custom_id, "Conditional increment outcome unknown: {e}");
                self.undo().await;
                Submission::Rejected(Rejection::LimitReached)
            }
        }
    }

    pub async fn undo(self) {
        let store = self.writer.store();

        let Err(e) = self.writer.bounded(store.delete_entry(&self.entry)).await else {
            debug!(entry = %self.entry.id, "Staged entry rolled back");
            return;
        };

        error!(
            entry = %self.entry.id,
            form = %self.entry.form_id,
            "Rollback delete failed, entry orphaned: {e}"
        );

        if let Err(e) = self.writer.bounded(store.record_orphan(&self.entry)).await {
            error!(entry = %self.entry.id, "Failed to record orphan: {e}");
        }
    }
}
