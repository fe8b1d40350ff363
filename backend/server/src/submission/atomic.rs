//! Atomic path: the store re-reads the form, runs admission and writes entry plus count as one unit.
//!
//! Aborted units leave nothing behind and are retried from the top with a short pause. The entry id is
//! fixed across attempts, so a unit whose commit acknowledgement was lost is recognised on the retry.
use std::time::Duration;

use model::{FeedbackEntry, Form};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Submission, SubmissionWriter, SubmitError};
use crate::{
    admission,
    store::{StoreError, TxOutcome},
};

const RETRY_PAUSE: Duration = Duration::from_millis(15);

pub async fn submit(
    writer: &SubmissionWriter,
    form: &Form,
    entry: &FeedbackEntry,
) -> Result<Submission, SubmitError> {
    let attempts = writer.config.attempts.max(1);
    let mut last_timed_out = false;

    for attempt in 1..=attempts {
        let unit = writer.store().transact(&form.id, entry, admission::evaluate);

        match writer.bounded(unit).await {
            Ok(TxOutcome::Committed) => {
                debug!(form = %form.custom_id, entry = %entry.id, attempt, "Entry committed");
                return Ok(Submission::Created(entry.clone()));
            }
            Ok(TxOutcome::Rejected(reason)) => {
                info!(form = %form.custom_id, reason = reason.code(), "Submission rejected");
                return Ok(Submission::Rejected(reason));
            }
            Ok(TxOutcome::NotFound) => return Err(SubmitError::FormNotFound),
            Err(e) if e.is_retryable() => {
                debug!(form = %form.custom_id, attempt, "Atomic unit aborted: {e}");
                last_timed_out = matches!(e, StoreError::Timeout);

                if attempt < attempts {
                    sleep(RETRY_PAUSE * attempt).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    // The last unit may have committed before its reply was lost.
    if last_timed_out {
        match writer.bounded(writer.store().has_entry(&entry.id)).await {
            Ok(true) => {
                info!(form = %form.custom_id, entry = %entry.id, "Timed out unit had committed");
                return Ok(Submission::Created(entry.clone()));
            }
            Ok(false) => {}
            Err(e) => warn!(entry = %entry.id, "Could not check for a late commit: {e}"),
        }
    }

    warn!(form = %form.custom_id, attempts, "Atomic unit kept aborting, giving up");
    Err(SubmitError::Contended { attempts })
}
