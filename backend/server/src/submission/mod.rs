//! # Submission
//!
//! Appends a feedback entry while keeping `feedback_count <= feedback_limit` under any interleaving of
//! concurrent submissions, across any number of server instances.
//!
//! ## Flow
//!
//! 1. Resolve the form; unknown forms are `FormNotFound`.
//! 2. Cheap admission check on the snapshot just read. Paused or full forms are rejected without a write.
//! 3. Forms without a limit: plain insert, then a best-effort count bump. A lost bump only skews a
//!    display counter.
//! 4. Limited forms take the path chosen at startup:
//!    - [`atomic`]: re-read, check, insert and increment in one store unit, retried on conflicts.
//!    - [`compensating`]: insert, conditional increment, delete on a lost race.
//!
//! Every store call is bounded by the configured timeout. The writer never holds an in-process lock;
//! correctness comes from the store primitives alone.
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use model::{FeedbackEntry, Form};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    admission::{self, Admission, Rejection},
    store::{FeedbackStore, StoreError},
};

pub mod atomic;
pub mod compensating;
pub mod path;

use compensating::StagedEntry;
pub use path::{WritePath, select_path};

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Created(FeedbackEntry),
    Rejected(Rejection),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Form not found")]
    FormNotFound,

    #[error("Form is under heavy contention, gave up after {attempts} attempts")]
    Contended { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub attempts: u32,
    pub store_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            store_timeout: Duration::from_secs(2),
        }
    }
}

pub struct SubmissionWriter {
    store: Arc<dyn FeedbackStore>,
    atomic: AtomicBool,
    config: WriterConfig,
}

impl SubmissionWriter {
    pub fn new(store: Arc<dyn FeedbackStore>, path: WritePath, config: WriterConfig) -> Self {
        Self {
            store,
            atomic: AtomicBool::new(path == WritePath::Atomic),
            config,
        }
    }

    /// Probes the store once and builds a writer on the path it supports.
    pub async fn connect(
        store: Arc<dyn FeedbackStore>,
        prefer_atomic: bool,
        config: WriterConfig,
    ) -> Result<Self, StoreError> {
        let path = select_path(store.as_ref(), prefer_atomic).await?;

        Ok(Self::new(store, path, config))
    }

    pub fn path(&self) -> WritePath {
        if self.atomic.load(Ordering::Acquire) {
            WritePath::Atomic
        } else {
            WritePath::Compensating
        }
    }

    pub(crate) fn store(&self) -> &dyn FeedbackStore {
        self.store.as_ref()
    }

    /// Runs a store call under the configured timeout.
    pub(crate) async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// The store stopped accepting atomic units after startup; stay on the compensating path.
    fn downgrade(&self) {
        if self.atomic.swap(false, Ordering::AcqRel) {
            warn!(
                backend = self.store.backend_tag(),
                "Atomic units rejected at runtime, switching to compensating writes"
            );
        }
    }

    pub async fn submit(
        &self,
        form_ref: &str,
        mut entry: FeedbackEntry,
    ) -> Result<Submission, SubmitError> {
        let form = self
            .bounded(self.store.find_form(form_ref))
            .await?
            .ok_or(SubmitError::FormNotFound)?;

        entry.form_id = form.custom_id.clone();

        debug!(
            form = %form.custom_id,
            paused = form.state.paused,
            limit = ?form.state.limit,
            count = form.state.count,
            remaining = ?form.state.remaining(),
            "Submission for form"
        );

        if let Admission::Reject(reason) = admission::evaluate(&form.state) {
            info!(form = %form.custom_id, reason = reason.code(), "Submission rejected");
            return Ok(Submission::Rejected(reason));
        }

        if form.state.limit.is_none() {
            return self.submit_unlimited(&form, entry).await;
        }

        if self.path() == WritePath::Atomic {
            match atomic::submit(self, &form, &entry).await {
                Err(SubmitError::Store(StoreError::Unsupported)) => self.downgrade(),
                outcome => return outcome,
            }
        }

        compensating::submit(self, &form, entry).await
    }

    async fn submit_unlimited(
        &self,
        form: &Form,
        entry: FeedbackEntry,
    ) -> Result<Submission, SubmitError> {
        let staged = StagedEntry::stage(self, entry).await?;

        let bump = self
            .store
            .increment_count(&form.id, staged.entry().time_on_page);
        if let Err(e) = self.bounded(bump).await {
            warn!(form = %form.custom_id, "Failed to increment feedback count: {e}");
        }

        Ok(Submission::Created(staged.keep()))
    }
}
