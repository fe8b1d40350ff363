//! # Store
//!
//! Persistence seam for forms and feedback entries.
//!
//! ## Primitives the submission writers rely on
//! - `transact`: read the form, run an admission check, then insert the entry and bump the count as one
//!   indivisible unit. Optional; `probe` says whether the deployment supports it.
//! - `insert_entry` / `delete_entry`: plain writes, used by the compensating path.
//! - `increment_if_below_limit`: a single conditional update evaluated by the store against the stored
//!   value, never a client-side read-then-write.
//! - `increment_count`: unconditional bump for forms without a limit.
//!
//! Nothing else in the crate writes `feedback_count`.
use async_trait::async_trait;
use model::{FeedbackEntry, Form, FormSettings, FormState};
use thiserror::Error;

use crate::admission::{Admission, Rejection};

pub mod memory;
pub mod redis_backend;

pub use memory::MemoryStore;
pub use redis_backend::RedisStore;

/// Whether the deployment can run `transact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported,
}

/// Policy run inside an atomic unit against the freshly read form.
pub type AdmissionCheck = fn(&FormState) -> Admission;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    Rejected(Rejection),
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsUpdate {
    Updated(Form),
    NotFound,
    LimitBelowCount { count: u64 },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Atomic units are not supported by this deployment")]
    Unsupported,

    #[error("Atomic unit aborted: {0}")]
    Aborted(String),

    #[error("Store call timed out")]
    Timeout,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Injected failure: {0}")]
    Injected(&'static str),
}

impl StoreError {
    /// Aborts and timeouts leave an atomic unit without partial state, so the unit may run again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Aborted(_) | StoreError::Timeout)
    }
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// One-time check for atomic multi-statement support. Connectivity problems are errors,
    /// not answers.
    async fn probe(&self) -> Result<Capability, StoreError>;

    /// Resolves a public id first, then an internal id when the reference has that shape.
    async fn find_form(&self, form_ref: &str) -> Result<Option<Form>, StoreError>;

    async fn insert_form(&self, form: &Form) -> Result<(), StoreError>;

    /// Forms owned by `user_id`, oldest first.
    async fn forms_for_user(&self, user_id: &str) -> Result<Vec<Form>, StoreError>;

    /// Best-effort view counter. Never touches the admission state, so it cannot abort a
    /// concurrent atomic unit.
    async fn record_view(&self, form_id: &str) -> Result<(), StoreError>;

    /// Applies owner settings; refuses a limit below the current count.
    async fn update_settings(
        &self,
        form_id: &str,
        settings: &FormSettings,
    ) -> Result<SettingsUpdate, StoreError>;

    /// Removes the form and every entry attributed to it. Returns the number of entries removed.
    async fn delete_form(&self, form: &Form) -> Result<u64, StoreError>;

    /// Entries attributed to a form, orphans excluded.
    async fn entries_for_form(&self, custom_id: &str) -> Result<Vec<FeedbackEntry>, StoreError>;

    /// Entries of any form whose `name` or `email` answer contains `query`, orphans excluded.
    async fn search_entries(&self, query: &str) -> Result<Vec<FeedbackEntry>, StoreError>;

    /// Whether an entry is stored under this id, orphans included.
    async fn has_entry(&self, entry_id: &str) -> Result<bool, StoreError>;

    /// Atomic unit: re-read, check, insert, increment count and time spent. An entry already
    /// stored under the same id reports `Committed` without a second increment.
    async fn transact(
        &self,
        form_id: &str,
        entry: &FeedbackEntry,
        check: AdmissionCheck,
    ) -> Result<TxOutcome, StoreError>;

    async fn insert_entry(&self, entry: &FeedbackEntry) -> Result<(), StoreError>;

    async fn delete_entry(&self, entry: &FeedbackEntry) -> Result<(), StoreError>;

    /// Increments the count only while `limit == None || count < limit`. `false` means no match.
    /// `time_on_page` is added to the form's total in the same write.
    async fn increment_if_below_limit(
        &self,
        form_id: &str,
        time_on_page: f64,
    ) -> Result<bool, StoreError>;

    async fn increment_count(&self, form_id: &str, time_on_page: f64) -> Result<(), StoreError>;

    async fn record_orphan(&self, entry: &FeedbackEntry) -> Result<(), StoreError>;

    async fn orphans(&self) -> Result<Vec<String>, StoreError>;

    /// Deletes an orphaned entry and forgets it. `false` if it was not recorded.
    async fn purge_orphan(&self, entry_id: &str) -> Result<bool, StoreError>;
}
