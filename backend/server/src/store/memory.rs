//! In-process store for development and tests.
//!
//! Transactions are optimistic like Redis `WATCH`/`EXEC`: the unit remembers the form version it read
//! and aborts at commit if anything bumped it since. Every primitive yields once before touching the
//! tables to stand in for a network round trip, so concurrent submissions really interleave.
//!
//! Faults can be injected to drive the degraded paths: no transaction support, write conflicts,
//! failing count increments and conditional claims, failing deletes, and writes that land but
//! answer late.
use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use model::{FeedbackEntry, Form, FormSettings, is_internal_id};
use tokio::{
    sync::Mutex,
    task::yield_now,
    time::sleep,
};

use super::{
    AdmissionCheck, Capability, FeedbackStore, SettingsUpdate, StoreError, TxOutcome,
};
use crate::admission::Admission;

#[derive(Default)]
struct Tables {
    forms: HashMap<String, Form>,
    public_ids: HashMap<String, String>,
    versions: HashMap<String, u64>,
    entries: HashMap<String, FeedbackEntry>,
    orphans: BTreeSet<String>,
}

impl Tables {
    fn version(&self, form_id: &str) -> u64 {
        self.versions.get(form_id).copied().unwrap_or(0)
    }

    fn bump(&mut self, form_id: &str) {
        *self.versions.entry(form_id.to_string()).or_insert(0) += 1;
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    transactions: bool,
    pending_conflicts: AtomicU32,
    fail_increments: AtomicBool,
    fail_claims: AtomicBool,
    fail_deletes: AtomicBool,
    insert_stall_ms: AtomicU64,
    commit_stall_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            transactions: true,
            pending_conflicts: AtomicU32::new(0),
            fail_increments: AtomicBool::new(false),
            fail_claims: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            insert_stall_ms: AtomicU64::new(0),
            commit_stall_ms: AtomicU64::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaves like a deployment that cannot run atomic units.
    pub fn without_transactions(mut self) -> Self {
        self.transactions = false;
        self
    }

    /// The next `count` atomic units abort with a write conflict at commit.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    /// `increment_if_below_limit` errors without touching the count.
    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// `insert_entry` stores the entry, then waits this long before answering.
    pub fn stall_inserts(&self, stall: Duration) {
        self.insert_stall_ms
            .store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    /// A committed atomic unit waits this long before answering.
    pub fn stall_commits(&self, stall: Duration) {
        self.commit_stall_ms
            .store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    /// Entries physically present, orphans included.
    pub async fn stored_entries(&self) -> usize {
        self.tables.lock().await.entries.len()
    }

    async fn round_trip(&self) {
        yield_now().await;
    }

    async fn late_reply(&self, stall_ms: &AtomicU64) {
        let millis = stall_ms.load(Ordering::SeqCst);
        if millis > 0 {
            sleep(Duration::from_millis(millis)).await;
        }
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> Result<Capability, StoreError> {
        Ok(if self.transactions {
            Capability::Supported
        } else {
            Capability::Unsupported
        })
    }

    async fn find_form(&self, form_ref: &str) -> Result<Option<Form>, StoreError> {
        self.round_trip().await;
        let tables = self.tables.lock().await;

        let form_id = tables
            .public_ids
            .get(form_ref)
            .cloned()
            .or_else(|| is_internal_id(form_ref).then(|| form_ref.to_string()));

        Ok(form_id.and_then(|id| tables.forms.get(&id).cloned()))
    }

    async fn insert_form(&self, form: &Form) -> Result<(), StoreError> {
        self.round_trip().await;
        let mut tables = self.tables.lock().await;

        tables
            .public_ids
            .insert(form.custom_id.clone(), form.id.clone());
        tables.forms.insert(form.id.clone(), form.clone());
        tables.bump(&form.id);

        Ok(())
    }

    async fn forms_for_user(&self, user_id: &str) -> Result<Vec<Form>, StoreError> {
        self.round_trip().await;
        let tables = self.tables.lock().await;

        let mut forms: Vec<Form> = tables
            .forms
            .values()
            .filter(|form| form.user_id == user_id)
            .cloned()
            .collect();
        forms.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(forms)
    }

    async fn record_view(&self, form_id: &str) -> Result<(), StoreError> {
        self.round_trip().await;
        if let Some(form) = self.tables.lock().await.forms.get_mut(form_id) {
            form.view_count += 1;
        }

        Ok(())
    }

    async fn update_settings(
        &self,
        form_id: &str,
        settings: &FormSettings,
    ) -> Result<SettingsUpdate, StoreError> {
        self.round_trip().await;
        let mut tables = self.tables.lock().await;

        let Some(form) = tables.forms.get_mut(form_id) else {
            return Ok(SettingsUpdate::NotFound);
        };

        if let Some(Some(limit)) = settings.limit {
            if limit < form.state.count {
                return Ok(SettingsUpdate::LimitBelowCount {
                    count: form.state.count,
                });
            }
        }

        if let Some(paused) = settings.paused {
            form.state.paused = paused;
        }
        if let Some(limit) = settings.limit {
            form.state.limit = limit;
        }

        let updated = form.clone();
        tables.bump(form_id);

        Ok(SettingsUpdate::Updated(updated))
    }

    async fn delete_form(&self, form: &Form) -> Result<u64, StoreError> {
        self.round_trip().await;
        let mut tables = self.tables.lock().await;

        tables.forms.remove(&form.id);
        tables.public_ids.remove(&form.custom_id);
        tables.versions.remove(&form.id);

        let doomed: Vec<String> = tables
            .entries
            .values()
            .filter(|entry| entry.form_id == form.custom_id)
            .map(|entry| entry.id.clone())
            .collect();

        let mut removed = 0;
        for id in doomed {
            tables.entries.remove(&id);
            if !tables.orphans.remove(&id) {
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn entries_for_form(&self, custom_id: &str) -> Result<Vec<FeedbackEntry>, StoreError> {
        self.round_trip().await;
        let tables = self.tables.lock().await;

        let mut entries: Vec<FeedbackEntry> = tables
            .entries
            .values()
            .filter(|entry| entry.form_id == custom_id && !tables.orphans.contains(&entry.id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(entries)
    }

    async fn search_entries(&self, query: &str) -> Result<Vec<FeedbackEntry>, StoreError> {
        self.round_trip().await;
        let tables = self.tables.lock().await;

        let mut entries: Vec<FeedbackEntry> = tables
            .entries
            .values()
            .filter(|entry| !tables.orphans.contains(&entry.id) && entry.matches_query(query))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(entries)
    }

    async fn has_entry(&self, entry_id: &str) -> Result<bool, StoreError> {
        self.round_trip().await;

        Ok(self.tables.lock().await.entries.contains_key(entry_id))
    }

    async fn transact(
        &self,
        form_id: &str,
        entry: &FeedbackEntry,
        check: AdmissionCheck,
    ) -> Result<TxOutcome, StoreError> {
        if !self.transactions {
            return Err(StoreError::Unsupported);
        }

        self.round_trip().await;
        let (state, version) = {
            let tables = self.tables.lock().await;

            let Some(form) = tables.forms.get(form_id) else {
                return Ok(TxOutcome::NotFound);
            };
            if tables.entries.contains_key(&entry.id) {
                return Ok(TxOutcome::Committed);
            }

            (form.state, tables.version(form_id))
        };

        if let Admission::Reject(reason) = check(&state) {
            return Ok(TxOutcome::Rejected(reason));
        }

        self.round_trip().await;
        if self.take_conflict() {
            return Err(StoreError::Aborted("injected write conflict".to_string()));
        }

        {
            let mut tables = self.tables.lock().await;
            if tables.version(form_id) != version {
                return Err(StoreError::Aborted("form changed since it was read".to_string()));
            }
            let Some(form) = tables.forms.get_mut(form_id) else {
                return Err(StoreError::Aborted("form removed since it was read".to_string()));
            };

            form.state.count += 1;
            form.total_time_spent += entry.time_on_page;
            tables.bump(form_id);
            tables.entries.insert(entry.id.clone(), entry.clone());
        }

        self.late_reply(&self.commit_stall_ms).await;
        Ok(TxOutcome::Committed)
    }

    async fn insert_entry(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        self.round_trip().await;
        self.tables
            .lock()
            .await
            .entries
            .insert(entry.id.clone(), entry.clone());

        self.late_reply(&self.insert_stall_ms).await;
        Ok(())
    }

    async fn delete_entry(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        self.round_trip().await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("delete"));
        }

        self.tables.lock().await.entries.remove(&entry.id);

        Ok(())
    }

    async fn increment_if_below_limit(
        &self,
        form_id: &str,
        time_on_page: f64,
    ) -> Result<bool, StoreError> {
        self.round_trip().await;
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("conditional increment"));
        }

        let mut tables = self.tables.lock().await;

        let Some(form) = tables.forms.get_mut(form_id) else {
            return Ok(false);
        };
        if matches!(form.state.limit, Some(limit) if form.state.count >= limit) {
            return Ok(false);
        }

        form.state.count += 1;
        form.total_time_spent += time_on_page;
        tables.bump(form_id);

        Ok(true)
    }

    async fn increment_count(&self, form_id: &str, time_on_page: f64) -> Result<(), StoreError> {
        self.round_trip().await;
        if self.fail_increments.load(Ordering::SeqCst) {
            return Err(StoreError::Injected("increment"));
        }

        let mut tables = self.tables.lock().await;
        if let Some(form) = tables.forms.get_mut(form_id) {
            form.state.count += 1;
            form.total_time_spent += time_on_page;
            tables.bump(form_id);
        }

        Ok(())
    }

    async fn record_orphan(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        self.tables.lock().await.orphans.insert(entry.id.clone());

        Ok(())
    }

    async fn orphans(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tables.lock().await.orphans.iter().cloned().collect())
    }

    async fn purge_orphan(&self, entry_id: &str) -> Result<bool, StoreError> {
        self.round_trip().await;
        let mut tables = self.tables.lock().await;

        if !tables.orphans.remove(entry_id) {
            return Ok(false);
        }
        tables.entries.remove(entry_id);

        Ok(true)
    }
}
