//! # Redis
//!
//! Durable store for forms and feedback entries.
//!
//! ## Layout
//!
//! - `form:{id}`: hash with `custom_id`, `name`, `user_id`, `created_at`, `fields` (JSON),
//!   `paused` (`0`/`1`), `count`, `time_spent`, and `limit` (absent when unlimited)
//! - `form:views:{id}`: view counter, kept off the form hash so views never disturb a `WATCH`
//! - `form:public:{custom_id}`: string holding the internal id
//! - `form:user:{user_id}`: set of internal ids owned by the user
//! - `feedback:{entry_id}`: JSON encoded entry
//! - `feedback:form:{custom_id}`: set of entry ids attributed to the form
//! - `feedback:orphans`: set of entry ids whose rollback delete failed
//!
//! ## Atomicity
//!
//! - Atomic unit: `WATCH form:{id}`, read, admission check, then `MULTI` / `EXEC` storing the entry,
//!   indexing it and bumping `count`. A nil `EXEC` reply means a concurrent write touched the form.
//!   Each unit opens its own connection so no other request ever shares the `WATCH`.
//! - Conditional increment: single-key Lua script, evaluated next to the data.
//! - The unit spans keys in different hash slots, so a clustered deployment answers `CROSSSLOT`.
//!   The startup probe detects this once and the writers fall back to the compensating path.
use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{FeedbackEntry, Form, FormSettings, FormState, is_internal_id};
use redis::{
    AsyncCommands, Client, ErrorKind, RedisError, Script,
    aio::{ConnectionManager, MultiplexedConnection},
};
use tracing::{debug, warn};

use super::{
    AdmissionCheck, Capability, FeedbackStore, SettingsUpdate, StoreError, TxOutcome,
};
use crate::{admission::Admission, database::init_redis};

const ORPHANS: &str = "feedback:orphans";
const ENTRY_PATTERN: &str = "feedback:*";
const SCAN_BATCH: usize = 500;

// Hash tags pin these to slots 12182 and 5061.
const PROBE_A: &str = "capability:probe:{foo}";
const PROBE_B: &str = "capability:probe:{bar}";

const FIELD_CUSTOM_ID: &str = "custom_id";
const FIELD_NAME: &str = "name";
const FIELD_USER_ID: &str = "user_id";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_PAUSED: &str = "paused";
const FIELD_LIMIT: &str = "limit";
const FIELD_COUNT: &str = "count";
const FIELD_FIELDS: &str = "fields";
const FIELD_TIME_SPENT: &str = "time_spent";

/// 1 when incremented, 0 when the limit was reached, -1 when the form is gone.
static CONDITIONAL_INCREMENT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return -1
        end
        local limit = redis.call('HGET', KEYS[1], 'limit')
        local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
        if limit and count >= tonumber(limit) then
            return 0
        end
        redis.call('HINCRBY', KEYS[1], 'count', 1)
        redis.call('HINCRBYFLOAT', KEYS[1], 'time_spent', ARGV[1])
        return 1
        ",
    )
});

static INCREMENT_EXISTING: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        redis.call('HINCRBYFLOAT', KEYS[1], 'time_spent', ARGV[1])
        return redis.call('HINCRBY', KEYS[1], 'count', 1)
        ",
    )
});

/// ARGV: paused (`''` keeps), limit mode (`keep` | `clear` | `set`), limit.
/// Returns `{status, count}`: -1 missing form, 0 limit below count, 1 applied.
static UPDATE_SETTINGS: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return {-1, 0}
        end
        local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
        if ARGV[2] == 'set' and tonumber(ARGV[3]) < count then
            return {0, count}
        end
        if ARGV[1] ~= '' then
            redis.call('HSET', KEYS[1], 'paused', ARGV[1])
        end
        if ARGV[2] == 'set' then
            redis.call('HSET', KEYS[1], 'limit', ARGV[3])
        elseif ARGV[2] == 'clear' then
            redis.call('HDEL', KEYS[1], 'limit')
        end
        return {1, count}
        ",
    )
});

fn form_key(form_id: &str) -> String {
    format!("form:{form_id}")
}

fn views_key(form_id: &str) -> String {
    format!("form:views:{form_id}")
}

fn public_key(custom_id: &str) -> String {
    format!("form:public:{custom_id}")
}

fn owner_key(user_id: &str) -> String {
    format!("form:user:{user_id}")
}

fn entry_key(entry_id: &str) -> String {
    format!("feedback:{entry_id}")
}

fn index_key(custom_id: &str) -> String {
    format!("feedback:form:{custom_id}")
}

#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let connection = init_redis(&client).await?;

        Ok(Self { client, connection })
    }

    /// Connection owned by a single atomic unit.
    async fn dedicated(&self) -> Result<MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn load_form(
        &self,
        conn: &mut ConnectionManager,
        form_id: &str,
    ) -> Result<Option<Form>, StoreError> {
        let key = form_key(form_id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let mut form = decode_form(&key, form_id, &fields)?;
        let views: Option<u64> = conn.get(views_key(form_id)).await?;
        form.view_count = views.unwrap_or(0);

        Ok(Some(form))
    }

    async fn load_entries(
        &self,
        conn: &mut ConnectionManager,
        keys: &[String],
    ) -> Result<Vec<FeedbackEntry>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(conn).await?;

        Ok(raw
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str::<FeedbackEntry>(&json))
            .collect::<Result<Vec<_>, _>>()?)
    }
}

fn encode_form(form: &Form) -> Result<Vec<(&'static str, String)>, StoreError> {
    let mut fields = vec![
        (FIELD_CUSTOM_ID, form.custom_id.clone()),
        (FIELD_NAME, form.name.clone()),
        (FIELD_USER_ID, form.user_id.clone()),
        (FIELD_CREATED_AT, form.created_at.to_rfc3339()),
        (FIELD_FIELDS, serde_json::to_string(&form.fields)?),
        (FIELD_PAUSED, if form.state.paused { "1" } else { "0" }.to_string()),
        (FIELD_COUNT, form.state.count.to_string()),
        (FIELD_TIME_SPENT, form.total_time_spent.to_string()),
    ];

    if let Some(limit) = form.state.limit {
        fields.push((FIELD_LIMIT, limit.to_string()));
    }

    Ok(fields)
}

fn decode_form(
    key: &str,
    form_id: &str,
    fields: &HashMap<String, String>,
) -> Result<Form, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let text = |field: &str| -> Result<String, StoreError> {
        fields
            .get(field)
            .cloned()
            .ok_or_else(|| corrupt(format!("missing {field}")))
    };
    let number = |value: &str, field: &str| -> Result<u64, StoreError> {
        value
            .parse::<u64>()
            .map_err(|e| corrupt(format!("{field}: {e}")))
    };

    let created_at = DateTime::parse_from_rfc3339(&text(FIELD_CREATED_AT)?)
        .map_err(|e| corrupt(format!("{FIELD_CREATED_AT}: {e}")))?
        .with_timezone(&Utc);

    let limit = match fields.get(FIELD_LIMIT) {
        Some(value) => Some(number(value, FIELD_LIMIT)?),
        None => None,
    };

    let count = match fields.get(FIELD_COUNT) {
        Some(value) => number(value, FIELD_COUNT)?,
        None => 0,
    };

    let total_time_spent = match fields.get(FIELD_TIME_SPENT) {
        Some(value) => value
            .parse::<f64>()
            .map_err(|e| corrupt(format!("{FIELD_TIME_SPENT}: {e}")))?,
        None => 0.0,
    };

    let form_fields = match fields.get(FIELD_FIELDS) {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| corrupt(format!("{FIELD_FIELDS}: {e}")))?,
        None => Vec::new(),
    };

    Ok(Form {
        id: form_id.to_string(),
        custom_id: text(FIELD_CUSTOM_ID)?,
        name: text(FIELD_NAME)?,
        user_id: text(FIELD_USER_ID)?,
        created_at,
        fields: form_fields,
        state: FormState {
            paused: fields.get(FIELD_PAUSED).is_some_and(|v| v == "1"),
            limit,
            count,
        },
        view_count: 0,
        total_time_spent,
    })
}

/// Maps failures inside an atomic unit onto the retry contract.
fn classify_unit_error(err: RedisError) -> StoreError {
    match err.kind() {
        ErrorKind::CrossSlot => StoreError::Unsupported,
        ErrorKind::TryAgain | ErrorKind::BusyLoadingError => StoreError::Aborted(err.to_string()),
        _ if err.is_timeout() => StoreError::Timeout,
        _ => StoreError::Redis(err),
    }
}

fn is_connectivity(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_timeout()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
}

#[async_trait]
impl FeedbackStore for RedisStore {
    fn backend_tag(&self) -> &'static str {
        "redis"
    }

    async fn probe(&self) -> Result<Capability, StoreError> {
        let mut conn = self.dedicated().await?;

        let outcome = async {
            redis::cmd("WATCH")
                .arg(PROBE_A)
                .query_async::<()>(&mut conn)
                .await?;

            redis::pipe()
                .atomic()
                .set(PROBE_A, 1)
                .ignore()
                .set(PROBE_B, 1)
                .ignore()
                .del(&[PROBE_A, PROBE_B])
                .ignore()
                .query_async::<()>(&mut conn)
                .await
        }
        .await;

        match outcome {
            Ok(()) => Ok(Capability::Supported),
            Err(err) if is_connectivity(&err) => Err(err.into()),
            Err(err) => {
                warn!("Redis refused a multi-key transaction: {err}");
                Ok(Capability::Unsupported)
            }
        }
    }

    async fn find_form(&self, form_ref: &str) -> Result<Option<Form>, StoreError> {
        let mut conn = self.connection.clone();

        let mapped: Option<String> = conn.get(public_key(form_ref)).await?;
        let form_id = match mapped {
            Some(form_id) => form_id,
            None if is_internal_id(form_ref) => form_ref.to_string(),
            None => return Ok(None),
        };

        self.load_form(&mut conn, &form_id).await
    }

    async fn insert_form(&self, form: &Form) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        redis::pipe()
            .hset_multiple(form_key(&form.id), &encode_form(form)?)
            .ignore()
            .set(public_key(&form.custom_id), &form.id)
            .ignore()
            .sadd(owner_key(&form.user_id), &form.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn forms_for_user(&self, user_id: &str) -> Result<Vec<Form>, StoreError> {
        let mut conn = self.connection.clone();

        let ids: Vec<String> = conn.smembers(owner_key(user_id)).await?;

        let mut forms = Vec::with_capacity(ids.len());
        for form_id in ids {
            if let Some(form) = self.load_form(&mut conn, &form_id).await? {
                forms.push(form);
            }
        }
        forms.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(forms)
    }

    async fn record_view(&self, form_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.incr(views_key(form_id), 1).await?;

        Ok(())
    }

    async fn update_settings(
        &self,
        form_id: &str,
        settings: &FormSettings,
    ) -> Result<SettingsUpdate, StoreError> {
        let mut conn = self.connection.clone();

        let paused = match settings.paused {
            Some(true) => "1",
            Some(false) => "0",
            None => "",
        };
        let (mode, limit) = match settings.limit {
            None => ("keep", String::new()),
            Some(None) => ("clear", String::new()),
            Some(Some(limit)) => ("set", limit.to_string()),
        };

        let (status, count): (i64, i64) = UPDATE_SETTINGS
            .key(form_key(form_id))
            .arg(paused)
            .arg(mode)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;

        match status {
            1 => Ok(match self.load_form(&mut conn, form_id).await? {
                Some(form) => SettingsUpdate::Updated(form),
                None => SettingsUpdate::NotFound,
            }),
            0 => Ok(SettingsUpdate::LimitBelowCount {
                count: count.max(0) as u64,
            }),
            _ => Ok(SettingsUpdate::NotFound),
        }
    }

    async fn delete_form(&self, form: &Form) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let index = index_key(&form.custom_id);

        let ids: Vec<String> = conn.smembers(&index).await?;
        let orphaned: Vec<String> = conn.sinter(&[index.as_str(), ORPHANS]).await?;

        let mut pipe = redis::pipe();
        pipe.del(form_key(&form.id))
            .ignore()
            .del(views_key(&form.id))
            .ignore()
            .del(public_key(&form.custom_id))
            .ignore()
            .srem(owner_key(&form.user_id), &form.id)
            .ignore()
            .del(&index)
            .ignore();
        for id in &ids {
            pipe.del(entry_key(id)).ignore();
        }
        if !orphaned.is_empty() {
            pipe.srem(ORPHANS, &orphaned).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        Ok(ids.len().saturating_sub(orphaned.len()) as u64)
    }

    async fn entries_for_form(&self, custom_id: &str) -> Result<Vec<FeedbackEntry>, StoreError> {
        let mut conn = self.connection.clone();
        let index = index_key(custom_id);

        let ids: Vec<String> = conn.sdiff(&[index.as_str(), ORPHANS]).await?;
        let keys: Vec<String> = ids.iter().map(|id| entry_key(id)).collect();

        let mut entries = self.load_entries(&mut conn, &keys).await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(entries)
    }

    async fn search_entries(&self, query: &str) -> Result<Vec<FeedbackEntry>, StoreError> {
        let mut conn = self.connection.clone();
        let orphans: HashSet<String> = conn.smembers(ORPHANS).await?;

        let mut entries = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(ENTRY_PATTERN)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            // The pattern also matches the index and orphan sets.
            let keys: Vec<String> = keys
                .into_iter()
                .filter(|key| {
                    key.strip_prefix("feedback:")
                        .is_some_and(|id| is_internal_id(id) && !orphans.contains(id))
                })
                .collect();

            entries.extend(
                self.load_entries(&mut conn, &keys)
                    .await?
                    .into_iter()
                    .filter(|entry| entry.matches_query(query)),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(entries)
    }

    async fn has_entry(&self, entry_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();

        Ok(conn.exists(entry_key(entry_id)).await?)
    }

    async fn transact(
        &self,
        form_id: &str,
        entry: &FeedbackEntry,
        check: AdmissionCheck,
    ) -> Result<TxOutcome, StoreError> {
        // Dropping the connection on any early return discards the WATCH.
        let mut conn = self.dedicated().await?;
        let key = form_key(form_id);
        let entry_at = entry_key(&entry.id);

        redis::cmd("WATCH")
            .arg(&key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(classify_unit_error)?;

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(TxOutcome::NotFound);
        }

        let already_stored: bool = conn.exists(&entry_at).await?;
        if already_stored {
            debug!(entry = %entry.id, "Entry already committed by an earlier attempt");
            return Ok(TxOutcome::Committed);
        }

        let form = decode_form(&key, form_id, &fields)?;
        if let Admission::Reject(reason) = check(&form.state) {
            return Ok(TxOutcome::Rejected(reason));
        }

        let payload = serde_json::to_string(entry)?;
        let committed: Option<(i64,)> = redis::pipe()
            .atomic()
            .set(&entry_at, payload)
            .ignore()
            .sadd(index_key(&entry.form_id), &entry.id)
            .ignore()
            .hincr(&key, FIELD_TIME_SPENT, entry.time_on_page)
            .ignore()
            .hincr(&key, FIELD_COUNT, 1)
            .query_async(&mut conn)
            .await
            .map_err(classify_unit_error)?;

        match committed {
            Some(_) => Ok(TxOutcome::Committed),
            None => Err(StoreError::Aborted(format!("{key} changed while watched"))),
        }
    }

    async fn insert_entry(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let payload = serde_json::to_string(entry)?;

        redis::pipe()
            .set(entry_key(&entry.id), payload)
            .ignore()
            .sadd(index_key(&entry.form_id), &entry.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn delete_entry(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        redis::pipe()
            .del(entry_key(&entry.id))
            .ignore()
            .srem(index_key(&entry.form_id), &entry.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn increment_if_below_limit(
        &self,
        form_id: &str,
        time_on_page: f64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();

        let matched: i64 = CONDITIONAL_INCREMENT
            .key(form_key(form_id))
            .arg(time_on_page)
            .invoke_async(&mut conn)
            .await?;

        Ok(matched == 1)
    }

    async fn increment_count(&self, form_id: &str, time_on_page: f64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        let _: i64 = INCREMENT_EXISTING
            .key(form_key(form_id))
            .arg(time_on_page)
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn record_orphan(&self, entry: &FeedbackEntry) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.sadd(ORPHANS, &entry.id).await?;

        Ok(())
    }

    async fn orphans(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();

        Ok(conn.smembers(ORPHANS).await?)
    }

    async fn purge_orphan(&self, entry_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();

        let known: bool = conn.sismember(ORPHANS, entry_id).await?;
        if !known {
            return Ok(false);
        }

        let raw: Option<String> = conn.get(entry_key(entry_id)).await?;

        let mut pipe = redis::pipe();
        pipe.del(entry_key(entry_id))
            .ignore()
            .srem(ORPHANS, entry_id)
            .ignore();
        if let Some(entry) = raw.and_then(|json| serde_json::from_str::<FeedbackEntry>(&json).ok()) {
            pipe.srem(index_key(&entry.form_id), entry_id).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        Ok(true)
    }
}
