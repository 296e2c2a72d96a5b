// crates/tollgate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Governance Stores
// Description: Durable counter, usage, ledger, and conversation storage.
// Purpose: Provide atomic store primitives shared across gateway instances.
// Dependencies: tollgate-core, rusqlite
// ============================================================================

//! ## Overview
//! One SQLite database holds every governance table. Each check-and-increment
//! is a single SQL statement (upsert-increment with `RETURNING`, a
//! conditional `UPDATE ... WHERE`, or an `INSERT OR IGNORE` test-and-set),
//! so two concurrent requests can never both observe an under-limit value.
//! Multi-statement conversation mutations run inside one transaction, which
//! serializes them at the database.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use thiserror::Error;
use time::OffsetDateTime;
use tollgate_core::BudgetLedgerEntry;
use tollgate_core::ConversationId;
use tollgate_core::ConversationRecord;
use tollgate_core::ConversationState;
use tollgate_core::ConversationStore;
use tollgate_core::ConversationStoreError;
use tollgate_core::CounterKey;
use tollgate_core::CounterSample;
use tollgate_core::CounterStore;
use tollgate_core::CounterStoreError;
use tollgate_core::DailyTokenUsage;
use tollgate_core::DayStamp;
use tollgate_core::LedgerStore;
use tollgate_core::LedgerStoreError;
use tollgate_core::ReserveOutcome;
use tollgate_core::SubjectId;
use tollgate_core::TurnRecord;
use tollgate_core::UsageStore;
use tollgate_core::UsageStoreError;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Schema applied on open; idempotent.
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS counters (key TEXT PRIMARY KEY, count INTEGER \
                      NOT NULL, expires_at INTEGER NOT NULL);CREATE INDEX IF NOT EXISTS \
                      idx_counters_expiry ON counters(expires_at);CREATE TABLE IF NOT EXISTS \
                      daily_usage (subject TEXT NOT NULL, day TEXT NOT NULL, tokens INTEGER NOT \
                      NULL, requests INTEGER NOT NULL, PRIMARY KEY(subject, day));CREATE TABLE \
                      IF NOT EXISTS budget_ledger (day TEXT PRIMARY KEY, total_spend INTEGER NOT \
                      NULL, requests INTEGER NOT NULL, tokens INTEGER NOT NULL);CREATE TABLE IF \
                      NOT EXISTS ledger_subjects (day TEXT NOT NULL, subject TEXT NOT NULL, \
                      PRIMARY KEY(day, subject));CREATE TABLE IF NOT EXISTS budget_alerts (day \
                      TEXT NOT NULL, pct INTEGER NOT NULL, PRIMARY KEY(day, pct));CREATE TABLE \
                      IF NOT EXISTS conversations (id INTEGER PRIMARY KEY AUTOINCREMENT, owner \
                      TEXT NOT NULL, total_tokens INTEGER NOT NULL, state TEXT NOT NULL, summary \
                      TEXT, created_at_ms INTEGER NOT NULL);CREATE TABLE IF NOT EXISTS turns \
                      (conversation_id INTEGER NOT NULL, seq INTEGER NOT NULL, user_text TEXT \
                      NOT NULL, assistant_text TEXT NOT NULL, tokens INTEGER NOT NULL, PRIMARY \
                      KEY(conversation_id, seq));";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Busy timeout in milliseconds for contended writes.
    pub busy_timeout_ms: u64,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// SQLite governance store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Underlying SQLite error.
    #[error("sqlite store error: {0}")]
    Sqlite(String),
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// SQLite-backed governance store implementing every store seam.
pub struct SqliteGovernanceStore {
    /// Shared SQLite connection.
    connection: Mutex<Connection>,
}

impl SqliteGovernanceStore {
    /// Opens (and migrates) a governance store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(&config.path)
            .map_err(|err| SqliteStoreError::Sqlite(err.to_string()))?;
        let pragmas = format!(
            "PRAGMA journal_mode=WAL;PRAGMA synchronous=FULL;PRAGMA busy_timeout={};",
            config.busy_timeout_ms
        );
        conn.execute_batch(&pragmas)
            .map_err(|err| SqliteStoreError::Sqlite(err.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|err| SqliteStoreError::Sqlite(err.to_string()))?;
        Ok(Self {
            connection: Mutex::new(conn),
        })
    }

    /// Locks the connection, mapping poisoning to a stable message.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Sqlite("connection mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Counter Store
// ============================================================================

impl CounterStore for SqliteGovernanceStore {
    fn increment(
        &self,
        key: &CounterKey,
        now: OffsetDateTime,
    ) -> Result<CounterSample, CounterStoreError> {
        let now_secs = now.unix_timestamp();
        let expires_at = key.expires_at();
        let conn = self
            .lock()
            .map_err(|err| CounterStoreError::Unavailable(err.to_string()))?;
        conn.execute("DELETE FROM counters WHERE expires_at <= ?1", params![now_secs])
            .map_err(|err| CounterStoreError::Unavailable(err.to_string()))?;
        let count: i64 = conn
            .query_row(
                "INSERT INTO counters (key, count, expires_at) VALUES (?1, 1, ?2) ON \
                 CONFLICT(key) DO UPDATE SET count = count + 1 RETURNING count",
                params![key.storage_key(), expires_at],
                |row| row.get(0),
            )
            .map_err(|err| CounterStoreError::Unavailable(err.to_string()))?;
        drop(conn);
        let ttl = expires_at - now_secs;
        Ok(CounterSample {
            count: u64::try_from(count).unwrap_or(u64::MAX),
            ttl_secs: u64::try_from(ttl).unwrap_or(1).max(1),
        })
    }
}

// ============================================================================
// SECTION: Usage Store
// ============================================================================

impl UsageStore for SqliteGovernanceStore {
    fn usage(
        &self,
        subject: &SubjectId,
        day: DayStamp,
    ) -> Result<DailyTokenUsage, UsageStoreError> {
        let conn = self.lock().map_err(|err| UsageStoreError::Storage(err.to_string()))?;
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT tokens, requests FROM daily_usage WHERE subject = ?1 AND day = ?2",
                params![subject.as_str(), day.key()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| UsageStoreError::Storage(err.to_string()))?;
        drop(conn);
        let (tokens, requests) = row.unwrap_or((0, 0));
        Ok(DailyTokenUsage {
            subject: subject.clone(),
            day,
            tokens_used: u64::try_from(tokens).unwrap_or(0),
            request_count: u64::try_from(requests).unwrap_or(0),
        })
    }

    fn add_usage(
        &self,
        subject: &SubjectId,
        day: DayStamp,
        tokens: u64,
    ) -> Result<(), UsageStoreError> {
        let conn = self.lock().map_err(|err| UsageStoreError::Storage(err.to_string()))?;
        conn.execute(
            "INSERT INTO daily_usage (subject, day, tokens, requests) VALUES (?1, ?2, ?3, 1) ON \
             CONFLICT(subject, day) DO UPDATE SET tokens = tokens + excluded.tokens, requests = \
             requests + 1",
            params![subject.as_str(), day.key(), i64::try_from(tokens).unwrap_or(i64::MAX)],
        )
        .map_err(|err| UsageStoreError::Storage(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Ledger Store
// ============================================================================

impl LedgerStore for SqliteGovernanceStore {
    fn reserve(
        &self,
        day: DayStamp,
        estimate_minor: u64,
        cap_minor: u64,
    ) -> Result<ReserveOutcome, LedgerStoreError> {
        let estimate = i64::try_from(estimate_minor).unwrap_or(i64::MAX);
        let cap = i64::try_from(cap_minor).unwrap_or(i64::MAX);
        let conn = self.lock().map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        conn.execute(
            "INSERT OR IGNORE INTO budget_ledger (day, total_spend, requests, tokens) VALUES \
             (?1, 0, 0, 0)",
            params![day.key()],
        )
        .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        let reserved: Option<i64> = conn
            .query_row(
                "UPDATE budget_ledger SET total_spend = total_spend + ?2 WHERE day = ?1 AND \
                 total_spend + ?2 <= ?3 RETURNING total_spend",
                params![day.key(), estimate, cap],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        if let Some(total_after) = reserved {
            drop(conn);
            return Ok(ReserveOutcome::Reserved {
                total_after: u64::try_from(total_after).unwrap_or(0),
            });
        }
        let total: i64 = conn
            .query_row(
                "SELECT total_spend FROM budget_ledger WHERE day = ?1",
                params![day.key()],
                |row| row.get(0),
            )
            .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        drop(conn);
        Ok(ReserveOutcome::Exhausted {
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    fn commit(
        &self,
        day: DayStamp,
        actual_minor: u64,
        tokens: u64,
        subject: Option<&SubjectId>,
    ) -> Result<BudgetLedgerEntry, LedgerStoreError> {
        let mut conn = self.lock().map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        let tx = conn.transaction().map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        tx.execute(
            "INSERT OR IGNORE INTO budget_ledger (day, total_spend, requests, tokens) VALUES \
             (?1, 0, 0, 0)",
            params![day.key()],
        )
        .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        tx.execute(
            "UPDATE budget_ledger SET total_spend = total_spend + ?2, requests = requests + 1, \
             tokens = tokens + ?3 WHERE day = ?1",
            params![
                day.key(),
                i64::try_from(actual_minor).unwrap_or(i64::MAX),
                i64::try_from(tokens).unwrap_or(i64::MAX),
            ],
        )
        .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        if let Some(subject) = subject {
            tx.execute(
                "INSERT OR IGNORE INTO ledger_subjects (day, subject) VALUES (?1, ?2)",
                params![day.key(), subject.as_str()],
            )
            .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        }
        let entry = read_ledger_entry(&tx, day)?;
        tx.commit().map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        Ok(entry)
    }

    fn entry(&self, day: DayStamp) -> Result<BudgetLedgerEntry, LedgerStoreError> {
        let conn = self.lock().map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        read_ledger_entry(&conn, day)
    }

    fn mark_alerted(&self, day: DayStamp, threshold_pct: u8) -> Result<bool, LedgerStoreError> {
        let conn = self.lock().map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO budget_alerts (day, pct) VALUES (?1, ?2)",
                params![day.key(), i64::from(threshold_pct)],
            )
            .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
        Ok(changed == 1)
    }
}

/// Reads the day's ledger entry plus its distinct-subject count.
fn read_ledger_entry(
    conn: &Connection,
    day: DayStamp,
) -> Result<BudgetLedgerEntry, LedgerStoreError> {
    let row: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT total_spend, requests, tokens FROM budget_ledger WHERE day = ?1",
            params![day.key()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
    let Some((total_spend, requests, tokens)) = row else {
        return Ok(BudgetLedgerEntry::zero(day));
    };
    let subjects: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM ledger_subjects WHERE day = ?1",
            params![day.key()],
            |row| row.get(0),
        )
        .map_err(|err| LedgerStoreError::Storage(err.to_string()))?;
    Ok(BudgetLedgerEntry {
        day,
        total_spend_minor: u64::try_from(total_spend).unwrap_or(0),
        request_count: u64::try_from(requests).unwrap_or(0),
        token_count: u64::try_from(tokens).unwrap_or(0),
        unique_subject_count: u64::try_from(subjects).unwrap_or(0),
    })
}

// ============================================================================
// SECTION: Conversation Store
// ============================================================================

/// Parses a conversation identifier minted by this store (`c<rowid>`).
fn parse_conversation_rowid(id: &ConversationId) -> Option<i64> {
    id.as_str().strip_prefix('c').and_then(|raw| raw.parse::<i64>().ok())
}

/// Maps a conversation row into the core record type.
fn conversation_record(
    rowid: i64,
    owner: String,
    total_tokens: i64,
    state: &str,
    summary: Option<String>,
    created_at_ms: i64,
) -> Result<ConversationRecord, ConversationStoreError> {
    let state = ConversationState::from_label(state).ok_or_else(|| {
        ConversationStoreError::Storage(format!("unknown conversation state: {state}"))
    })?;
    Ok(ConversationRecord {
        id: ConversationId::new(format!("c{rowid}")),
        owner,
        total_tokens: u64::try_from(total_tokens).unwrap_or(0),
        state,
        summary_context: summary,
        created_at_ms,
    })
}

impl ConversationStore for SqliteGovernanceStore {
    fn create(
        &self,
        owner: &str,
        summary_context: Option<String>,
        created_at_ms: i64,
    ) -> Result<ConversationRecord, ConversationStoreError> {
        let conn = self.lock().map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        conn.execute(
            "INSERT INTO conversations (owner, total_tokens, state, summary, created_at_ms) \
             VALUES (?1, 0, 'active', ?2, ?3)",
            params![owner, summary_context.as_deref(), created_at_ms],
        )
        .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let rowid = conn.last_insert_rowid();
        drop(conn);
        Ok(ConversationRecord {
            id: ConversationId::new(format!("c{rowid}")),
            owner: owner.to_string(),
            total_tokens: 0,
            state: ConversationState::Active,
            summary_context,
            created_at_ms,
        })
    }

    fn load(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationRecord>, ConversationStoreError> {
        let Some(rowid) = parse_conversation_rowid(id) else {
            return Ok(None);
        };
        let conn = self.lock().map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let row: Option<(String, i64, String, Option<String>, i64)> = conn
            .query_row(
                "SELECT owner, total_tokens, state, summary, created_at_ms FROM conversations \
                 WHERE id = ?1",
                params![rowid],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                },
            )
            .optional()
            .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        drop(conn);
        row.map(|(owner, total, state, summary, created)| {
            conversation_record(rowid, owner, total, &state, summary, created)
        })
        .transpose()
    }

    fn append_turn(
        &self,
        id: &ConversationId,
        user_text: &str,
        assistant_text: &str,
        tokens: u64,
        ceiling: u64,
    ) -> Result<ConversationRecord, ConversationStoreError> {
        let rowid =
            parse_conversation_rowid(id).ok_or(ConversationStoreError::NotFound)?;
        let mut conn =
            self.lock().map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let tx =
            conn.transaction().map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let row: Option<(String, i64, String, Option<String>, i64)> = tx
            .query_row(
                "SELECT owner, total_tokens, state, summary, created_at_ms FROM conversations \
                 WHERE id = ?1",
                params![rowid],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                },
            )
            .optional()
            .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let Some((owner, total, state, summary, created)) = row else {
            return Err(ConversationStoreError::NotFound);
        };
        let mut record = conversation_record(rowid, owner, total, &state, summary, created)?;
        record
            .note_usage(tokens, ceiling)
            .map_err(|_| ConversationStoreError::Archived)?;
        tx.execute(
            "UPDATE conversations SET total_tokens = ?2, state = ?3 WHERE id = ?1",
            params![
                rowid,
                i64::try_from(record.total_tokens).unwrap_or(i64::MAX),
                record.state.as_str(),
            ],
        )
        .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        tx.execute(
            "INSERT INTO turns (conversation_id, seq, user_text, assistant_text, tokens) VALUES \
             (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM turns WHERE conversation_id = ?1), ?2, \
             ?3, ?4)",
            params![rowid, user_text, assistant_text, i64::try_from(tokens).unwrap_or(i64::MAX)],
        )
        .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        Ok(record)
    }

    fn transcript(&self, id: &ConversationId) -> Result<Vec<TurnRecord>, ConversationStoreError> {
        let rowid =
            parse_conversation_rowid(id).ok_or(ConversationStoreError::NotFound)?;
        let conn = self.lock().map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM conversations WHERE id = ?1", params![rowid], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        if exists.is_none() {
            return Err(ConversationStoreError::NotFound);
        }
        let mut stmt = conn
            .prepare(
                "SELECT seq, user_text, assistant_text, tokens FROM turns WHERE conversation_id \
                 = ?1 ORDER BY seq",
            )
            .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let turns = stmt
            .query_map(params![rowid], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|err| ConversationStoreError::Storage(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        drop(stmt);
        drop(conn);
        Ok(turns
            .into_iter()
            .map(|(seq, user_text, assistant_text, tokens)| TurnRecord {
                conversation_id: id.clone(),
                seq: u64::try_from(seq).unwrap_or(0),
                user_text,
                assistant_text,
                tokens_used: u64::try_from(tokens).unwrap_or(0),
            })
            .collect())
    }

    fn archive(&self, id: &ConversationId) -> Result<(), ConversationStoreError> {
        let rowid =
            parse_conversation_rowid(id).ok_or(ConversationStoreError::NotFound)?;
        let conn = self.lock().map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        let changed = conn
            .execute(
                "UPDATE conversations SET state = 'archived' WHERE id = ?1",
                params![rowid],
            )
            .map_err(|err| ConversationStoreError::Storage(err.to_string()))?;
        drop(conn);
        if changed == 0 {
            return Err(ConversationStoreError::NotFound);
        }
        Ok(())
    }
}
