use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};
use crate::period::PeriodWindow;
use crate::stats::TransactionSource;
use crate::transaction::{NewTransaction, Transaction, TransactionFilter, TransactionPatch};

const SELECT_COLUMNS: &str = "SELECT id, user_id, kind, amount, category, description,
        occurred_at, created_at, updated_at
 FROM transactions";

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// SQLite-backed transaction store.
///
/// Cloning is cheap: every clone shares the same connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database file in WAL mode.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        // journal_mode answers with the mode now in effect.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(path = %path.display(), "opened transaction database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> LedgerResult<Self> {
        setup_database(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    pub fn create(&self, user_id: &str, new: &NewTransaction) -> LedgerResult<Transaction> {
        new.validate().map_err(LedgerError::Validation)?;
        let now = Utc::now();
        let tx = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: new.kind,
            amount: new.amount,
            category: new.category.clone(),
            description: new.description.clone(),
            occurred_at: new.occurred_at.unwrap_or(now),
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock()?;
        insert_row(&conn, &tx, None)?;
        tracing::debug!(user_id, id = %tx.id, "created transaction");
        Ok(tx)
    }

    pub fn get(&self, user_id: &str, id: &str) -> LedgerResult<Transaction> {
        let conn = self.lock()?;
        find_row(&conn, user_id, id)?.ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    /// Newest first. Every filter field is optional; date bounds are inclusive.
    pub fn list(&self, user_id: &str, filter: &TransactionFilter) -> LedgerResult<Vec<Transaction>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE user_id = ?1");
        let mut args: Vec<String> = vec![user_id.to_string()];

        if let Some(kind) = filter.kind {
            args.push(kind.as_str().to_string());
            sql.push_str(&format!(" AND kind = ?{}", args.len()));
        }
        if let Some(category) = &filter.category {
            args.push(category.clone());
            sql.push_str(&format!(" AND category = ?{}", args.len()));
        }
        if let Some(start) = filter.start {
            args.push(encode_timestamp(start));
            sql.push_str(&format!(" AND occurred_at >= ?{}", args.len()));
        }
        if let Some(end) = filter.end {
            args.push(encode_timestamp(end));
            sql.push_str(&format!(" AND occurred_at <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY occurred_at DESC, created_at DESC");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::into_transaction).collect()
    }

    pub fn update(
        &self,
        user_id: &str,
        id: &str,
        patch: &TransactionPatch,
    ) -> LedgerResult<Transaction> {
        patch.validate().map_err(LedgerError::Validation)?;

        let conn = self.lock()?;
        let mut tx = find_row(&conn, user_id, id)?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        if patch.is_empty() {
            return Ok(tx);
        }

        patch.apply_to(&mut tx);
        tx.updated_at = Utc::now();

        conn.execute(
            "UPDATE transactions
             SET kind = ?1, amount = ?2, category = ?3, description = ?4,
                 occurred_at = ?5, updated_at = ?6
             WHERE id = ?7 AND user_id = ?8",
            params![
                tx.kind.as_str(),
                tx.amount,
                tx.category,
                tx.description,
                encode_timestamp(tx.occurred_at),
                encode_timestamp(tx.updated_at),
                tx.id,
                tx.user_id,
            ],
        )?;
        tracing::debug!(user_id, id, "updated transaction");
        Ok(tx)
    }

    pub fn delete(&self, user_id: &str, id: &str) -> LedgerResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM transactions WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if removed == 0 {
            return Err(LedgerError::NotFound(id.to_string()));
        }
        tracing::debug!(user_id, id, "deleted transaction");
        Ok(())
    }

    pub fn count(&self, user_id: &str) -> LedgerResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // WINDOW FETCH
    // ========================================================================

    /// Transactions of `user_id` with `window.start <= occurred_at <= window.end`.
    pub fn transactions_in_window(
        &self,
        user_id: &str,
        window: &PeriodWindow,
    ) -> LedgerResult<Vec<Transaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE user_id = ?1 AND occurred_at >= ?2 AND occurred_at <= ?3
             ORDER BY occurred_at"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    encode_timestamp(window.start),
                    encode_timestamp(window.end)
                ],
                read_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(user_id, count = rows.len(), "fetched window transactions");
        rows.into_iter().map(RawRow::into_transaction).collect()
    }

    // ========================================================================
    // IMPORT
    // ========================================================================

    /// Inserts every valid row inside one SQLite transaction. Rows already
    /// imported (same idempotency hash) are skipped and counted.
    pub fn import(&self, user_id: &str, rows: &[NewTransaction]) -> LedgerResult<ImportSummary> {
        for (index, row) in rows.iter().enumerate() {
            row.validate().map_err(|mut errors| {
                for error in &mut errors {
                    error.message = format!("row {}: {}", index + 1, error.message);
                }
                LedgerError::Validation(errors)
            })?;
        }

        let mut conn = self.lock()?;
        let db_tx = conn.transaction()?;
        let mut summary = ImportSummary::default();
        let mut occurrences: HashMap<String, usize> = HashMap::new();
        let now = Utc::now();

        for row in rows {
            let tx = Transaction {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                kind: row.kind,
                amount: row.amount,
                category: row.category.clone(),
                description: row.description.clone(),
                occurred_at: row.occurred_at.unwrap_or(now),
                created_at: now,
                updated_at: now,
            };
            // Identical lines inside one file are distinct purchases: the nth
            // copy gets its own key, so only a re-import collides.
            let occurrence = occurrences.entry(import_key(&tx)).or_insert(0);
            *occurrence += 1;
            let hash = import_hash(&tx, *occurrence);

            match insert_row(&db_tx, &tx, Some(&hash)) {
                Ok(()) => summary.inserted += 1,
                Err(LedgerError::Database(err)) if is_unique_violation(&err) => {
                    summary.duplicates += 1;
                }
                Err(e) => return Err(e),
            }
        }

        db_tx.commit()?;
        tracing::info!(
            user_id,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "imported transactions"
        );
        Ok(summary)
    }
}

impl TransactionSource for SqliteStore {
    type Error = LedgerError;

    fn fetch_transactions(
        &self,
        user_id: &str,
        window: &PeriodWindow,
    ) -> impl Future<Output = Result<Vec<Transaction>, Self::Error>> + Send {
        // Runs to completion before returning; the lock never outlives this call.
        std::future::ready(self.transactions_in_window(user_id, window))
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> LedgerResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('INCOME', 'EXPENSE')),
            amount REAL NOT NULL CHECK (amount > 0),
            category TEXT NOT NULL,
            description TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            import_hash TEXT UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_user_occurred
            ON transactions(user_id, occurred_at);
        CREATE INDEX IF NOT EXISTS idx_transactions_user_category
            ON transactions(user_id, category);",
    )?;
    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Fixed-width UTC text (nanosecond precision), so SQLite string comparison
/// orders the same way as the instants do.
pub fn encode_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_timestamp(raw: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::CorruptRow(format!("bad timestamp '{raw}': {e}")))
}

fn import_key(tx: &Transaction) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        tx.user_id,
        tx.kind,
        tx.amount,
        tx.category,
        tx.description,
        encode_timestamp(tx.occurred_at)
    )
}

/// Idempotency key for imported rows. Identity stays the UUID; this only
/// detects re-imports of the same line. `occurrence` is 1 for the first copy
/// of a row within a batch, 2 for the second, and so on.
pub fn import_hash(tx: &Transaction, occurrence: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}", import_key(tx), occurrence));
    format!("{:x}", hasher.finalize())
}

/// Only a UNIQUE clash means "already imported"; CHECK and NOT NULL
/// failures are real errors.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn insert_row(conn: &Connection, tx: &Transaction, hash: Option<&str>) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO transactions (
            id, user_id, kind, amount, category, description,
            occurred_at, import_hash, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            tx.id,
            tx.user_id,
            tx.kind.as_str(),
            tx.amount,
            tx.category,
            tx.description,
            encode_timestamp(tx.occurred_at),
            hash,
            encode_timestamp(tx.created_at),
            encode_timestamp(tx.updated_at),
        ],
    )?;
    Ok(())
}

fn find_row(conn: &Connection, user_id: &str, id: &str) -> LedgerResult<Option<Transaction>> {
    let raw = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            read_row,
        )
        .optional()?;
    raw.map(RawRow::into_transaction).transpose()
}

/// Column values as stored, before enum and timestamp decoding.
struct RawRow {
    id: String,
    user_id: String,
    kind: String,
    amount: f64,
    category: String,
    description: String,
    occurred_at: String,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        amount: row.get(3)?,
        category: row.get(4)?,
        description: row.get(5)?,
        occurred_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl RawRow {
    fn into_transaction(self) -> LedgerResult<Transaction> {
        let kind = self
            .kind
            .parse()
            .map_err(|e| LedgerError::CorruptRow(format!("transaction {}: {e}", self.id)))?;
        Ok(Transaction {
            kind,
            amount: self.amount,
            occurred_at: decode_timestamp(&self.occurred_at)?,
            created_at: decode_timestamp(&self.created_at)?,
            updated_at: decode_timestamp(&self.updated_at)?,
            id: self.id,
            user_id: self.user_id,
            category: self.category,
            description: self.description,
        })
    }
}
