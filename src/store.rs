// 🗄️ Transaction Store - SQLite sink for canonical records
//
// Persistence for the pipeline's output ledger. Stays out of the
// per-message hot path: the CLI (or any embedding caller) writes finished
// records here in bulk. Duplicate protection is two-layered: a uniqueness
// guard over (date, payee, amount, account_id) plus a stored idempotency
// hash for audit queries.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

use crate::cards::AccountType;
use crate::schema::{Confidence, TransactionRecord, Urgency};
use crate::state::TransactionState;

/// Compute the idempotency hash for a record.
/// For deduplication audits, not identity; identity is the record id.
pub fn idempotency_hash(record: &TransactionRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}",
        record.date.as_deref().unwrap_or(""),
        record.amount.map(|a| a.to_string()).unwrap_or_default(),
        record.payee.as_deref().unwrap_or(""),
        record.account_id.as_deref().unwrap_or(""),
    ));
    format!("{:x}", hasher.finalize())
}

pub struct TransactionStore {
    conn: Connection,
}

impl TransactionStore {
    /// Open (or create) a store at the given path and initialize the
    /// schema. WAL mode for concurrent readers.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                date TEXT,
                amount REAL,
                currency TEXT,
                payee TEXT,
                normalized_merchant TEXT,
                category TEXT,
                subcategory TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                account_id TEXT,
                account_type TEXT,
                interest_rate REAL,
                urgency TEXT NOT NULL,
                confidence TEXT NOT NULL,
                transaction_state TEXT NOT NULL,
                text_repaired INTEGER NOT NULL DEFAULT 0,
                extracted_date_raw TEXT,
                idempotency_hash TEXT NOT NULL,
                UNIQUE(date, payee, amount, account_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_payee ON transactions(payee)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category)",
            [],
        )?;

        Ok(TransactionStore { conn })
    }

    /// Insert one record. Returns `false` when the uniqueness guard
    /// identified it as a duplicate and skipped it.
    pub fn insert(&self, record: &TransactionRecord) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO transactions (
                id, date, amount, currency, payee, normalized_merchant,
                category, subcategory, tags, account_id, account_type,
                interest_rate, urgency, confidence, transaction_state,
                text_repaired, extracted_date_raw, idempotency_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                record.id,
                record.date,
                record.amount,
                record.currency,
                record.payee,
                record.normalized_merchant,
                record.category,
                record.subcategory,
                serde_json::to_string(&record.tags).unwrap_or_else(|_| "[]".to_string()),
                record.account_id,
                record.account_type.map(|t| t.as_str()),
                record.interest_rate,
                record.urgency.as_str(),
                record.confidence.as_str(),
                record.transaction_state.as_str(),
                record.text_repaired as i64,
                record.extracted_date_raw,
                idempotency_hash(record),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Insert a batch; returns how many rows were actually new.
    pub fn insert_batch(&self, records: &[TransactionRecord]) -> Result<usize> {
        let mut inserted = 0;
        for record in records {
            if self.insert(record)? {
                inserted += 1;
            }
        }
        info!(
            total = records.len(),
            inserted,
            duplicates = records.len() - inserted,
            "inserted record batch"
        );
        Ok(inserted)
    }

    pub fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<TransactionRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE id = ?1", SELECT_RECORDS))?;
        let mut rows = stmt.query_map(params![id], row_to_record)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn query_by_category(&self, category: &str) -> Result<Vec<TransactionRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE category = ?1 ORDER BY date", SELECT_RECORDS))?;
        let rows = stmt.query_map(params![category], row_to_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read records by category")
    }

    pub fn query_date_range(&self, from: &str, to: &str) -> Result<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE date >= ?1 AND date <= ?2 ORDER BY date",
            SELECT_RECORDS
        ))?;
        let rows = stmt.query_map(params![from, to], row_to_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read records by date range")
    }

    pub fn query_by_account(&self, account_id: &str) -> Result<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE account_id = ?1 ORDER BY date",
            SELECT_RECORDS
        ))?;
        let rows = stmt.query_map(params![account_id], row_to_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read records by account")
    }
}

const SELECT_RECORDS: &str = "SELECT id, date, amount, currency, payee, normalized_merchant,
    category, subcategory, tags, account_id, account_type, interest_rate,
    urgency, confidence, transaction_state, text_repaired, extracted_date_raw
    FROM transactions";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let tags: String = row.get(8)?;
    let account_type: Option<String> = row.get(10)?;
    let urgency: String = row.get(12)?;
    let confidence: String = row.get(13)?;
    let state: String = row.get(14)?;
    let text_repaired: i64 = row.get(15)?;

    Ok(TransactionRecord {
        id: row.get(0)?,
        date: row.get(1)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        payee: row.get(4)?,
        normalized_merchant: row.get(5)?,
        category: row.get(6)?,
        subcategory: row.get(7)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        account_id: row.get(9)?,
        account_type: account_type.map(|t| AccountType::parse(&t)),
        interest_rate: row.get(11)?,
        urgency: Urgency::parse(&urgency),
        confidence: Confidence::parse(&confidence),
        transaction_state: TransactionState::parse(&state),
        text_repaired: text_repaired != 0,
        extracted_date_raw: row.get(16)?,
        // ML fields are not persisted; they live on the in-flight record
        ml_category: None,
        ml_category_score: None,
        ml_category_confidence: None,
    })
}

// ============================================================================
// TESTS
// ============================================================================
