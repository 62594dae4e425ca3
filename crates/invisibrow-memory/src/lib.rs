//! SQLite-backed long-term memory for completed tasks, plus the
//! self-learning bot-keyword list used as the watchdog's fast pre-LLM filter.
//!
//! Two tables live in `memory.sqlite`:
//! - `memories`: one row per task, keyed by task id. Keywords are stored
//!   lowercased and comma-joined; only `status = 'success'` rows are
//!   returned by recall.
//! - `bot_keywords`: lowercased, trimmed intervention signals. A default set
//!   is seeded on first initialization and acts as a floor: if the table is
//!   ever observed empty, the defaults are re-seeded.
//!
//! Every bot-keyword write bumps an in-memory version counter so the
//! watchdog's cached list can be invalidated without re-reading the table on
//! each scan.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use invisibrow_types::InvisibrowError;

/// Maximum records returned by a recall query.
pub const MAX_RECALL_RESULTS: usize = 5;

/// Minimum character length for a self-learned keyword token.
pub const MIN_TOKEN_LEN: usize = 4;

/// Maximum tokens learned from a single text.
pub const MAX_TOKENS_PER_TEXT: usize = 12;

/// Intervention signals every fresh store starts with.
pub const DEFAULT_BOT_KEYWORDS: &[&str] = &[
    "captcha",
    "recaptcha",
    "hcaptcha",
    "verify you are human",
    "are you a robot",
    "unusual traffic",
    "security check",
    "access denied",
    "prove you are human",
    "cloudflare",
    "press and hold",
    "请完成验证",
];

/// A long-term recall entry. The id is the originating task's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub goal: String,
    /// Lowercased keywords; comma-joined in storage, split on read.
    pub keywords: Vec<String>,
    pub summary: String,
    /// Opaque structured payload extracted during the task.
    pub artifacts: Value,
    /// `success` or `failed`; only `success` is indexed for recall.
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// A self-learned intervention signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotKeyword {
    pub keyword: String,
    pub created_at: DateTime<Utc>,
}

/// Durable task-summary recall plus the bot-keyword list.
///
/// All operations are synchronous against the embedded database; the
/// connection is serialized behind a mutex, which is sufficient for
/// single-process multi-worker use.
pub struct MemoryStore {
    conn: Mutex<Connection>,
    keyword_version: AtomicU64,
}

impl MemoryStore {
    /// Open (or create) the memory database at the given path.
    ///
    /// Enables WAL mode, creates both tables if needed, and seeds the
    /// default bot keywords when the table is empty.
    pub fn open(path: &Path) -> Result<Self, InvisibrowError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| InvisibrowError::Memory(format!("create storage dir: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| InvisibrowError::Memory(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| InvisibrowError::Memory(format!("failed to set WAL mode: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id             TEXT PRIMARY KEY,
                goal           TEXT NOT NULL,
                keywords       TEXT NOT NULL,
                summary        TEXT NOT NULL,
                artifacts_json TEXT NOT NULL,
                status         TEXT NOT NULL,
                timestamp      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_keywords ON memories(keywords);

            CREATE TABLE IF NOT EXISTS bot_keywords (
                keyword    TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(|e| InvisibrowError::Memory(format!("failed to create schema: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
            keyword_version: AtomicU64::new(0),
        };
        let seeded = store.seed_defaults_if_empty()?;
        if seeded {
            info!(path = %path.display(), "memory store initialized with default bot keywords");
        }
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------------

    /// Insert or replace a record by id.
    ///
    /// Keywords are normalized (lowercased, trimmed, empties dropped) before
    /// being comma-joined for storage.
    pub fn save(&self, record: &MemoryRecord) -> Result<(), InvisibrowError> {
        let keywords = record
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        let artifacts = serde_json::to_string(&record.artifacts)
            .map_err(|e| InvisibrowError::Memory(format!("serialize artifacts: {e}")))?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO memories (id, goal, keywords, summary, artifacts_json, status, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.goal,
                keywords,
                record.summary,
                artifacts,
                record.status,
                record.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| InvisibrowError::Memory(format!("failed to save record: {e}")))?;
        debug!(id = %record.id, status = %record.status, "memory record saved");
        Ok(())
    }

    /// Recall up to [`MAX_RECALL_RESULTS`] successful records whose keyword
    /// column matches any of the given keywords (case-insensitive LIKE),
    /// newest first. Pure read with stable ordering.
    pub fn search(&self, keywords: &[String]) -> Result<Vec<MemoryRecord>, InvisibrowError> {
        let needles: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let clauses: Vec<String> = (0..needles.len())
            .map(|i| format!("keywords LIKE ?{}", i + 1))
            .collect();
        let sql = format!(
            "SELECT id, goal, keywords, summary, artifacts_json, status, timestamp
             FROM memories
             WHERE ({}) AND status = 'success'
             ORDER BY timestamp DESC
             LIMIT {MAX_RECALL_RESULTS}",
            clauses.join(" OR ")
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| InvisibrowError::Memory(format!("failed to prepare search: {e}")))?;
        let patterns: Vec<String> = needles.iter().map(|k| format!("%{k}%")).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(patterns.iter()), row_to_record)
            .map_err(|e| InvisibrowError::Memory(format!("failed to run search: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| InvisibrowError::Memory(format!("failed to read search row: {e}")))
    }

    /// Fetch a single record by id.
    pub fn get(&self, id: &str) -> Result<Option<MemoryRecord>, InvisibrowError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, goal, keywords, summary, artifacts_json, status, timestamp
                 FROM memories WHERE id = ?1",
            )
            .map_err(|e| InvisibrowError::Memory(format!("failed to prepare get: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], row_to_record)
            .map_err(|e| InvisibrowError::Memory(format!("failed to run get: {e}")))?;
        match rows.next() {
            Some(row) => row
                .map(Some)
                .map_err(|e| InvisibrowError::Memory(format!("failed to read row: {e}"))),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Bot keywords
    // -----------------------------------------------------------------------

    /// The current keyword list. The default set is a floor, not a ceiling:
    /// an empty table is re-seeded before returning.
    pub fn bot_keywords(&self) -> Result<Vec<String>, InvisibrowError> {
        self.seed_defaults_if_empty()?;
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT keyword FROM bot_keywords ORDER BY keyword ASC")
            .map_err(|e| InvisibrowError::Memory(format!("failed to prepare keywords: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| InvisibrowError::Memory(format!("failed to list keywords: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| InvisibrowError::Memory(format!("failed to read keyword: {e}")))
    }

    /// All keywords with creation times, for admin use.
    pub fn all_bot_keywords(&self) -> Result<Vec<BotKeyword>, InvisibrowError> {
        self.seed_defaults_if_empty()?;
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT keyword, created_at FROM bot_keywords ORDER BY created_at ASC")
            .map_err(|e| InvisibrowError::Memory(format!("failed to prepare keywords: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                let keyword: String = row.get(0)?;
                let created_at: String = row.get(1)?;
                Ok((keyword, created_at))
            })
            .map_err(|e| InvisibrowError::Memory(format!("failed to list keywords: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (keyword, created_at) =
                row.map_err(|e| InvisibrowError::Memory(format!("failed to read keyword: {e}")))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| InvisibrowError::Memory(format!("bad keyword timestamp: {e}")))?
                .into();
            out.push(BotKeyword {
                keyword,
                created_at,
            });
        }
        Ok(out)
    }

    /// Add one keyword: trimmed, lowercased, empties skipped,
    /// insert-or-ignore. Returns whether a new row was inserted.
    pub fn add_bot_keyword(&self, keyword: &str) -> Result<bool, InvisibrowError> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Ok(false);
        }
        let inserted = {
            let conn = self.lock_conn()?;
            conn.execute(
                "INSERT OR IGNORE INTO bot_keywords (keyword, created_at) VALUES (?1, ?2)",
                params![keyword, Utc::now().to_rfc3339()],
            )
            .map_err(|e| InvisibrowError::Memory(format!("failed to add keyword: {e}")))?
        };
        if inserted > 0 {
            self.keyword_version.fetch_add(1, Ordering::Relaxed);
            debug!(keyword = %keyword, "bot keyword learned");
        }
        Ok(inserted > 0)
    }

    /// Tokenize `text` and add each learnable token. Returns the number of
    /// newly inserted keywords.
    pub fn add_bot_keywords_from_text(&self, text: &str) -> Result<usize, InvisibrowError> {
        let mut added = 0;
        for token in tokenize_learnable(text) {
            if self.add_bot_keyword(&token)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove one keyword, for admin use.
    pub fn delete_bot_keyword(&self, keyword: &str) -> Result<bool, InvisibrowError> {
        let keyword = keyword.trim().to_lowercase();
        let deleted = {
            let conn = self.lock_conn()?;
            conn.execute(
                "DELETE FROM bot_keywords WHERE keyword = ?1",
                params![keyword],
            )
            .map_err(|e| InvisibrowError::Memory(format!("failed to delete keyword: {e}")))?
        };
        if deleted > 0 {
            self.keyword_version.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted > 0)
    }

    /// Monotonically increasing counter bumped by every keyword write.
    /// Callers caching the keyword list compare this on each use.
    pub fn keyword_version(&self) -> u64 {
        self.keyword_version.load(Ordering::Relaxed)
    }

    fn seed_defaults_if_empty(&self) -> Result<bool, InvisibrowError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bot_keywords", [], |row| row.get(0))
            .map_err(|e| InvisibrowError::Memory(format!("failed to count keywords: {e}")))?;
        if count > 0 {
            return Ok(false);
        }
        let now = Utc::now().to_rfc3339();
        for keyword in DEFAULT_BOT_KEYWORDS {
            conn.execute(
                "INSERT OR IGNORE INTO bot_keywords (keyword, created_at) VALUES (?1, ?2)",
                params![keyword, now],
            )
            .map_err(|e| InvisibrowError::Memory(format!("failed to seed keyword: {e}")))?;
        }
        drop(conn);
        self.keyword_version.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, InvisibrowError> {
        self.conn
            .lock()
            .map_err(|e| InvisibrowError::Memory(format!("connection lock poisoned: {e}")))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let keywords: String = row.get(2)?;
    let artifacts: String = row.get(4)?;
    let timestamp: String = row.get(6)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        goal: row.get(1)?,
        keywords: keywords
            .split(',')
            .map(str::to_string)
            .filter(|k| !k.is_empty())
            .collect(),
        summary: row.get(3)?,
        artifacts: serde_json::from_str(&artifacts).unwrap_or(Value::Null),
        status: row.get(5)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(Into::into)
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Extract learnable keyword tokens from free text.
///
/// Splits on non-alphanumeric boundaries, lowercases, keeps tokens of at
/// least [`MIN_TOKEN_LEN`] characters (alphanumeric and CJK both count),
/// dedupes preserving order, and caps at [`MAX_TOKENS_PER_TEXT`].
pub fn tokenize_learnable(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if out.len() >= MAX_TOKENS_PER_TEXT {
            break;
        }
        let token = raw.to_lowercase();
        if token.chars().count() < MIN_TOKEN_LEN {
            continue;
        }
        if seen.insert(token.clone()) {
            out.push(token);
        }
    }
    out
}
