// Generic store implementation using JSONL + SQLite

use crate::filter::{Filter, FilterOp, like_pattern};
use crate::jsonl;
use crate::record::{IndexValue, Record};
use eyre::{Context, Result, eyre};
use fs2::FileExt;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CURRENT_VERSION: u32 = 1;
const STORE_DIR: &str = ".taskability";
const DB_FILE: &str = "taskability.db";
const WRITE_LOCK_FILE: &str = "write.lock";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Generic persistent store with SQLite cache and JSONL source of truth
pub struct Store {
    base_path: PathBuf,
    db: Connection,
}

/// Exclusive lock shared by every handle and process writing to one store
///
/// Released when dropped.
pub struct WriteLock {
    file: File,
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = ?e, "Failed to release write lock");
        }
    }
}

/// A set of writes that commit together or not at all
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

#[derive(Debug)]
enum WriteOp {
    Put {
        collection: &'static str,
        id: String,
        data_json: String,
        updated_at: i64,
        sort_key: i64,
        indexes: HashMap<String, IndexValue>,
    },
    Delete {
        collection: &'static str,
        id: String,
        updated_at: i64,
    },
}

impl WriteOp {
    fn collection(&self) -> &'static str {
        match self {
            WriteOp::Put { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }

    fn id(&self) -> &str {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }

    fn log_line(&self) -> String {
        match self {
            WriteOp::Put { data_json, .. } => data_json.clone(),
            WriteOp::Delete { id, updated_at, .. } => jsonl::tombstone(id, *updated_at).to_string(),
        }
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an insert-or-replace of a record
    pub fn put<T: Record>(&mut self, record: &T) -> Result<()> {
        let data_json = serde_json::to_string(record).context("Failed to serialize record")?;
        self.ops.push(WriteOp::Put {
            collection: T::collection_name(),
            id: record.id().to_string(),
            data_json,
            updated_at: record.updated_at(),
            sort_key: record.sort_key(),
            indexes: record.indexed_fields(),
        });
        Ok(())
    }

    /// Stage a deletion; it is logged as a tombstone
    pub fn delete<T: Record>(&mut self, id: &str, updated_at: i64) {
        self.ops.push(WriteOp::Delete {
            collection: T::collection_name(),
            id: id.to_string(),
            updated_at,
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Store {
    /// Open or create a store at the given path
    ///
    /// The store will be created in a `.taskability` subdirectory of the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, |_| Ok(()))
    }

    /// Open a store, passing `reindex` to the sync that runs if the cache is stale
    pub fn open_with<P, F>(path: P, reindex: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: FnOnce(&Transaction) -> Result<()>,
    {
        let base_path = path.as_ref().join(STORE_DIR);

        // Create directory if it doesn't exist
        fs::create_dir_all(&base_path).context("Failed to create store directory")?;

        // Open SQLite database
        let db_path = base_path.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets read-only connections run alongside the writer
        let mode: String = db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "Opened SQLite database");

        let mut store = Self {
            base_path: base_path.clone(),
            db,
        };

        // Initialize schema
        store.create_schema()?;

        // Write .gitignore
        store.create_gitignore()?;

        // Write/check version
        store.write_version()?;

        // Sync if stale
        if store.is_stale()? {
            info!("Database is stale, syncing from JSONL files");
            store.sync_with(reindex)?;
        }

        Ok(store)
    }

    /// Get the base path of this store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the SQLite cache file
    pub fn db_path(&self) -> PathBuf {
        self.base_path.join(DB_FILE)
    }

    /// Path of the JSONL log for a collection
    pub fn jsonl_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    /// Create database schema
    fn create_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        self.db.execute_batch(
            r#"
            -- Generic records table
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                sort_key INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);
            CREATE INDEX IF NOT EXISTS idx_records_sort_key ON records(collection, sort_key, id);

            -- Generic indexes table (for filtering on indexed fields)
            CREATE TABLE IF NOT EXISTS record_indexes (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                field_name TEXT NOT NULL,
                field_value_str TEXT,
                field_value_int INTEGER,
                field_value_bool INTEGER,
                PRIMARY KEY (collection, id, field_name),
                FOREIGN KEY (collection, id) REFERENCES records(collection, id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_record_indexes_field_str ON record_indexes(collection, field_name, field_value_str);
            CREATE INDEX IF NOT EXISTS idx_record_indexes_field_int ON record_indexes(collection, field_name, field_value_int);
            CREATE INDEX IF NOT EXISTS idx_record_indexes_field_bool ON record_indexes(collection, field_name, field_value_bool);

            -- Sync metadata for staleness detection
            CREATE TABLE IF NOT EXISTS sync_metadata (
                collection TEXT PRIMARY KEY,
                last_sync_time INTEGER NOT NULL,
                file_mtime INTEGER NOT NULL,
                file_len INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;

        Ok(())
    }

    /// Create .gitignore file
    fn create_gitignore(&self) -> Result<()> {
        let gitignore_path = self.base_path.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(
                gitignore_path,
                "taskability.db\ntaskability.db-shm\ntaskability.db-wal\ntaskability.log\nwrite.lock\n",
            )?;
        }
        Ok(())
    }

    /// Write version file
    fn write_version(&self) -> Result<()> {
        let version_path = self.base_path.join(".version");
        if !version_path.exists() {
            fs::write(version_path, CURRENT_VERSION.to_string())?;
        }
        Ok(())
    }

    /// Check if database needs syncing from JSONL
    ///
    /// Returns true if any JSONL file has been modified since the last sync,
    /// or if there are JSONL files that have never been synced.
    pub fn is_stale(&self) -> Result<bool> {
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }

            let collection = match path.file_stem().and_then(|s| s.to_str()) {
                Some(c) => c,
                None => continue,
            };

            let (file_mtime, file_len) = file_stat(&path)?;

            let stored: Option<(i64, i64)> = self
                .db
                .query_row(
                    "SELECT file_mtime, file_len FROM sync_metadata WHERE collection = ?1",
                    [collection],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match stored {
                None => return Ok(true),                                   // Never synced
                Some((mtime, _)) if file_mtime > mtime => return Ok(true), // File modified
                Some((_, len)) if file_len != len => return Ok(true),      // Written within the same second
                _ => continue,
            }
        }

        Ok(false)
    }

    /// Block until no other handle holds the write lock, then take it
    pub fn lock_writes(&self) -> Result<WriteLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.base_path.join(WRITE_LOCK_FILE))
            .context("Failed to open write lock file")?;
        file.lock_exclusive().context("Failed to acquire write lock")?;
        Ok(WriteLock { file })
    }

    /// Current length of a collection's JSONL log; 0 if it doesn't exist yet
    pub fn log_len(&self, collection: &str) -> Result<u64> {
        match fs::metadata(self.jsonl_path(collection)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).context("Failed to stat JSONL log"),
        }
    }

    /// Open a read-only connection to the same database
    pub fn reader(&self) -> Result<Reader> {
        Reader::open(&self.db_path())
    }

    // ========================================================================
    // Generic CRUD API
    // ========================================================================

    /// Commit a batch atomically
    ///
    /// SQLite changes run inside one transaction and the JSONL lines are
    /// appended before it commits. If anything fails the transaction is
    /// dropped (rolled back) and every appended file is truncated to its
    /// previous length, so neither the cache nor the log keeps partial state.
    pub fn apply(&mut self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        for op in &batch.ops {
            Self::validate_collection_name(op.collection())?;
            Self::validate_id(op.id())?;
        }

        let tx = self.db.transaction()?;
        for op in &batch.ops {
            Self::apply_op_tx(&tx, op)?;
        }

        // Group log lines per collection, keeping commit order within a file
        let mut lines: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for op in &batch.ops {
            lines.entry(op.collection()).or_default().push(op.log_line());
        }

        let mut appended: Vec<(PathBuf, u64)> = Vec::new();
        for (collection, lines) in &lines {
            let path = self.base_path.join(format!("{}.jsonl", collection));
            // Our own appends must not make the cache look stale on next open
            let result = jsonl::append_lines(&path, lines).and_then(|offset| {
                appended.push((path.clone(), offset));
                Self::mark_synced_tx(&tx, collection, &path)
            });
            if let Err(e) = result {
                Self::rollback_log(&appended);
                return Err(e);
            }
        }

        if let Err(e) = tx.commit() {
            Self::rollback_log(&appended);
            return Err(e).context("Failed to commit transaction");
        }

        debug!(ops = batch.len(), "Committed write batch");
        Ok(())
    }

    fn apply_op_tx(tx: &Transaction, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::Put {
                collection,
                id,
                data_json,
                updated_at,
                sort_key,
                indexes,
            } => {
                tx.execute(
                    "INSERT OR REPLACE INTO records (collection, id, data_json, updated_at, sort_key)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![collection, id, data_json, updated_at, sort_key],
                )?;
                Self::update_indexes_tx(tx, collection, id, indexes)?;
            }
            WriteOp::Delete { collection, id, .. } => {
                tx.execute(
                    "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection, id],
                )?;
                tx.execute(
                    "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection, id],
                )?;
            }
        }
        Ok(())
    }

    fn rollback_log(appended: &[(PathBuf, u64)]) {
        for (path, offset) in appended.iter().rev() {
            if let Err(e) = jsonl::truncate_to(path, *offset) {
                warn!(file = ?path, error = ?e, "Failed to roll back JSONL append");
            }
        }
    }

    fn mark_synced_tx(tx: &Transaction, collection: &str, path: &Path) -> Result<()> {
        let (mtime, len) = file_stat(path)?;
        tx.execute(
            "INSERT OR REPLACE INTO sync_metadata (collection, last_sync_time, file_mtime, file_len)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![collection, now_ms(), mtime, len],
        )?;
        Ok(())
    }

    /// Get a record by ID
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        query_get(&self.db, id)
    }

    /// List records with optional filtering, in sort_key order
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        query_list(&self.db, filters)
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    fn update_indexes_tx(
        tx: &Transaction,
        collection: &str,
        id: &str,
        fields: &HashMap<String, IndexValue>,
    ) -> Result<()> {
        debug!(collection, id, field_count = fields.len(), "update_indexes_tx: called");

        // Delete old indexes
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
            rusqlite::params![collection, id],
        )?;

        for (field_name, value) in fields {
            Self::validate_field_name(field_name)?;

            match value {
                IndexValue::String(s) => {
                    tx.execute(
                        "INSERT INTO record_indexes (collection, id, field_name, field_value_str, field_value_int, field_value_bool)
                         VALUES (?1, ?2, ?3, ?4, NULL, NULL)",
                        rusqlite::params![collection, id, field_name, s],
                    )?;
                }
                IndexValue::Int(i) => {
                    tx.execute(
                        "INSERT INTO record_indexes (collection, id, field_name, field_value_str, field_value_int, field_value_bool)
                         VALUES (?1, ?2, ?3, NULL, ?4, NULL)",
                        rusqlite::params![collection, id, field_name, i],
                    )?;
                }
                IndexValue::Bool(b) => {
                    tx.execute(
                        "INSERT INTO record_indexes (collection, id, field_name, field_value_str, field_value_int, field_value_bool)
                         VALUES (?1, ?2, ?3, NULL, NULL, ?4)",
                        rusqlite::params![collection, id, field_name, *b as i64],
                    )?;
                }
            }
        }

        Ok(())
    }

    fn validate_collection_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(eyre!("Collection name cannot be empty"));
        }
        if name.len() > 64 {
            return Err(eyre!("Collection name too long: {} (max 64 chars)", name));
        }
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(eyre!(
                "Invalid collection name: {} (must be alphanumeric with _/-)",
                name
            ));
        }
        Ok(())
    }

    fn validate_field_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(eyre!("Field name cannot be empty"));
        }
        if name.len() > 64 {
            return Err(eyre!("Field name too long: {} (max 64 chars)", name));
        }
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(eyre!("Invalid field name: {} (must be alphanumeric with _)", name));
        }
        Ok(())
    }

    /// Validate record ID
    fn validate_id(id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(eyre!("Record ID cannot be empty or whitespace-only"));
        }
        if id.len() > 256 {
            return Err(eyre!("Record ID too long: {} chars (max 256)", id.len()));
        }
        Ok(())
    }

    // ========================================================================
    // Sync operations
    // ========================================================================

    /// Sync SQLite database from JSONL files
    ///
    /// Indexes and sort keys are not restored; see [`Store::sync_with`].
    pub fn sync(&mut self) -> Result<()> {
        self.sync_with(|_| Ok(()))
    }

    /// Sync from JSONL and run `reindex` in the same transaction
    ///
    /// `reindex` should call [`Store::rebuild_indexes_tx`] for each record
    /// type, so readers never see rows without their indexes or sort keys.
    pub fn sync_with<F>(&mut self, reindex: F) -> Result<()>
    where
        F: FnOnce(&Transaction) -> Result<()>,
    {
        info!("Syncing database from JSONL files");

        let tx = self.db.transaction()?;

        // Clear all tables
        tx.execute("DELETE FROM record_indexes", [])?;
        tx.execute("DELETE FROM records", [])?;

        let mut synced = BTreeSet::new();

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }

            let collection = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| eyre!("Invalid JSONL filename: {:?}", path))?
                .to_string();

            debug!(collection = %collection, "Syncing collection");

            let records = jsonl::read_jsonl_latest(&path)?;

            for (id, record) in records {
                if jsonl::is_tombstone(&record) {
                    continue;
                }

                let data_json = serde_json::to_string(&record)?;
                let updated_at = record.get("updated_at").and_then(|v| v.as_i64()).unwrap_or(0);

                tx.execute(
                    "INSERT OR REPLACE INTO records (collection, id, data_json, updated_at, sort_key)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                    rusqlite::params![&collection, &id, data_json, updated_at],
                )?;
            }

            Self::mark_synced_tx(&tx, &collection, &path)?;
            synced.insert(collection);
        }

        // Clean up metadata for JSONL files that no longer exist
        let known: Vec<String> = {
            let mut stmt = tx.prepare("SELECT collection FROM sync_metadata")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for collection in known.iter().filter(|c| !synced.contains(*c)) {
            tx.execute("DELETE FROM sync_metadata WHERE collection = ?1", [collection])?;
        }

        reindex(&tx)?;

        tx.commit()?;
        info!(collections = synced.len(), "Sync complete");
        Ok(())
    }

    /// Rebuild indexes and sort keys for a specific record type after sync
    ///
    /// Returns the number of records successfully indexed. Records that
    /// don't deserialize to `T` are skipped with a warning.
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize> {
        let tx = self.db.transaction()?;
        let count = Self::rebuild_indexes_tx::<T>(&tx)?;
        tx.commit()?;
        Ok(count)
    }

    /// [`Store::rebuild_indexes`] inside a caller's transaction
    pub fn rebuild_indexes_tx<T: Record>(tx: &Transaction) -> Result<usize> {
        let collection = T::collection_name();

        // Use a block to ensure stmt is dropped before the updates
        let records_data: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT id, data_json FROM records WHERE collection = ?1")?;

            let rows = stmt.query_map([collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            rows.filter_map(|r| r.ok()).collect()
        };

        let mut count = 0;

        for (id, data_json) in records_data {
            let record: T = match serde_json::from_str(&data_json) {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        collection = collection,
                        id = &id,
                        error = ?e,
                        "Skipping record that doesn't match type"
                    );
                    continue;
                }
            };

            tx.execute(
                "UPDATE records SET sort_key = ?3 WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, &id, record.sort_key()],
            )?;
            Self::update_indexes_tx(tx, collection, &id, &record.indexed_fields())?;
            count += 1;
        }

        debug!(collection = collection, count = count, "Rebuilt indexes for collection");
        Ok(count)
    }
}

/// Read-only connection used for queries that run beside the writer
pub struct Reader {
    db: Connection,
}

impl Reader {
    pub fn open(db_path: &Path) -> Result<Self> {
        let db = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open read-only SQLite connection")?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { db })
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        query_get(&self.db, id)
    }

    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        query_list(&self.db, filters)
    }
}

fn query_get<T: Record>(db: &Connection, id: &str) -> Result<Option<T>> {
    let collection = T::collection_name();

    let mut stmt = db.prepare_cached("SELECT data_json FROM records WHERE collection = ?1 AND id = ?2")?;

    let result = stmt
        .query_row(rusqlite::params![collection, id], |row| row.get::<_, String>(0))
        .optional()?;

    match result {
        Some(json) => {
            let record: T = serde_json::from_str(&json).context("Failed to deserialize record from database")?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn query_list<T: Record>(db: &Connection, filters: &[Filter]) -> Result<Vec<T>> {
    let collection = T::collection_name();

    let mut query = String::from(
        "SELECT r.data_json
         FROM records r
         WHERE r.collection = ?1",
    );

    for (i, filter) in filters.iter().enumerate() {
        Store::validate_field_name(&filter.field)?;

        // Substring match is only defined on strings
        if filter.op == FilterOp::Contains && !matches!(filter.value, IndexValue::String(_)) {
            return Ok(Vec::new());
        }

        let join_alias = format!("idx{}", i);
        let column = match &filter.value {
            IndexValue::String(_) => "field_value_str",
            IndexValue::Int(_) => "field_value_int",
            IndexValue::Bool(_) => "field_value_bool",
        };
        query.push_str(&format!(
            " AND EXISTS (
                SELECT 1 FROM record_indexes {alias}
                WHERE {alias}.collection = r.collection
                  AND {alias}.id = r.id
                  AND {alias}.field_name = ?{name_param}
                  AND {alias}.{column} {op} ?{value_param}{escape})",
            alias = join_alias,
            name_param = i + 2,
            column = column,
            op = filter.op.to_sql(),
            value_param = i + 2 + filters.len(),
            escape = if filter.op == FilterOp::Contains { " ESCAPE '\\'" } else { "" },
        ));
    }

    query.push_str(" ORDER BY r.sort_key ASC, r.id ASC");

    let mut stmt = db.prepare(&query)?;

    // Bind parameters: collection, then field names, then values
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    params.push(Box::new(collection.to_string()));

    for filter in filters {
        params.push(Box::new(filter.field.clone()));
    }

    for filter in filters {
        match (&filter.value, filter.op) {
            (IndexValue::String(s), FilterOp::Contains) => params.push(Box::new(like_pattern(s))),
            (IndexValue::String(s), _) => params.push(Box::new(s.clone())),
            (IndexValue::Int(i), _) => params.push(Box::new(*i)),
            (IndexValue::Bool(b), _) => params.push(Box::new(*b as i64)),
        }
    }

    let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt.query_map(params_refs.as_slice(), |row| row.get::<_, String>(0))?;

    let mut results = Vec::new();
    for row_result in rows {
        let data_json = row_result?;
        let record: T = serde_json::from_str(&data_json).context("Failed to deserialize record")?;
        results.push(record);
    }

    Ok(results)
}

/// Modification time (seconds) and length of a file
fn file_stat(path: &Path) -> Result<(i64, i64)> {
    let meta = fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((mtime, meta.len() as i64))
}

// Helper function for timestamps
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
