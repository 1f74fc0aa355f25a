//! Contact persistence.
//!
//! [`ContactStore`] is the seam the engine writes through. Two implementations
//! ship with the crate: an in-memory table and a JSON lines journal that
//! appends per mutation and compacts on retention sweeps and wipes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::types::{ContactRecord, NewContactRecord, Timestamp};

/// Errors raised by a contact store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file holds malformed data.
    #[error("Failed to parse {}: {source}", path.display())]
    ParseError {
        /// File path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Rows could not be serialized.
    #[error("Failed to serialize contacts: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The store cannot serve requests.
    #[error("Contact store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Append log of sightings.
///
/// Every accepted sighting is its own row. Duration updates address a row by
/// `(identity, first_seen_at)`, never by recency.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Append a row and return its id.
    async fn insert_sighting(&self, record: NewContactRecord) -> StoreResult<i64>;

    /// Number of rows recorded for `identity`.
    async fn count_sightings_for(&self, identity: &str) -> StoreResult<usize>;

    /// Set the duration of rows matching `identity` and `opened_at` exactly.
    /// Returns how many rows changed; zero is not an error.
    async fn update_duration(
        &self,
        identity: &str,
        opened_at: Timestamp,
        duration: i64,
    ) -> StoreResult<usize>;

    /// Rows seen strictly after `since`, newest first.
    async fn list_since(&self, since: Timestamp) -> StoreResult<Vec<ContactRecord>>;

    /// Delete rows seen before `cutoff`; returns how many were removed.
    async fn delete_older_than(&self, cutoff: Timestamp) -> StoreResult<usize>;

    /// Delete every row.
    async fn wipe_all(&self) -> StoreResult<()>;
}

/// Row table shared by the bundled stores.
#[derive(Debug, Clone, Default)]
struct ContactTable {
    next_id: i64,
    rows: Vec<ContactRecord>,
}

impl ContactTable {
    fn insert(&mut self, record: NewContactRecord) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.rows.push(ContactRecord::from_new(id, record));
        id
    }

    fn count_for(&self, identity: &str) -> usize {
        self.rows.iter().filter(|r| r.identity == identity).count()
    }

    fn update_duration(&mut self, identity: &str, opened_at: Timestamp, duration: i64) -> usize {
        let mut updated = 0;
        for row in self
            .rows
            .iter_mut()
            .filter(|r| r.identity == identity && r.first_seen_at == opened_at)
        {
            row.duration = Some(duration);
            updated += 1;
        }
        updated
    }

    fn since(&self, since: Timestamp) -> Vec<ContactRecord> {
        let mut rows: Vec<ContactRecord> = self
            .rows
            .iter()
            .filter(|r| r.first_seen_at > since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.first_seen_at.cmp(&a.first_seen_at).then(b.id.cmp(&a.id)));
        rows
    }

    fn delete_older_than(&mut self, cutoff: Timestamp) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| r.first_seen_at >= cutoff);
        before - self.rows.len()
    }

    fn wipe(&mut self) {
        self.rows.clear();
    }
}

/// Volatile store, used in tests and when no data directory is configured.
#[derive(Debug, Default)]
pub struct MemoryContactStore {
    table: RwLock<ContactTable>,
}

impl MemoryContactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn insert_sighting(&self, record: NewContactRecord) -> StoreResult<i64> {
        Ok(self.table.write().await.insert(record))
    }

    async fn count_sightings_for(&self, identity: &str) -> StoreResult<usize> {
        Ok(self.table.read().await.count_for(identity))
    }

    async fn update_duration(
        &self,
        identity: &str,
        opened_at: Timestamp,
        duration: i64,
    ) -> StoreResult<usize> {
        Ok(self
            .table
            .write()
            .await
            .update_duration(identity, opened_at, duration))
    }

    async fn list_since(&self, since: Timestamp) -> StoreResult<Vec<ContactRecord>> {
        Ok(self.table.read().await.since(since))
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> StoreResult<usize> {
        Ok(self.table.write().await.delete_older_than(cutoff))
    }

    async fn wipe_all(&self) -> StoreResult<()> {
        self.table.write().await.wipe();
        Ok(())
    }
}

/// One line of the contact journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    /// Id counter at compaction time, so ids are never reused.
    NextId { next_id: i64 },
    /// A full row.
    Insert { row: ContactRecord },
    /// A duration set on rows keyed by identity and timestamp.
    Duration {
        identity: String,
        opened_at: Timestamp,
        duration: i64,
    },
}

/// Store persisted as a JSON lines journal.
///
/// Inserts and duration updates append a single line, so their cost does not
/// grow with the table. Retention sweeps and wipes rewrite the file as a
/// compact snapshot through a temporary file and a rename. The table lock is
/// held across every file write so the journal order matches the table.
///
/// A torn last line (no trailing newline, not parseable) is what a crash in
/// the middle of an append leaves behind; it is dropped on open.
#[derive(Debug)]
pub struct JsonContactStore {
    path: PathBuf,
    table: Mutex<ContactTable>,
}

impl JsonContactStore {
    /// Open the store at `path`, creating an empty one if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(StoreError::ReadError { path, source }),
        };
        let (table, replayed) = replay(&path, &content)?;

        let store = Self {
            path,
            table: Mutex::new(table),
        };
        {
            let table = store.table.lock().await;
            if replayed > table.rows.len() + 1 || (!content.is_empty() && !content.ends_with('\n')) {
                store.compact(&table).await?;
            }
            tracing::debug!(
                path = %store.path.display(),
                rows = table.rows.len(),
                replayed,
                "Opened contact store"
            );
        }
        Ok(store)
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self) -> impl Fn(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::WriteError {
            path: self.path.clone(),
            source,
        }
    }

    async fn append(&self, entry: &JournalEntry) -> StoreResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(self.write_err())?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(self.write_err())?;
        file.write_all(&line).await.map_err(self.write_err())?;
        file.flush().await.map_err(self.write_err())?;
        Ok(())
    }

    /// Replace the journal with one line per live row.
    async fn compact(&self, table: &ContactTable) -> StoreResult<()> {
        let mut content = serde_json::to_vec(&JournalEntry::NextId {
            next_id: table.next_id,
        })?;
        content.push(b'\n');
        for row in &table.rows {
            serde_json::to_writer(&mut content, &JournalEntry::Insert { row: row.clone() })?;
            content.push(b'\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(self.write_err())?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(self.write_err())?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(self.write_err())?;
        tracing::debug!(rows = table.rows.len(), "Contact journal compacted");
        Ok(())
    }
}

/// Rebuild the table from journal lines. Returns the table and the number of
/// entries applied.
fn replay(path: &Path, content: &str) -> StoreResult<(ContactTable, usize)> {
    let mut table = ContactTable::default();
    let mut applied = 0;
    let torn_tail = !content.is_empty() && !content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();

    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entry,
            Err(_) if torn_tail && index + 1 == lines.len() => {
                tracing::warn!(path = %path.display(), "Dropping torn last journal line");
                break;
            }
            Err(source) => {
                return Err(StoreError::ParseError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        match entry {
            JournalEntry::NextId { next_id } => table.next_id = table.next_id.max(next_id),
            JournalEntry::Insert { row } => {
                table.next_id = table.next_id.max(row.id);
                table.rows.push(row);
            }
            JournalEntry::Duration {
                identity,
                opened_at,
                duration,
            } => {
                table.update_duration(&identity, opened_at, duration);
            }
        }
        applied += 1;
    }
    Ok((table, applied))
}

#[async_trait]
impl ContactStore for JsonContactStore {
    async fn insert_sighting(&self, record: NewContactRecord) -> StoreResult<i64> {
        let mut table = self.table.lock().await;
        let id = table.insert(record);
        let row = table.rows.last().cloned();
        if let Some(row) = row {
            if let Err(e) = self.append(&JournalEntry::Insert { row }).await {
                table.rows.pop();
                table.next_id -= 1;
                return Err(e);
            }
        }
        Ok(id)
    }

    async fn count_sightings_for(&self, identity: &str) -> StoreResult<usize> {
        Ok(self.table.lock().await.count_for(identity))
    }

    async fn update_duration(
        &self,
        identity: &str,
        opened_at: Timestamp,
        duration: i64,
    ) -> StoreResult<usize> {
        let mut table = self.table.lock().await;
        let updated = table.update_duration(identity, opened_at, duration);
        if updated > 0 {
            self.append(&JournalEntry::Duration {
                identity: identity.to_owned(),
                opened_at,
                duration,
            })
            .await?;
        }
        Ok(updated)
    }

    async fn list_since(&self, since: Timestamp) -> StoreResult<Vec<ContactRecord>> {
        Ok(self.table.lock().await.since(since))
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> StoreResult<usize> {
        let mut table = self.table.lock().await;
        let deleted = table.delete_older_than(cutoff);
        if deleted > 0 {
            self.compact(&table).await?;
        }
        Ok(deleted)
    }

    async fn wipe_all(&self) -> StoreResult<()> {
        let mut table = self.table.lock().await;
        table.wipe();
        self.compact(&table).await
    }
}

/// Get the default data directory.
///
/// On Linux hosts: `/var/lib/proxtrace/`
/// Elsewhere: the platform data dir
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/proxtrace")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "proxtrace")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

/// Default location of the contact file.
#[must_use]
pub fn default_contacts_path() -> PathBuf {
    default_data_dir().join("contacts.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SightingSource;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn row(identity: &str, at: Timestamp) -> NewContactRecord {
        NewContactRecord {
            identity: identity.into(),
            first_seen_at: at,
            source: Some(SightingSource::BleClient),
            signal_strength: Some(-60),
            distance_estimate: None,
            captured_in_background: false,
        }
    }

    #[tokio::test]
    async fn test_memory_store_append_log() {
        let store = MemoryContactStore::new();
        let first = store.insert_sighting(row("nov20-a", 1_000)).await.unwrap();
        let second = store.insert_sighting(row("nov20-a", 40_000)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.count_sightings_for("nov20-a").await.unwrap(), 2);
        assert_eq!(store.count_sightings_for("nov20-b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_duration_matches_exact_timestamp() {
        let store = MemoryContactStore::new();
        store.insert_sighting(row("nov20-a", 1_000)).await.unwrap();
        store.insert_sighting(row("nov20-a", 40_000)).await.unwrap();

        assert_eq!(store.update_duration("nov20-a", 1_000, 5_000).await.unwrap(), 1);
        assert_eq!(store.update_duration("nov20-a", 2_000, 5_000).await.unwrap(), 0);

        let rows = store.list_since(0).await.unwrap();
        let first = rows.iter().find(|r| r.first_seen_at == 1_000).unwrap();
        let second = rows.iter().find(|r| r.first_seen_at == 40_000).unwrap();
        assert_eq!(first.duration, Some(5_000));
        assert_eq!(second.duration, None);
    }

    #[tokio::test]
    async fn test_list_since_is_exclusive_and_newest_first() {
        let store = MemoryContactStore::new();
        for at in [1_000, 3_000, 2_000] {
            store.insert_sighting(row("nov20-a", at)).await.unwrap();
        }
        let rows = store.list_since(1_000).await.unwrap();
        let times: Vec<_> = rows.iter().map(|r| r.first_seen_at).collect();
        assert_eq!(times, vec![3_000, 2_000]);
    }

    #[tokio::test]
    async fn test_delete_older_than_and_wipe() {
        let store = MemoryContactStore::new();
        for at in [1_000, 2_000, 3_000] {
            store.insert_sighting(row("nov20-a", at)).await.unwrap();
        }
        assert_eq!(store.delete_older_than(2_500).await.unwrap(), 2);
        assert_eq!(store.list_since(0).await.unwrap().len(), 1);
        assert_ok!(store.wipe_all().await);
        assert!(store.list_since(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("contacts.jsonl");

        {
            let store = JsonContactStore::open(&path).await.unwrap();
            store.insert_sighting(row("nov20-a", 1_000)).await.unwrap();
            store.update_duration("nov20-a", 1_000, 60_000).await.unwrap();
        }

        let reopened = JsonContactStore::open(&path).await.unwrap();
        let rows = reopened.list_since(0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration, Some(60_000));

        // Ids keep increasing across reopen.
        let id = reopened.insert_sighting(row("nov20-b", 2_000)).await.unwrap();
        assert_eq!(id, 2);
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("contacts.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let err = JsonContactStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::ParseError { .. }));
    }

    #[test]
    fn test_default_paths() {
        assert!(default_contacts_path().ends_with("contacts.jsonl"));
    }

    #[tokio::test]
    async fn test_json_store_appends_instead_of_rewriting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("contacts.jsonl");
        let store = JsonContactStore::open(&path).await.unwrap();

        store.insert_sighting(row("nov20-a", 1_000)).await.unwrap();
        let after_first = std::fs::read_to_string(&path).unwrap();
        store.insert_sighting(row("nov20-a", 40_000)).await.unwrap();
        store.update_duration("nov20-a", 1_000, 30_000).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with(&after_first));
        assert!(content.lines().last().unwrap().contains("\"op\":\"duration\""));
    }

    #[tokio::test]
    async fn test_json_store_compacts_on_sweep() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("contacts.jsonl");
        let store = JsonContactStore::open(&path).await.unwrap();
        for at in [1_000, 2_000, 3_000] {
            store.insert_sighting(row("nov20-a", at)).await.unwrap();
        }
        store.update_duration("nov20-a", 3_000, 10_000).await.unwrap();

        assert_eq!(store.delete_older_than(2_500).await.unwrap(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        // Id counter plus the one surviving row.
        assert_eq!(content.lines().count(), 2);

        drop(store);
        let reopened = JsonContactStore::open(&path).await.unwrap();
        let rows = reopened.list_since(0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration, Some(10_000));
        // Deleted ids are not handed out again.
        assert_eq!(reopened.insert_sighting(row("nov20-b", 4_000)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_json_store_drops_torn_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("contacts.jsonl");
        {
            let store = JsonContactStore::open(&path).await.unwrap();
            store.insert_sighting(row("nov20-a", 1_000)).await.unwrap();
        }
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"op\":\"ins");
        std::fs::write(&path, content).unwrap();

        let reopened = JsonContactStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_since(0).await.unwrap().len(), 1);
        assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
    }
}
