//! Persistent device record store
//!
//! Records live in a SQLite file, grouped under a named tree and keyed by
//! device address. Every record carries a revision. A [`StoreSession`]
//! remembers the revision of each record it read; if another session has
//! written the record by the time this one commits, the [`ConflictResolver`]
//! decides what is written and the conflict is logged. Sessions never wait
//! on each other beyond SQLite's write lock and never retry.

pub mod query;

use crate::device::Device;
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a writer waits for SQLite's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
"#;

const CREATE_TREES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trees (
    name TEXT PRIMARY KEY,
    created INTEGER NOT NULL      -- Unix millis
)
"#;

const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    tree TEXT NOT NULL REFERENCES trees(name),
    key TEXT NOT NULL,
    revision INTEGER NOT NULL,
    body TEXT NOT NULL,           -- JSON encoded Device
    PRIMARY KEY (tree, key)
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    tree TEXT NOT NULL,
    time INTEGER NOT NULL,        -- Unix millis
    writes INTEGER NOT NULL,
    stored INTEGER NOT NULL       -- records written, deletions excluded
)
"#;

/// Decides which record is written when a commit finds that the stored
/// record changed after this session read it
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, key: &str, stored: Option<&Device>, committing: &Device) -> Device;
}

impl<F> ConflictResolver for F
where
    F: Fn(&str, Option<&Device>, &Device) -> Device + Send + Sync,
{
    fn resolve(&self, key: &str, stored: Option<&Device>, committing: &Device) -> Device {
        self(key, stored, committing)
    }
}

/// Default policy: the committing (newest) writer's record is kept
pub fn newest_wins(_key: &str, _stored: Option<&Device>, committing: &Device) -> Device {
    committing.clone()
}

/// Outcome of one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub writes: usize,
    pub conflicts: usize,
}

/// Shared handle on one tree of a store file
pub struct RecordStore {
    path: PathBuf,
    tree: String,
    resolver: Arc<dyn ConflictResolver>,
    closed: AtomicBool,
}

impl RecordStore {
    /// Open (creating when missing) the store file and the tree
    pub fn open<P: AsRef<Path>>(path: P, tree: &str) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = connect(&path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute(CREATE_TREES_TABLE, [])?;
        conn.execute(CREATE_RECORDS_TABLE, [])?;
        conn.execute(CREATE_TRANSACTIONS_TABLE, [])?;

        let exists: Option<String> = conn
            .query_row("SELECT name FROM trees WHERE name = ?1", params![tree], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            log::info!("Creating tree '{}' in {}", tree, path.display());
            conn.execute(
                "INSERT INTO trees (name, created) VALUES (?1, ?2)",
                params![tree, Utc::now().timestamp_millis()],
            )?;
        }

        Ok(Self {
            path,
            tree: tree.to_string(),
            resolver: Arc::new(newest_wins),
            closed: AtomicBool::new(false),
        })
    }

    /// Replace the conflict policy
    pub fn with_resolver<R: ConflictResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &str {
        &self.tree
    }

    /// Open a session with its own connection
    pub fn session(&self) -> StoreResult<StoreSession> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(StoreSession {
            conn: Some(connect(&self.path)?),
            tree: self.tree.clone(),
            resolver: Arc::clone(&self.resolver),
            read: HashMap::new(),
            pending: BTreeMap::new(),
        })
    }

    /// Time of the most recent commit on this tree that stored a record.
    /// Deletion-only commits do not count.
    pub fn last_transaction_time(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.reader()?;
        let millis: Option<i64> = conn.query_row(
            "SELECT MAX(time) FROM transactions WHERE tree = ?1 AND stored > 0",
            params![self.tree],
            |row| row.get(0),
        )?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Every record in the tree, ordered by address
    pub fn records(&self) -> StoreResult<Vec<Device>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT body FROM records WHERE tree = ?1")?;
        let bodies = stmt
            .query_map(params![self.tree], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut devices = bodies
            .iter()
            .map(|body| serde_json::from_str::<Device>(body))
            .collect::<Result<Vec<_>, _>>()?;
        devices.sort_by_key(|device| device.address);
        Ok(devices)
    }

    /// Stop handing out sessions; sessions already open stay usable
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("Closed store {} (tree '{}')", self.path.display(), self.tree);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reader(&self) -> StoreResult<Connection> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        connect(&self.path)
    }
}

fn connect(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path).map_err(|e| StoreError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

enum Pending {
    Put(Device),
    Delete,
}

/// One connection plus the uncommitted changes made through it
pub struct StoreSession {
    conn: Option<Connection>,
    tree: String,
    resolver: Arc<dyn ConflictResolver>,
    /// Revision seen by the first read of each key (0 = absent)
    read: HashMap<String, i64>,
    pending: BTreeMap<String, Pending>,
}

impl StoreSession {
    /// Read a record, seeing this session's own uncommitted changes
    pub fn get(&mut self, address: &IpAddr) -> StoreResult<Option<Device>> {
        let key = address.to_string();
        match self.pending.get(&key) {
            Some(Pending::Put(device)) => return Ok(Some(device.clone())),
            Some(Pending::Delete) => return Ok(None),
            None => {}
        }

        let conn = self.conn.as_ref().ok_or(StoreError::Closed)?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT revision, body FROM records WHERE tree = ?1 AND key = ?2",
                params![self.tree, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (revision, device) = match row {
            Some((revision, body)) => (revision, Some(serde_json::from_str(&body)?)),
            None => (0, None),
        };
        self.read.entry(key).or_insert(revision);
        Ok(device)
    }

    /// Stage a record for the next commit
    pub fn put(&mut self, device: Device) {
        self.pending.insert(device.address.to_string(), Pending::Put(device));
    }

    /// Stage a deletion for the next commit
    pub fn delete(&mut self, address: &IpAddr) {
        self.pending.insert(address.to_string(), Pending::Delete);
    }

    /// Addresses in the tree, including staged changes
    pub fn keys(&self) -> StoreResult<Vec<IpAddr>> {
        let conn = self.conn.as_ref().ok_or(StoreError::Closed)?;
        let mut stmt = conn.prepare("SELECT key FROM records WHERE tree = ?1")?;
        let stored = stmt
            .query_map(params![self.tree], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys: Vec<IpAddr> = stored
            .iter()
            .filter(|key| !matches!(self.pending.get(key.as_str()), Some(Pending::Delete)))
            .filter_map(|key| key.parse().ok())
            .collect();
        for (key, change) in &self.pending {
            if let (Pending::Put(device), false) = (change, stored.contains(key)) {
                keys.push(device.address);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Write every staged change in one transaction.
    ///
    /// On error nothing is written and the staged changes are dropped.
    /// Nothing staged means nothing written, not even a transaction entry.
    pub fn commit(&mut self) -> StoreResult<CommitReport> {
        let pending = std::mem::take(&mut self.pending);
        let read = std::mem::take(&mut self.read);
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        if pending.is_empty() {
            return Ok(CommitReport::default());
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = CommitReport::default();
        let mut stored_count = 0i64;

        for (key, change) in pending {
            let current: Option<(i64, String)> = tx
                .query_row(
                    "SELECT revision, body FROM records WHERE tree = ?1 AND key = ?2",
                    params![self.tree, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let current_revision = current.as_ref().map_or(0, |(revision, _)| *revision);
            let moved = read.get(&key).map_or(false, |seen| *seen != current_revision);

            match change {
                Pending::Put(device) => {
                    let device = if moved {
                        report.conflicts += 1;
                        let stored = match &current {
                            Some((_, body)) => Some(serde_json::from_str::<Device>(body)?),
                            None => None,
                        };
                        log::warn!(
                            "Write conflict on {} in tree '{}' (revision moved to {}), resolving",
                            key, self.tree, current_revision
                        );
                        self.resolver.resolve(&key, stored.as_ref(), &device)
                    } else {
                        device
                    };

                    tx.execute(
                        "INSERT INTO records (tree, key, revision, body) VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(tree, key) DO UPDATE SET revision = excluded.revision, body = excluded.body",
                        params![self.tree, key, current_revision + 1, serde_json::to_string(&device)?],
                    )?;
                    stored_count += 1;
                }
                Pending::Delete => {
                    if moved {
                        report.conflicts += 1;
                        log::warn!("Deleting {} although it changed since it was read", key);
                    }
                    tx.execute(
                        "DELETE FROM records WHERE tree = ?1 AND key = ?2",
                        params![self.tree, key],
                    )?;
                }
            }
            report.writes += 1;
        }

        tx.execute(
            "INSERT INTO transactions (tree, time, writes, stored) VALUES (?1, ?2, ?3, ?4)",
            params![self.tree, Utc::now().timestamp_millis(), report.writes as i64, stored_count],
        )?;
        tx.commit()?;
        Ok(report)
    }

    /// Drop staged changes and forget what was read
    pub fn rollback(&mut self) {
        self.pending.clear();
        self.read.clear();
    }

    /// Release the connection; later calls fail with [`StoreError::Closed`]
    pub fn close(&mut self) {
        self.rollback();
        self.conn = None;
    }
}

impl Drop for StoreSession {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("Store session dropped with {} uncommitted changes", self.pending.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn device(addr: &str, model: &str) -> Device {
        let mut device = Device::new(addr.parse().unwrap(), Utc::now());
        device.model = Some(model.to_string());
        device
    }

    fn open(tmp: &TempDir) -> RecordStore {
        RecordStore::open(tmp.path().join("devices.db"), "devicedb").unwrap()
    }

    #[test]
    fn test_put_commit_get() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let mut session = store.session().unwrap();

        session.put(device("10.0.0.5", "S3000"));
        let report = session.commit().unwrap();
        assert_eq!(report, CommitReport { writes: 1, conflicts: 0 });

        let mut other = store.session().unwrap();
        let stored = other.get(&"10.0.0.5".parse().unwrap()).unwrap().unwrap();
        assert_eq!(stored.model.as_deref(), Some("S3000"));
        assert!(store.last_transaction_time().unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards_changes() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let mut session = store.session().unwrap();

        session.put(device("10.0.0.5", "S3000"));
        session.rollback();
        session.commit().unwrap();
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_last_committer_wins_conflict() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let key: IpAddr = "10.0.0.5".parse().unwrap();

        let mut first = store.session().unwrap();
        let mut second = store.session().unwrap();
        assert!(first.get(&key).unwrap().is_none());
        assert!(second.get(&key).unwrap().is_none());

        first.put(device("10.0.0.5", "first"));
        second.put(device("10.0.0.5", "second"));
        assert_eq!(first.commit().unwrap().conflicts, 0);
        assert_eq!(second.commit().unwrap().conflicts, 1);

        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model.as_deref(), Some("second"));
    }

    #[test]
    fn test_custom_resolver_is_consulted() {
        let tmp = TempDir::new().unwrap();
        let keep_stored = |_: &str, stored: Option<&Device>, committing: &Device| {
            stored.cloned().unwrap_or_else(|| committing.clone())
        };
        let store = open(&tmp).with_resolver(keep_stored);
        let key: IpAddr = "10.0.0.5".parse().unwrap();

        let mut first = store.session().unwrap();
        let mut second = store.session().unwrap();
        first.get(&key).unwrap();
        second.get(&key).unwrap();
        first.put(device("10.0.0.5", "first"));
        second.put(device("10.0.0.5", "second"));
        first.commit().unwrap();
        second.commit().unwrap();

        assert_eq!(store.records().unwrap()[0].model.as_deref(), Some("first"));
    }

    #[test]
    fn test_keys_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let mut session = store.session().unwrap();
        session.put(device("10.0.0.9", "a"));
        session.put(device("10.0.0.2", "b"));
        session.commit().unwrap();

        session.delete(&"10.0.0.9".parse().unwrap());
        session.put(device("10.0.0.7", "c"));
        let keys: Vec<String> = session.keys().unwrap().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["10.0.0.2", "10.0.0.7"]);

        session.commit().unwrap();
        assert_eq!(store.records().unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_keeps_records_and_closed_store_refuses_sessions() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp);
            let mut session = store.session().unwrap();
            session.put(device("10.0.0.5", "S3000"));
            session.commit().unwrap();
            store.close();
            assert!(matches!(store.session(), Err(StoreError::Closed)));
        }

        let reopened = open(&tmp);
        assert_eq!(reopened.records().unwrap().len(), 1);

        let mut session = reopened.session().unwrap();
        session.close();
        assert!(matches!(session.get(&"10.0.0.5".parse().unwrap()), Err(StoreError::Closed)));
    }

    #[test]
    fn test_deletion_does_not_move_last_transaction_time() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let mut session = store.session().unwrap();
        session.put(device("10.0.0.1", "a"));
        session.put(device("10.0.0.2", "b"));
        session.commit().unwrap();
        let after_update = store.last_transaction_time().unwrap().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(session.commit().unwrap(), CommitReport::default());
        session.delete(&"10.0.0.2".parse().unwrap());
        assert_eq!(session.commit().unwrap().writes, 1);

        assert_eq!(store.last_transaction_time().unwrap(), Some(after_update));
        let records = store.records().unwrap();
        let stale = crate::store::query::inactive(&records, after_update, chrono::Duration::seconds(1));
        assert_eq!(records.len(), 1);
        assert!(stale.is_empty());
    }
}
