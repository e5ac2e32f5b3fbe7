//! Durable, bounded trace store.
//!
//! # Layout
//! ```text
//! add(entry)
//!     → journal (append one JSON line, sync_data)
//!     → window (VecDeque, oldest evicted first)
//!     → index (id → sequence number)
//! ```
//!
//! The journal is append-only and never rewritten. The in-memory window
//! is always a suffix of journal order, at most `max_len` long, and is
//! rebuilt from the journal tail at startup.
//!
//! A single readers-writer lock guards journal handle, window and index
//! together, so `list`/`get` never observe a half-applied `add`.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::observability::metrics;
use crate::trace::entry::TraceEntry;

/// Errors returned by the trace store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening or reading the journal failed.
    #[error("journal I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The entry could not be encoded as a journal record.
    #[error("failed to encode trace {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The journal write failed; the entry is kept in memory only.
    #[error("trace {id} not persisted: {reason}")]
    Persistence { id: String, reason: String },

    /// The store has been closed.
    #[error("trace store is closed")]
    Closed,

    /// Window length must be at least one.
    #[error("invalid window length {0}")]
    InvalidWindow(usize),
}

/// Store options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum number of entries kept in memory.
    pub max_len: usize,
    /// Call `sync_data` after every append.
    pub fsync: bool,
}

struct Inner {
    journal: Option<File>,
    window: VecDeque<Arc<TraceEntry>>,
    /// id → absolute sequence number; position is `seq - first_seq`.
    index: HashMap<String, u64>,
    first_seq: u64,
    /// A failed append may have left a partial record behind.
    torn: bool,
}

impl Inner {
    fn push(&mut self, entry: Arc<TraceEntry>, max_len: usize) {
        let seq = self.first_seq + self.window.len() as u64;
        self.index.insert(entry.id.clone(), seq);
        self.window.push_back(entry);

        while self.window.len() > max_len {
            if let Some(evicted) = self.window.pop_front() {
                // A later entry may reuse the id; only drop our own mapping.
                if self.index.get(&evicted.id) == Some(&self.first_seq) {
                    self.index.remove(&evicted.id);
                }
                self.first_seq += 1;
            }
        }
    }

    fn get(&self, id: &str) -> Option<Arc<TraceEntry>> {
        let seq = *self.index.get(id)?;
        let pos = seq.checked_sub(self.first_seq)? as usize;
        self.window.get(pos).cloned()
    }
}

/// Concurrent trace store backed by a JSON-lines journal.
pub struct TraceStore {
    inner: RwLock<Inner>,
    path: PathBuf,
    options: StoreOptions,
}

impl TraceStore {
    /// Open (creating if absent) the journal at `path` and rehydrate the
    /// most recent `max_len` entries.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if options.max_len == 0 {
            return Err(StoreError::InvalidWindow(options.max_len));
        }
        let io_err = |source| StoreError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut journal = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let mut inner = Inner {
            journal: None,
            window: VecDeque::with_capacity(options.max_len.min(4096)),
            index: HashMap::new(),
            first_seq: 0,
            torn: false,
        };

        let (loaded, skipped, torn_tail) = load_journal(&mut journal, &mut inner, options.max_len)
            .map_err(io_err)?;

        if torn_tail {
            // Terminate the partial record so the next append starts clean.
            journal.write_all(b"\n").map_err(io_err)?;
        }

        inner.journal = Some(journal);
        metrics::record_window_size(inner.window.len());

        tracing::info!(
            path = %path.display(),
            loaded,
            skipped,
            retained = inner.window.len(),
            max_len = options.max_len,
            "Trace store opened"
        );

        Ok(Self {
            inner: RwLock::new(inner),
            path,
            options,
        })
    }

    /// Append an entry to the journal and the in-memory window.
    ///
    /// If the journal write fails the entry is still added to the window,
    /// marked with `persist_error`, and `StoreError::Persistence` is
    /// returned.
    pub fn add(&self, mut entry: TraceEntry) -> Result<(), StoreError> {
        let mut record = serde_json::to_vec(&entry).map_err(|source| StoreError::Encode {
            id: entry.id.clone(),
            source,
        })?;
        record.push(b'\n');

        let mut inner = self.inner.write();
        let repair = inner.torn;
        let journal = inner.journal.as_mut().ok_or(StoreError::Closed)?;

        let written = write_record(journal, &record, repair, self.options.fsync);
        inner.torn = written.is_err();

        let result = match written {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(
                    trace_id = %entry.id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to persist trace"
                );
                metrics::record_journal_failure();
                entry.persist_error = Some(e.to_string());
                Err(StoreError::Persistence {
                    id: entry.id.clone(),
                    reason: e.to_string(),
                })
            }
        };

        inner.push(Arc::new(entry), self.options.max_len);
        metrics::record_window_size(inner.window.len());
        result
    }

    /// Snapshot of the current window, oldest first.
    pub fn list(&self) -> Vec<Arc<TraceEntry>> {
        self.inner.read().window.iter().cloned().collect()
    }

    /// Look up an entry in the current window.
    pub fn get(&self, id: &str) -> Option<Arc<TraceEntry>> {
        self.inner.read().get(id)
    }

    /// Number of entries in the window.
    pub fn len(&self) -> usize {
        self.inner.read().window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the journal handle. Later `add` calls fail with `Closed`.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(journal) = inner.journal.take() {
            journal.sync_all().map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
            tracing::info!(path = %self.path.display(), "Trace store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
impl TraceStore {
    /// Take the write lock, run `on_locked`, and keep holding it for `hold`.
    pub(crate) fn hold_write_lock(&self, hold: std::time::Duration, on_locked: impl FnOnce()) {
        let _guard = self.inner.write();
        on_locked();
        std::thread::sleep(hold);
    }
}

/// Append one record. With `repair`, a newline first terminates whatever
/// a previous failed append left behind.
fn write_record(journal: &mut File, record: &[u8], repair: bool, fsync: bool) -> std::io::Result<()> {
    if repair {
        journal.write_all(b"\n")?;
    }
    journal.write_all(record)?;
    if fsync {
        journal.sync_data()?;
    }
    Ok(())
}

/// Read every line of the journal into the window, skipping lines that do
/// not decode. Returns (decoded, skipped, torn_tail).
fn load_journal(
    journal: &mut File,
    inner: &mut Inner,
    max_len: usize,
) -> std::io::Result<(usize, usize, bool)> {
    journal.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *journal);
    let mut line = Vec::new();
    let mut decoded = 0;
    let mut skipped = 0;
    let mut torn_tail = false;

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        torn_tail = line.last() != Some(&b'\n');

        let record = trim_line(&line);
        if record.is_empty() {
            continue;
        }
        match serde_json::from_slice::<TraceEntry>(record) {
            Ok(entry) => {
                decoded += 1;
                inner.push(Arc::new(entry), max_len);
            }
            Err(e) => {
                skipped += 1;
                tracing::debug!(error = %e, "Skipping malformed journal line");
            }
        }
    }

    Ok((decoded, skipped, torn_tail))
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::entry::MessageSnapshot;
    use chrono::Utc;
    use std::thread;

    fn entry(id: &str) -> TraceEntry {
        TraceEntry {
            id: id.to_string(),
            started_at: Utc::now(),
            duration_ms: 1,
            client_addr: "127.0.0.1:1".into(),
            method: "POST".into(),
            path: "/soap".into(),
            host: "upstream".into(),
            status_code: Some(200),
            soap_action: "Op".into(),
            request: MessageSnapshot::default(),
            response: MessageSnapshot::default(),
            error: None,
            persist_error: None,
            request_size: 0,
            response_size: 0,
        }
    }

    fn options(max_len: usize) -> StoreOptions {
        StoreOptions { max_len, fsync: true }
    }

    fn ids(store: &TraceStore) -> Vec<String> {
        store.list().iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn window_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path().join("t.jsonl"), options(3)).unwrap();
        for i in 0..5 {
            store.add(entry(&format!("e{i}"))).unwrap();
        }
        assert_eq!(ids(&store), vec!["e2", "e3", "e4"]);
        assert!(store.get("e0").is_none());
        assert!(store.get("e1").is_none());
        assert_eq!(store.get("e3").unwrap().id, "e3");
        assert!(store.get("never").is_none());
    }

    #[test]
    fn reopen_recovers_tail_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        {
            let store = TraceStore::open(&path, options(10)).unwrap();
            for i in 0..4 {
                store.add(entry(&format!("a{i}"))).unwrap();
            }
            store.close().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"not json at all\n{\"id\":\n").unwrap();
        }
        {
            let store = TraceStore::open(&path, options(10)).unwrap();
            store.add(entry("a4")).unwrap();
            store.close().unwrap();
        }

        let store = TraceStore::open(&path, options(3)).unwrap();
        assert_eq!(ids(&store), vec!["a2", "a3", "a4"]);
        assert!(store.get("a1").is_none());
    }

    #[test]
    fn torn_tail_does_not_swallow_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        {
            let store = TraceStore::open(&path, options(10)).unwrap();
            store.add(entry("ok")).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"id\":\"partial\",\"startedAt\"").unwrap();
        }
        {
            let store = TraceStore::open(&path, options(10)).unwrap();
            assert_eq!(ids(&store), vec!["ok"]);
            store.add(entry("after")).unwrap();
        }
        let store = TraceStore::open(&path, options(10)).unwrap();
        assert_eq!(ids(&store), vec!["ok", "after"]);
    }

    /// Replace the journal handle with one opened read-only, so every
    /// append fails.
    fn break_journal(store: &TraceStore) {
        let readonly = File::open(store.path()).unwrap();
        store.inner.write().journal = Some(readonly);
    }

    fn restore_journal(store: &TraceStore) {
        let writable = OpenOptions::new().append(true).open(store.path()).unwrap();
        store.inner.write().journal = Some(writable);
    }

    #[test]
    fn failed_write_keeps_entry_in_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path().join("t.jsonl"), options(10)).unwrap();
        store.add(entry("first")).unwrap();

        break_journal(&store);
        let err = store.add(entry("unsaved")).unwrap_err();
        assert!(matches!(err, StoreError::Persistence { ref id, .. } if id == "unsaved"));

        assert_eq!(store.len(), 2);
        let kept = store.get("unsaved").unwrap();
        assert!(kept.persist_error.is_some());
        assert!(store.get("first").unwrap().persist_error.is_none());

        let json = serde_json::to_value(&*kept).unwrap();
        assert!(json["persistError"].is_string());

        // Only the first entry reached disk.
        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn append_after_failed_write_starts_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let store = TraceStore::open(&path, options(10)).unwrap();
        store.add(entry("before")).unwrap();

        break_journal(&store);
        assert!(store.add(entry("lost")).is_err());
        // What a write cut short mid-record leaves behind.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"id\":\"lost\",\"star").unwrap();
        }
        restore_journal(&store);

        store.add(entry("after")).unwrap();
        store.close().unwrap();

        let reopened = TraceStore::open(&path, options(10)).unwrap();
        assert_eq!(ids(&reopened), vec!["before", "after"]);
    }

    #[test]
    fn journal_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let store = TraceStore::open(&path, options(2)).unwrap();
        for i in 0..5 {
            store.add(entry(&format!("j{i}"))).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 5);
    }

    #[test]
    fn add_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path().join("t.jsonl"), options(2)).unwrap();
        store.close().unwrap();
        assert!(matches!(store.add(entry("late")), Err(StoreError::Closed)));
        assert!(store.is_empty());
    }

    #[test]
    fn zero_window_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = TraceStore::open(dir.path().join("t.jsonl"), options(0));
        assert!(matches!(err, Err(StoreError::InvalidWindow(0))));
    }

    #[test]
    fn duplicate_id_resolves_to_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = TraceStore::open(dir.path().join("t.jsonl"), options(2)).unwrap();
        let mut first = entry("dup");
        first.method = "GET".into();
        store.add(first).unwrap();
        store.add(entry("dup")).unwrap();
        store.add(entry("other")).unwrap();
        // The first "dup" was evicted; the second is still in the window.
        assert_eq!(store.get("dup").unwrap().method, "POST");
    }

    #[test]
    fn concurrent_adds_keep_index_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TraceStore::open(dir.path().join("t.jsonl"), options(64)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..20 {
                        store.add(entry(&format!("t{t}-{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let window = store.list();
        assert_eq!(window.len(), 64);
        for e in &window {
            assert_eq!(store.get(&e.id).unwrap().id, e.id);
        }

        let reopened = TraceStore::open(store.path(), options(64)).unwrap();
        let reopened_ids: Vec<_> = reopened.list().iter().map(|e| e.id.clone()).collect();
        let window_ids: Vec<_> = window.iter().map(|e| e.id.clone()).collect();
        assert_eq!(reopened_ids, window_ids);
    }
}
