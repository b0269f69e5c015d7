//! Key-value persistence where every record may carry an absolute expiry.
//!
//! Records live under a per-kind key prefix. Each record that expires also
//! has an entry in a secondary index, `x/` followed by the big-endian expiry
//! in milliseconds and the record's full key, so that reclaiming everything
//! that has expired is a range scan rather than a decode of every record.
//!
//! Values are stored as `bincode((expires_at, record))`. Keeping the expiry in
//! front lets the sweep and the delete path decode only the expiry.
//!
//! Same-key consistency comes from RocksDB's pessimistic transactions: every
//! read-modify-write takes the row lock with `get_for_update` first.
//!
//! A call that misses its timeout keeps running on the blocking pool, so its
//! transaction only commits if it claims its [`CommitGate`] before the caller
//! gives up. A caller told `Timeout` never sees the write land later.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocksdb::{
    DBCompressionType, Direction, IteratorMode, Options, Transaction, TransactionDB,
    TransactionDBOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{debug, warn};

const EXPIRY_PREFIX: &[u8] = b"x/";
const MILLIS_LEN: usize = std::mem::size_of::<u64>();
/// Index entries handled per pass of the sweep.
const SWEEP_BATCH: usize = 256;

/// Something that can be kept in the [`Store`].
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Key prefix separating this kind of record from the others.
    const NAMESPACE: &'static [u8];

    /// When the record stops being visible. Must not change after the record
    /// has been written.
    fn expires_at(&self) -> Option<DateTime<Utc>>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key already exists")]
    DuplicateKey,
    #[error("key not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),
    #[error("failed to (de)serialize record: {0}")]
    Codec(#[from] bincode::Error),
    #[error("storage call did not finish within {0:?}")]
    Timeout(Duration),
    #[error("storage task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Handle to the backing database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<TransactionDB>,
    timeout: Duration,
}

impl Store {
    /// Opens (creating if needed) the database at `path`. Every call except
    /// the sweep gives up after `timeout`.
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(DBCompressionType::Zstd);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX));

        let db = TransactionDB::open(&opts, &txn_opts, path)?;
        Ok(Self {
            db: Arc::new(db),
            timeout,
        })
    }

    /// Writes a new record. Fails with [`StoreError::DuplicateKey`] if the key
    /// is taken, even by a record that has expired but not yet been reclaimed.
    pub async fn put<T: Record>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        let primary = primary_key::<T>(key);
        let expires_at = record.expires_at();
        let value = bincode::serialize(&(expires_at, record))?;

        self.run(move |db, gate| {
            let txn = db.transaction();
            if txn.get_for_update(&primary, true)?.is_some() {
                return Err(StoreError::DuplicateKey);
            }

            txn.put(&primary, &value)?;
            if let Some(expires_at) = expires_at {
                txn.put(index_key(&primary, expires_at), b"")?;
            }
            gate.commit(txn)
        })
        .await
    }

    /// Fetches a live record. A record found past its expiry is deleted
    /// before `None` is returned.
    pub async fn get<T: Record>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let primary = primary_key::<T>(key);

        self.run(move |db, gate| {
            let raw = match db.get(&primary)? {
                Some(raw) => raw,
                None => return Ok(None),
            };

            let (expires_at, record): (Option<DateTime<Utc>>, T) = bincode::deserialize(&raw)?;
            let now = Utc::now();
            if !is_expired(expires_at, now) {
                return Ok(Some(record));
            }

            if remove_if(db, gate, &primary, |expires_at| is_expired(expires_at, now))? {
                debug!(key = %String::from_utf8_lossy(&primary), "Reclaimed expired record on read");
            }
            Ok(None)
        })
        .await
    }

    /// Removes a record. Returns whether anything was there; removing a
    /// missing key is not an error.
    pub async fn delete<T: Record>(&self, key: &str) -> Result<bool, StoreError> {
        let primary = primary_key::<T>(key);
        self.run(move |db, gate| remove_if(db, gate, &primary, |_| true))
            .await
    }

    /// Atomically applies `f` to a live record and writes it back. Returns
    /// `None` if there is no live record; an expired one is reclaimed.
    pub async fn update<T, F, R>(&self, key: &str, f: F) -> Result<Option<R>, StoreError>
    where
        T: Record,
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let primary = primary_key::<T>(key);

        self.run(move |db, gate| {
            let txn = db.transaction();
            let raw = match txn.get_for_update(&primary, true)? {
                Some(raw) => raw,
                None => return Ok(None),
            };

            let (expires_at, mut record): (Option<DateTime<Utc>>, T) =
                bincode::deserialize(&raw)?;
            if is_expired(expires_at, Utc::now()) {
                delete_in(&txn, &primary, expires_at)?;
                gate.commit(txn)?;
                return Ok(None);
            }

            let output = f(&mut record);
            debug_assert_eq!(record.expires_at(), expires_at);
            txn.put(&primary, bincode::serialize(&(expires_at, &record))?)?;
            gate.commit(txn)?;
            Ok(Some(output))
        })
        .await
    }

    /// Increments the counter at `key` and returns the new value. A missing
    /// or expired counter starts over at one and expires at `window_end`.
    ///
    /// This is the hook admission control calls before letting a request
    /// through.
    pub async fn increment_counter(
        &self,
        key: &str,
        window_end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let primary = primary_key::<Counter>(key);

        self.run(move |db, gate| {
            let txn = db.transaction();
            let current = match txn.get_for_update(&primary, true)? {
                Some(raw) => {
                    let (expires_at, counter): (Option<DateTime<Utc>>, Counter) =
                        bincode::deserialize(&raw)?;
                    if is_expired(expires_at, Utc::now()) {
                        delete_in(&txn, &primary, expires_at)?;
                        None
                    } else {
                        Some(counter)
                    }
                }
                None => None,
            };

            let counter = match current {
                Some(counter) => Counter {
                    count: counter.count.saturating_add(1),
                    ..counter
                },
                None => {
                    txn.put(index_key(&primary, window_end), b"")?;
                    Counter {
                        count: 1,
                        expires_at: window_end,
                    }
                }
            };

            txn.put(
                &primary,
                bincode::serialize(&(Some(counter.expires_at), &counter))?,
            )?;
            gate.commit(txn)?;
            Ok(counter.count)
        })
        .await
    }

    /// Deletes every record whose expiry has passed and returns how many
    /// were removed. Not bounded by the request timeout.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || sweep(&db, Utc::now(), SWEEP_BATCH)).await?
    }

    /// Runs a blocking database call off the async runtime. A call that
    /// outlives the timeout is reported as a failure, never as a miss, and
    /// whatever it would have committed is rolled back.
    async fn run<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&TransactionDB, &CommitGate) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let gate = CommitGate::new(self.timeout);
        let mut handle = task::spawn_blocking({
            let gate = gate.clone();
            move || f(&db, &gate)
        });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined?,
            Err(_) if gate.abandon() => Err(StoreError::Timeout(self.timeout)),
            // Already committing, so its outcome stands.
            Err(_) => handle.await?,
        }
    }

    /// Whether a record is physically present, ignoring its expiry.
    #[cfg(test)]
    pub(crate) fn contains<T: Record>(&self, key: &str) -> bool {
        matches!(self.db.get(primary_key::<T>(key)), Ok(Some(_)))
    }

    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.db
            .iterator(IteratorMode::From(EXPIRY_PREFIX, Direction::Forward))
            .map_while(Result::ok)
            .take_while(|(key, _)| key.starts_with(EXPIRY_PREFIX))
            .count()
    }
}

/// Fixed-window counter backing [`Store::increment_counter`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
struct Counter {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl Record for Counter {
    const NAMESPACE: &'static [u8] = b"c/";

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expires_at)
    }
}

const GATE_OPEN: u8 = 0;
const GATE_COMMITTING: u8 = 1;
const GATE_ABANDONED: u8 = 2;

/// Decides, once, whether a blocking call still gets to commit or its caller
/// has already given up on it.
#[derive(Clone)]
struct CommitGate {
    state: Arc<AtomicU8>,
    timeout: Duration,
}

impl CommitGate {
    fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(GATE_OPEN)),
            timeout,
        }
    }

    /// Commits `txn` unless the caller gave up first, in which case dropping
    /// it rolls everything back.
    fn commit(&self, txn: Transaction<'_, TransactionDB>) -> Result<(), StoreError> {
        if self.claim(GATE_COMMITTING) {
            txn.commit()?;
            Ok(())
        } else {
            debug!("Rolling back a storage call that outlived its caller");
            Err(StoreError::Timeout(self.timeout))
        }
    }

    /// Returns false if the call is already committing.
    fn abandon(&self) -> bool {
        self.claim(GATE_ABANDONED)
    }

    fn claim(&self, to: u8) -> bool {
        self.state
            .compare_exchange(GATE_OPEN, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Reclaims expired records `batch` index entries at a time, seeking past
/// each batch so entries left in place are not visited twice.
fn sweep(db: &TransactionDB, now: DateTime<Utc>, batch: usize) -> Result<usize, StoreError> {
    let mut upper = EXPIRY_PREFIX.to_vec();
    upper.extend_from_slice(&to_millis(now).saturating_add(1).to_be_bytes());

    let mut cursor = EXPIRY_PREFIX.to_vec();
    let mut removed = 0;
    loop {
        let mut candidates = Vec::with_capacity(batch);
        for item in db.iterator(IteratorMode::From(cursor.as_slice(), Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(EXPIRY_PREFIX) || key[..] >= upper[..] {
                break;
            }
            candidates.push(key);
            if candidates.len() == batch {
                break;
            }
        }

        let Some(last) = candidates.last() else {
            return Ok(removed);
        };
        // The smallest key sorting after `last`.
        cursor = last.to_vec();
        cursor.push(0);

        let full = candidates.len() == batch;
        for index in candidates {
            if sweep_entry(db, &index, now)? {
                removed += 1;
            }
        }

        if !full {
            return Ok(removed);
        }
    }
}

/// Handles one index entry. Returns whether a record was deleted.
fn sweep_entry(db: &TransactionDB, index: &[u8], now: DateTime<Utc>) -> Result<bool, StoreError> {
    let primary = &index[EXPIRY_PREFIX.len() + MILLIS_LEN..];
    let txn = db.transaction();

    let removed = match txn.get_for_update(primary, true)? {
        Some(raw) => {
            let expires_at = match bincode::deserialize::<Option<DateTime<Utc>>>(&raw) {
                Ok(expires_at) => expires_at,
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(primary),
                        "Skipping undecodable record during sweep: {}", e
                    );
                    return Ok(false);
                }
            };

            if is_expired(expires_at, now) {
                delete_in(&txn, primary, expires_at)?;
                true
            } else if expires_at.map(|e| index_key(primary, e)).as_deref() != Some(index) {
                // Left behind by an earlier record under the same key.
                txn.delete(index)?;
                false
            } else {
                false
            }
        }
        None => {
            txn.delete(index)?;
            false
        }
    };

    txn.commit()?;
    Ok(removed)
}

/// Deletes the record at `primary` if `predicate` accepts its expiry.
fn remove_if(
    db: &TransactionDB,
    gate: &CommitGate,
    primary: &[u8],
    predicate: impl FnOnce(Option<DateTime<Utc>>) -> bool,
) -> Result<bool, StoreError> {
    let txn = db.transaction();
    let raw = match txn.get_for_update(primary, true)? {
        Some(raw) => raw,
        None => return Ok(false),
    };

    let expires_at: Option<DateTime<Utc>> = bincode::deserialize(&raw)?;
    if !predicate(expires_at) {
        return Ok(false);
    }

    delete_in(&txn, primary, expires_at)?;
    gate.commit(txn)?;
    Ok(true)
}

fn delete_in(
    txn: &Transaction<'_, TransactionDB>,
    primary: &[u8],
    expires_at: Option<DateTime<Utc>>,
) -> Result<(), StoreError> {
    txn.delete(primary)?;
    if let Some(expires_at) = expires_at {
        txn.delete(index_key(primary, expires_at))?;
    }
    Ok(())
}

fn primary_key<T: Record>(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(T::NAMESPACE.len() + key.len());
    out.extend_from_slice(T::NAMESPACE);
    out.extend_from_slice(key.as_bytes());
    out
}

fn index_key(primary: &[u8], expires_at: DateTime<Utc>) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXPIRY_PREFIX.len() + MILLIS_LEN + primary.len());
    out.extend_from_slice(EXPIRY_PREFIX);
    out.extend_from_slice(&to_millis(expires_at).to_be_bytes());
    out.extend_from_slice(primary);
    out
}

// Anything before the epoch sorts first; it has long expired anyway.
fn to_millis(time: DateTime<Utc>) -> u64 {
    u64::try_from(time.timestamp_millis()).unwrap_or(0)
}

pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires_at| expires_at <= now)
}
