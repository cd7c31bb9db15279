//! Datastore-backed repository lease.
//!
//! `index_locks` rows are keyed by [`lock_key`], a CRC32 of the repository
//! id. A lease is taken with an atomic upsert inside an immediate transaction
//! and only succeeds when no other owner holds an unexpired lease on that
//! key. Leases of crashed processes expire after their TTL. The guard
//! releases on `Drop`.

use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};

use crate::errors::{LoomError, LoomResult};
use crate::store::database::Database;

static LEASE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Stable numeric key for a repository's lease row. Repositories whose keys
/// collide share a lease.
pub fn lock_key(repository_id: i64) -> i64 {
    crc32fast::hash(repository_id.to_string().as_bytes()) as i64
}

fn new_owner_token() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = LEASE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", std::process::id(), nanos, seq).as_bytes());
    format!("{:x}", hasher.finalize())[..32].to_string()
}

/// A held repository lease.
#[derive(Debug)]
pub struct RepoLease {
    db: Database,
    repository_id: i64,
    key: i64,
    owner_token: String,
    ttl_secs: i64,
    released: bool,
}

impl RepoLease {
    /// Take the lease for `repository_id`, failing with
    /// [`LoomError::LockHeld`] when another owner holds a live lease.
    pub fn acquire(db: &Database, repository_id: i64, ttl_secs: i64) -> LoomResult<RepoLease> {
        let owner_token = new_owner_token();
        let key = lock_key(repository_id);
        let now = now_secs();
        let mut conn = db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT owner_token, expires_at FROM index_locks WHERE lock_key = ?1;",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((owner, expires_at)) = current {
            if owner != owner_token && expires_at > now {
                return Err(LoomError::LockHeld { repository_id });
            }
            tracing::warn!(repository_id, "taking over expired index lease");
        }
        tx.execute(
            "INSERT INTO index_locks(lock_key, repository_id, owner_token, acquired_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(lock_key) DO UPDATE SET \
                 repository_id = excluded.repository_id, \
                 owner_token = excluded.owner_token, \
                 acquired_at = excluded.acquired_at, \
                 expires_at = excluded.expires_at;",
            params![key, repository_id, owner_token, now, now + ttl_secs],
        )?;
        tx.commit()?;
        tracing::debug!(repository_id, lock_key = key, "acquired index lease");
        Ok(RepoLease {
            db: db.clone(),
            repository_id,
            key,
            owner_token,
            ttl_secs,
            released: false,
        })
    }

    /// Extend the lease. Fails with [`LoomError::LockHeld`] if it was lost.
    pub fn renew(&self) -> LoomResult<()> {
        let conn = self.db.connect()?;
        let updated = conn.execute(
            "UPDATE index_locks SET expires_at = ?3 \
             WHERE lock_key = ?1 AND owner_token = ?2;",
            params![self.key, self.owner_token, now_secs() + self.ttl_secs],
        )?;
        if updated == 0 {
            return Err(LoomError::LockHeld {
                repository_id: self.repository_id,
            });
        }
        Ok(())
    }

    fn delete_row(&self) -> LoomResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "DELETE FROM index_locks WHERE lock_key = ?1 AND owner_token = ?2;",
            params![self.key, self.owner_token],
        )?;
        Ok(())
    }

    /// Release explicitly, surfacing any store error.
    pub fn release(mut self) -> LoomResult<()> {
        self.released = true;
        self.delete_row()
    }
}

impl Drop for RepoLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.delete_row() {
            tracing::warn!(
                repository_id = self.repository_id,
                error = %err,
                "failed to release index lease; it will expire"
            );
        } else {
            tracing::debug!(repository_id = self.repository_id, "released index lease");
        }
    }
}
