//! Bucket-scoped storage clients.
//!
//! A [`Client`] is a cheap handle over a shared [`Store`] and one bucket.
//! Every call is its own transaction against that bucket only, so two
//! clients with different namespaces never see each other's keys even when
//! the keys are identical.

use crate::compaction::{compact_store, compact_store_via};
use crate::context::OpContext;
use crate::error::{CoreError, CoreResult};
use crate::manager::StoreSlot;
use crate::namespace::Namespace;
use crate::store::Store;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind of a batched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Read a key; the result lands in [`Operation::value`].
    Get,
    /// Write [`Operation::value`] under the key.
    Set,
    /// Remove the key.
    Delete,
}

/// One step of a [`StorageClient::batch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// What to do.
    pub kind: OpKind,
    /// Record key.
    pub key: Vec<u8>,
    /// Value to set, or the value read by a get.
    pub value: Option<Vec<u8>>,
}

impl Operation {
    /// A read of `key`.
    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: OpKind::Get,
            key: key.into(),
            value: None,
        }
    }

    /// A write of `value` under `key`.
    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: OpKind::Set,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A removal of `key`.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: OpKind::Delete,
            key: key.into(),
            value: None,
        }
    }
}

/// Key/value access to one namespace.
///
/// A missing key is a soft miss: `get` returns `Ok(None)` and `delete`
/// succeeds without writing anything.
pub trait StorageClient: Send + Sync {
    /// Reads the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client or store is closed, the context has
    /// ended, or the value cannot be read.
    fn get(&self, ctx: &OpContext, key: &[u8]) -> CoreResult<Option<Vec<u8>>>;

    /// Inserts or overwrites `key`. Durable once this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write did not commit; the previous value is
    /// then still in place.
    fn set(&self, ctx: &OpContext, key: &[u8], value: &[u8]) -> CoreResult<()>;

    /// Removes `key` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal did not commit.
    fn delete(&self, ctx: &OpContext, key: &[u8]) -> CoreResult<()>;

    /// Runs `ops` in order as one atomic transaction.
    ///
    /// Gets observe earlier sets and deletes of the same batch and store
    /// their result in [`Operation::value`].
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; no write of the batch is applied.
    fn batch(&self, ctx: &OpContext, ops: &mut [Operation]) -> CoreResult<()>;

    /// Releases the client. The shared store stays open. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if `ctx` has already ended.
    fn close(&self, ctx: &OpContext) -> CoreResult<()>;
}

/// Clients that can rewrite their store to reclaim space.
pub trait Compact {
    /// Compacts the store into `destination` and returns a client bound to
    /// the compacted store. `self` is stale afterwards.
    ///
    /// A client from a [`StorageManager`](crate::StorageManager) keeps its
    /// store in the manager's directory: `destination` then only holds the
    /// staging file and the result replaces the current store file, as in
    /// [`compact_store_via`]. A client bound directly to a store compacts as
    /// [`compact_store`] does. See there for `timeout` and `max_txn_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if compaction fails; the original store is then
    /// untouched and `self` stays usable. A managed client whose manager
    /// shut down during the compaction gets [`CoreError::StoreClosed`].
    fn compact(
        &self,
        ctx: &OpContext,
        destination: &Path,
        timeout: Duration,
        max_txn_size: u64,
    ) -> CoreResult<Client>;
}

/// A handle to one bucket of a shared store.
pub struct Client {
    store: Arc<Store>,
    slot: Option<Arc<StoreSlot>>,
    namespace: Namespace,
    bucket: String,
    closed: AtomicBool,
}

impl Client {
    /// Binds a client to `namespace` in `store`, creating its bucket if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be created.
    pub fn bind(ctx: &OpContext, store: Arc<Store>, namespace: Namespace) -> CoreResult<Self> {
        Self::bind_with_slot(ctx, store, namespace, None)
    }

    pub(crate) fn bind_with_slot(
        ctx: &OpContext,
        store: Arc<Store>,
        namespace: Namespace,
        slot: Option<Arc<StoreSlot>>,
    ) -> CoreResult<Self> {
        ctx.check()?;
        let bucket = namespace.encode();

        if !store.begin_read()?.has_bucket(&bucket) {
            let mut txn = store.begin_write(ctx)?;
            txn.create_bucket(&bucket);
            txn.commit(ctx)?;
            tracing::debug!(%namespace, bucket = %bucket, "created bucket");
        }

        Ok(Self {
            store,
            slot,
            namespace,
            bucket,
            closed: AtomicBool::new(false),
        })
    }

    /// The namespace this client is bound to.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The bucket identifier of the namespace.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The store this client writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn check(&self, ctx: &OpContext) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::ClientClosed);
        }
        ctx.check()
    }
}

impl StorageClient for Client {
    fn get(&self, ctx: &OpContext, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.check(ctx)?;
        self.store.begin_read()?.get(&self.bucket, key)
    }

    fn set(&self, ctx: &OpContext, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.check(ctx)?;
        let mut txn = self.store.begin_write(ctx)?;
        txn.put(&self.bucket, key, value)?;
        txn.commit(ctx)
    }

    fn delete(&self, ctx: &OpContext, key: &[u8]) -> CoreResult<()> {
        self.check(ctx)?;
        let mut txn = self.store.begin_write(ctx)?;
        if txn.delete(&self.bucket, key)? {
            txn.commit(ctx)?;
        }
        Ok(())
    }

    fn batch(&self, ctx: &OpContext, ops: &mut [Operation]) -> CoreResult<()> {
        self.check(ctx)?;
        if ops.is_empty() {
            return Ok(());
        }

        let mut txn = self.store.begin_write(ctx)?;
        for op in ops.iter_mut() {
            match op.kind {
                OpKind::Get => op.value = txn.get(&self.bucket, &op.key)?,
                OpKind::Set => {
                    let value = op.value.as_deref().ok_or_else(|| {
                        CoreError::invalid_operation("set operation without a value")
                    })?;
                    txn.put(&self.bucket, &op.key, value)?;
                }
                OpKind::Delete => {
                    txn.delete(&self.bucket, &op.key)?;
                }
            }
        }
        txn.commit(ctx)
    }

    fn close(&self, ctx: &OpContext) -> CoreResult<()> {
        ctx.check()?;
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(namespace = %self.namespace, "client closed");
        }
        Ok(())
    }
}

impl Compact for Client {
    fn compact(
        &self,
        ctx: &OpContext,
        destination: &Path,
        timeout: Duration,
        max_txn_size: u64,
    ) -> CoreResult<Client> {
        self.check(ctx)?;
        let store = match &self.slot {
            Some(slot) => {
                let (store, _report) =
                    compact_store_via(&self.store, ctx, destination, timeout, max_txn_size)?;
                slot.install(&self.store, store)?
            }
            None => {
                let (store, _report) =
                    compact_store(&self.store, ctx, destination, timeout, max_txn_size)?;
                Arc::new(store)
            }
        };

        Ok(Self {
            store,
            slot: self.slot.clone(),
            namespace: self.namespace.clone(),
            bucket: self.bucket.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("namespace", &self.namespace)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(store: &Arc<Store>, name: &str) -> Client {
        Client::bind(
            &OpContext::background(),
            Arc::clone(store),
            Namespace::new("receiver", name, ""),
        )
        .unwrap()
    }

    #[test]
    fn set_get_delete() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let c = client(&store, "a");
        let ctx = OpContext::background();

        assert_eq!(c.get(&ctx, b"k").unwrap(), None);
        c.set(&ctx, b"k", b"v").unwrap();
        assert_eq!(c.get(&ctx, b"k").unwrap(), Some(b"v".to_vec()));
        c.delete(&ctx, b"k").unwrap();
        assert_eq!(c.get(&ctx, b"k").unwrap(), None);
        c.delete(&ctx, b"k").unwrap();
    }

    #[test]
    fn namespaces_do_not_share_keys() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let a = client(&store, "a");
        let b = client(&store, "b");
        let ctx = OpContext::background();

        a.set(&ctx, b"shared", b"from-a").unwrap();
        assert_eq!(b.get(&ctx, b"shared").unwrap(), None);
        b.delete(&ctx, b"shared").unwrap();
        assert_eq!(a.get(&ctx, b"shared").unwrap(), Some(b"from-a".to_vec()));
    }

    #[test]
    fn rebinding_reuses_bucket() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let ctx = OpContext::background();
        client(&store, "a").set(&ctx, b"k", b"v").unwrap();

        let size = store.stats().unwrap().file_size;
        let again = client(&store, "a");
        assert_eq!(again.get(&ctx, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.stats().unwrap().file_size, size);
    }

    #[test]
    fn batch_sees_its_own_writes() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let c = client(&store, "a");
        let ctx = OpContext::background();
        c.set(&ctx, b"gone", b"x").unwrap();

        let mut ops = vec![
            Operation::set("k", "v1"),
            Operation::get("k"),
            Operation::delete("gone"),
            Operation::get("gone"),
            Operation::set("k", "v2"),
        ];
        c.batch(&ctx, &mut ops).unwrap();

        assert_eq!(ops[1].value, Some(b"v1".to_vec()));
        assert_eq!(ops[3].value, None);
        assert_eq!(c.get(&ctx, b"k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(c.get(&ctx, b"gone").unwrap(), None);
    }

    #[test]
    fn failed_batch_applies_nothing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let c = client(&store, "a");
        let ctx = OpContext::background();

        let mut ops = vec![
            Operation::set("k", "v"),
            Operation {
                kind: OpKind::Set,
                key: b"bad".to_vec(),
                value: None,
            },
        ];
        assert!(c.batch(&ctx, &mut ops).is_err());
        assert_eq!(c.get(&ctx, b"k").unwrap(), None);
    }

    #[test]
    fn closed_client_rejects_calls() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let c = client(&store, "a");
        let ctx = OpContext::background();

        c.close(&ctx).unwrap();
        c.close(&ctx).unwrap();
        assert!(matches!(c.get(&ctx, b"k"), Err(CoreError::ClientClosed)));
        assert!(matches!(c.set(&ctx, b"k", b"v"), Err(CoreError::ClientClosed)));

        let other = client(&store, "b");
        other.set(&ctx, b"k", b"v").unwrap();
    }

    #[test]
    fn cancelled_context_writes_nothing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let c = client(&store, "a");
        let size = store.stats().unwrap().file_size;

        let (ctx, cancel) = OpContext::cancellable();
        cancel.cancel();
        assert!(matches!(c.set(&ctx, b"k", b"v"), Err(CoreError::Cancelled)));
        assert!(matches!(c.get(&ctx, b"k"), Err(CoreError::Cancelled)));
        assert_eq!(store.stats().unwrap().file_size, size);
    }

    #[test]
    fn store_close_stales_clients() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let c = client(&store, "a");
        store.close().unwrap();
        let ctx = OpContext::background();
        assert!(matches!(c.get(&ctx, b"k"), Err(CoreError::StoreClosed)));
        assert!(matches!(c.set(&ctx, b"k", b"v"), Err(CoreError::StoreClosed)));
    }
}
