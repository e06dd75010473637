use super::ReliableConfig;
use crate::cache::ItemCache;
use crate::consistency::CallContext;
use crate::coordinator::{CommitReport, Propagator, WriteCoordinator};
use crate::core::{
    Attributes, Clock, DbError, HostIdentity, HostIdentityProvider, ItemKey, Result, SystemClock,
};
use crate::daemon::ReconciliationDaemon;
use crate::journal::DurableIntentLog;
use crate::mapper::{Record, decode_record};
use crate::store::{
    BatchDeleteRequest, BatchItem, BatchPutRequest, DeleteRequest, MAX_BATCH_ITEMS, PutRequest,
    SelectQuery, Store, StoreRequest, apply_request,
};
use crate::version::{VersionManager, VersionValue};
use std::sync::Arc;
use tracing::{Level, event};

/// One page of decoded records.
#[derive(Debug)]
pub struct RecordPage<R> {
    pub records: Vec<R>,
    pub next_token: Option<String>,
}

/// Where a submitted request went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Applied,
    Buffered,
}

/// Entry point for reliable writes, versioned puts and cached reads.
///
/// Per-call state (consistency scope, open coordinator) lives in the
/// [`CallContext`] passed to each operation, never in the client.
pub struct ReliableClient {
    store: Arc<dyn Store>,
    config: ReliableConfig,
    cache: ItemCache<Attributes>,
    versions: VersionManager,
    log: Arc<DurableIntentLog>,
    propagator: Propagator,
    daemon: ReconciliationDaemon,
}

impl ReliableClient {
    pub fn new(
        store: Arc<dyn Store>,
        config: ReliableConfig,
        identity: &dyn HostIdentityProvider,
    ) -> Result<Self> {
        Self::with_clock(store, config, identity, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn Store>,
        config: ReliableConfig,
        identity: &dyn HostIdentityProvider,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let identity = identity.identity()?;

        let log = Arc::new(DurableIntentLog::new(
            store.clone(),
            config.system_domain.clone(),
            identity,
            config.max_attribute_len,
            clock.clone(),
        ));
        let propagator = Propagator::new(store.clone(), log.clone(), config.max_parallel_steps);
        let daemon = ReconciliationDaemon::new(log.clone(), propagator.clone(), clock.clone(), &config);
        let cache = ItemCache::new(&config.cache, clock.clone())?;

        Ok(Self {
            store,
            config,
            cache,
            versions: VersionManager::new(clock),
            log,
            propagator,
            daemon,
        })
    }

    pub fn config(&self) -> &ReliableConfig {
        &self.config
    }

    pub fn identity(&self) -> &HostIdentity {
        self.log.identity()
    }

    pub fn cache(&self) -> &ItemCache<Attributes> {
        &self.cache
    }

    pub fn intent_log(&self) -> &DurableIntentLog {
        &self.log
    }

    pub fn daemon(&self) -> &ReconciliationDaemon {
        &self.daemon
    }

    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    /// A detached coordinator, not bound to any context.
    pub fn write_coordinator(&self) -> WriteCoordinator {
        WriteCoordinator::open(
            self.log.clone(),
            self.propagator.clone(),
            self.config.max_batch_size,
        )
    }

    /// Opens a coordinator on the context. Writes issued with this context
    /// are buffered until [`ReliableClient::commit`]. A coordinator already
    /// open on the context is discarded.
    pub fn open_write_coordinator<'a>(&self, ctx: &'a mut CallContext) -> &'a mut WriteCoordinator {
        ctx.install_coordinator(self.write_coordinator())
    }

    /// Commits the context's coordinator and detaches it.
    ///
    /// Every item the batch touched is dropped from the cache afterwards,
    /// whatever the outcome, so reads made while the batch was buffered
    /// cannot outlive it.
    pub async fn commit(&self, ctx: &mut CallContext) -> Result<CommitReport> {
        let mut coordinator = ctx.take_coordinator().ok_or_else(|| {
            DbError::InvalidState("no write coordinator is open on this context".to_string())
        })?;
        let touched = coordinator.touched_keys();
        let result = coordinator.commit().await;
        for key in &touched {
            self.cache.remove(&key.cache_key())?;
        }
        result
    }

    /// Buffers the request in the context's open coordinator, or applies it
    /// directly when none is open.
    pub async fn submit(&self, ctx: &mut CallContext, request: StoreRequest) -> Result<()> {
        self.dispatch(ctx, request).await.map(|_| ())
    }

    async fn dispatch(&self, ctx: &mut CallContext, request: StoreRequest) -> Result<Dispatch> {
        request.validate()?;

        if let Some(coordinator) = ctx.coordinator_mut().filter(|c| c.is_open()) {
            coordinator.add_step(request.clone())?;
            // The item changes at commit; drop what we have until then.
            self.invalidate(&request)?;
            return Ok(Dispatch::Buffered);
        }

        match apply_request(self.store.as_ref(), request.clone()).await {
            Ok(()) => {
                self.refresh_cache(&request)?;
                Ok(Dispatch::Applied)
            }
            Err(err) => {
                if err.has_version_conflict() {
                    self.invalidate(&request)?;
                }
                Err(err)
            }
        }
    }

    /// Stores the record. Versioned records are written with a CAS
    /// condition on their last observed version.
    ///
    /// Returns the version the write stores. A write applied directly sets
    /// it on the record. A write buffered in an open coordinator leaves the
    /// record untouched: the version only exists once the commit succeeds,
    /// so the caller sets the returned value after [`ReliableClient::commit`].
    pub async fn put<R: Record>(
        &self,
        ctx: &mut CallContext,
        record: &mut R,
    ) -> Result<Option<VersionValue>> {
        let key = ItemKey::checked(R::domain(), record.item_name())?;
        let attributes = record.to_attributes();

        let (request, next) = match R::version_attribute() {
            Some(attribute) => {
                let previous = record.version();
                let (request, next) = self.versions.versioned_put(
                    &key.domain,
                    &key.item_name,
                    attributes,
                    &attribute,
                    previous.as_ref(),
                )?;
                (request, Some(next))
            }
            None => (
                PutRequest {
                    domain: key.domain.clone(),
                    item_name: key.item_name.clone(),
                    attributes,
                    condition: None,
                },
                None,
            ),
        };

        let dispatch = self.dispatch(ctx, StoreRequest::Put(request)).await?;
        if let (Some(next), Dispatch::Applied) = (next, dispatch) {
            record.set_version(next);
        }
        Ok(next)
    }

    /// Stores many records with unconditional batch puts, at most
    /// `MAX_BATCH_ITEMS` per request. Concurrent writers are not detected.
    ///
    /// Returns the stamped version of each record, in order. As with
    /// [`ReliableClient::put`], records only take them when applied directly.
    pub async fn put_all<R: Record>(
        &self,
        ctx: &mut CallContext,
        records: &mut [R],
    ) -> Result<Vec<Option<VersionValue>>> {
        let attribute = R::version_attribute();
        let mut versions = Vec::with_capacity(records.len());

        for chunk in records.chunks_mut(MAX_BATCH_ITEMS) {
            let mut items = Vec::with_capacity(chunk.len());
            let mut stamped: Vec<Option<VersionValue>> = Vec::with_capacity(chunk.len());
            for record in chunk.iter() {
                let key = ItemKey::checked(R::domain(), record.item_name())?;
                match &attribute {
                    Some(attribute) => {
                        let previous = record.version();
                        let (item, next) = self.versions.stamp_batch_item(
                            &key.item_name,
                            record.to_attributes(),
                            attribute,
                            previous.as_ref(),
                        )?;
                        items.push(item);
                        stamped.push(Some(next));
                    }
                    None => {
                        items.push(BatchItem {
                            item_name: key.item_name,
                            attributes: record.to_attributes(),
                        });
                        stamped.push(None);
                    }
                }
            }

            let request = StoreRequest::BatchPut(BatchPutRequest {
                domain: R::domain().to_string(),
                items,
            });
            let dispatch = self.dispatch(ctx, request).await?;

            for (record, next) in chunk.iter_mut().zip(stamped) {
                if let (Some(next), Dispatch::Applied) = (next, dispatch) {
                    record.set_version(next);
                }
                versions.push(next);
            }
        }
        Ok(versions)
    }

    pub async fn delete<R: Record>(&self, ctx: &mut CallContext, item_name: &str) -> Result<()> {
        let key = ItemKey::checked(R::domain(), item_name)?;
        let request = StoreRequest::Delete(DeleteRequest {
            domain: key.domain,
            item_name: key.item_name,
        });
        self.submit(ctx, request).await
    }

    /// Deletes many items with batch deletes of at most `MAX_BATCH_ITEMS`.
    pub async fn delete_all<R: Record, S: AsRef<str>>(
        &self,
        ctx: &mut CallContext,
        item_names: &[S],
    ) -> Result<()> {
        for chunk in item_names.chunks(MAX_BATCH_ITEMS) {
            let item_names = chunk
                .iter()
                .map(|name| ItemKey::checked(R::domain(), name.as_ref()).map(|key| key.item_name))
                .collect::<Result<Vec<_>>>()?;
            let request = StoreRequest::BatchDelete(BatchDeleteRequest {
                domain: R::domain().to_string(),
                item_names,
            });
            self.submit(ctx, request).await?;
        }
        Ok(())
    }

    /// Reads one record. Inside a consistency scope the cache is bypassed and
    /// the store is read strongly; the cache is refreshed with the result.
    pub async fn get<R: Record>(&self, ctx: &CallContext, item_name: &str) -> Result<Option<R>> {
        let key = ItemKey::checked(R::domain(), item_name)?;
        let cache_key = key.cache_key();
        let consistent = ctx.is_consistent();

        if !consistent {
            if let Some(attributes) = self.cache.get(&cache_key)? {
                return decode_record::<R>(&key.item_name, &attributes).map(Some);
            }
        }

        let attributes = self
            .store
            .get(&key.domain, &key.item_name, consistent)
            .await?;
        match attributes {
            Some(attributes) => {
                if consistent {
                    self.cache.put(&cache_key, attributes.clone())?;
                } else {
                    self.cache.put_if_absent(&cache_key, attributes.clone())?;
                }
                decode_record::<R>(&key.item_name, &attributes).map(Some)
            }
            None => {
                if consistent {
                    self.cache.remove(&cache_key)?;
                }
                Ok(None)
            }
        }
    }

    /// Runs a select over `R`'s domain with the context's consistency mode.
    ///
    /// Strong results overwrite cached items. Eventual results may trail
    /// this client's own writes, so they only fill empty slots.
    pub async fn select<R: Record>(
        &self,
        ctx: &CallContext,
        query: SelectQuery,
    ) -> Result<RecordPage<R>> {
        if query.domain != R::domain() {
            return Err(DbError::InvalidArgument(format!(
                "query targets domain '{}' but records live in '{}'",
                query.domain,
                R::domain()
            )));
        }

        let consistent = ctx.is_consistent();
        let page = self.store.select(&query, consistent).await?;
        let mut records = Vec::with_capacity(page.items.len());
        for item in page.items {
            let key = ItemKey::new(&query.domain, &item.item_name).cache_key();
            if consistent {
                self.cache.put(&key, item.attributes.clone())?;
            } else {
                self.cache.put_if_absent(&key, item.attributes.clone())?;
            }
            records.push(decode_record::<R>(&item.item_name, &item.attributes)?);
        }

        Ok(RecordPage {
            records,
            next_token: page.next_token,
        })
    }

    /// Stops the reconciliation daemon if it runs.
    pub async fn shutdown(&self) -> Result<()> {
        self.daemon.stop().await
    }

    fn invalidate(&self, request: &StoreRequest) -> Result<()> {
        for key in request.touched_keys() {
            self.cache.remove(&key.cache_key())?;
        }
        Ok(())
    }

    fn refresh_cache(&self, request: &StoreRequest) -> Result<()> {
        match request {
            StoreRequest::Put(put) => {
                let key = ItemKey::new(&put.domain, &put.item_name);
                self.cache.put(&key.cache_key(), put.attributes.clone())
            }
            StoreRequest::BatchPut(batch) => {
                for item in &batch.items {
                    let key = ItemKey::new(&batch.domain, &item.item_name);
                    self.cache.put(&key.cache_key(), item.attributes.clone())?;
                }
                Ok(())
            }
            StoreRequest::Delete(_) | StoreRequest::BatchDelete(_) => {
                event!(Level::TRACE, kind = request.kind_name(), "dropping deleted items from cache");
                self.invalidate(request)
            }
        }
    }
}

impl<R> Default for RecordPage<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            next_token: None,
        }
    }
}
