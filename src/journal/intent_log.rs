use super::{
    MACHINE_ID_ATTR, RELIABLE_WRITE_ID_ATTR, STEP_TYPE, TYPE_ATTR, VERSION_ATTR, WriteBatch,
    WriteStep, decode_step, encode_step,
};
use crate::core::{Clock, DbError, HostIdentity, Result};
use crate::store::{
    BatchItem, BatchPutRequest, DeleteRequest, MAX_BATCH_ITEMS, Predicate, SelectQuery,
    SortOrder, Store,
};
use crate::version::{format_timestamp, truncate_timestamp};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tracing::{Instrument, Level, event, info_span};

/// Write steps persisted as rows of the system domain.
pub struct DurableIntentLog {
    store: Arc<dyn Store>,
    domain: String,
    identity: HostIdentity,
    max_attribute_len: usize,
    clock: Arc<dyn Clock>,
    last_version: Mutex<DateTime<Utc>>,
}

impl DurableIntentLog {
    pub fn new(
        store: Arc<dyn Store>,
        domain: impl Into<String>,
        identity: HostIdentity,
        max_attribute_len: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            domain: domain.into(),
            identity,
            max_attribute_len,
            clock,
            last_version: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn identity(&self) -> &HostIdentity {
        &self.identity
    }

    /// Next version stamp, strictly later than any stamp this log handed out.
    fn next_version(&self) -> Result<DateTime<Utc>> {
        let now = truncate_timestamp(self.clock.now());
        let mut last = self.last_version.lock()?;
        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        Ok(next)
    }

    /// Stamps the batch's steps with this host's identity and increasing versions.
    pub fn seal(&self, batch: WriteBatch) -> Result<Vec<WriteStep>> {
        let mut stamps = Vec::with_capacity(batch.len());
        for _ in 0..batch.len() {
            stamps.push(self.next_version()?);
        }
        let mut stamps = stamps.into_iter();
        let identity = self.identity.clone();
        Ok(batch.seal(&identity, || stamps.next().unwrap_or_else(Utc::now)))
    }

    /// Persists every step in one store call. If the call fails, none of the
    /// steps is durable.
    pub async fn append(&self, steps: &[WriteStep]) -> Result<()> {
        if steps.is_empty() {
            return Ok(());
        }
        if steps.len() > MAX_BATCH_ITEMS {
            return Err(DbError::BatchTooLarge {
                limit: MAX_BATCH_ITEMS,
            });
        }

        let items = steps
            .iter()
            .map(|step| {
                Ok(BatchItem {
                    item_name: step.id.clone(),
                    attributes: encode_step(step, self.max_attribute_len)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let span = info_span!(
            "reliable.log.append",
            reliable_write_id = %steps[0].reliable_write_id,
            steps = steps.len()
        );
        let request = BatchPutRequest {
            domain: self.domain.clone(),
            items,
        };
        async {
            let result = self.store.batch_put(request).await;
            match &result {
                Ok(()) => event!(Level::DEBUG, "intent log rows written"),
                Err(err) => event!(Level::ERROR, error = %err, "intent log append failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Removes a step whose mutation has been applied. Deleting a row twice
    /// is harmless.
    pub async fn delete(&self, step_id: &str) -> Result<()> {
        self.store
            .delete(DeleteRequest {
                domain: self.domain.clone(),
                item_name: step_id.to_string(),
            })
            .await
    }

    /// Steps of this host with `version <= cutoff`, oldest first.
    pub fn scan(&self, cutoff: DateTime<Utc>, page_size: usize, consistent: bool) -> StepScan<'_> {
        self.scan_host(&self.identity.machine_id, cutoff, page_size, consistent)
    }

    /// Steps of an arbitrary host with `version <= cutoff`, oldest first.
    pub fn scan_host(
        &self,
        machine_id: &str,
        cutoff: DateTime<Utc>,
        page_size: usize,
        consistent: bool,
    ) -> StepScan<'_> {
        let query = SelectQuery::new(&self.domain)
            .filter(Predicate::eq(TYPE_ATTR, STEP_TYPE))
            .filter(Predicate::eq(MACHINE_ID_ATTR, machine_id))
            .filter(Predicate::le(VERSION_ATTR, format_timestamp(&cutoff)))
            .order_by(VERSION_ATTR, SortOrder::Asc)
            .limit(page_size);
        StepScan::new(self, query, consistent)
    }

    /// Every still-logged step of one reliable write, read strongly.
    pub async fn pending_for(&self, reliable_write_id: &str) -> Result<Vec<WriteStep>> {
        let query = SelectQuery::new(&self.domain)
            .filter(Predicate::eq(TYPE_ATTR, STEP_TYPE))
            .filter(Predicate::eq(RELIABLE_WRITE_ID_ATTR, reliable_write_id))
            .order_by(VERSION_ATTR, SortOrder::Asc);
        let mut scan = StepScan::new(self, query, true);
        let mut steps = Vec::new();
        while let Some(page) = scan.next_page().await? {
            steps.extend(page.steps);
        }
        Ok(steps)
    }
}

/// Decoded rows of one page. Rows that fail to decode are reported instead
/// of failing the whole page.
#[derive(Debug, Default)]
pub struct ScanPage {
    pub steps: Vec<WriteStep>,
    pub undecodable: Vec<(String, DbError)>,
}

/// Lazy, restartable paged scan over log rows.
pub struct StepScan<'a> {
    log: &'a DurableIntentLog,
    query: SelectQuery,
    consistent: bool,
    next_token: Option<String>,
    exhausted: bool,
}

impl<'a> StepScan<'a> {
    fn new(log: &'a DurableIntentLog, query: SelectQuery, consistent: bool) -> Self {
        Self {
            log,
            query,
            consistent,
            next_token: None,
            exhausted: false,
        }
    }

    /// Fetches the next page, or `None` once the scan has no more rows.
    pub async fn next_page(&mut self) -> Result<Option<ScanPage>> {
        if self.exhausted {
            return Ok(None);
        }

        let query = self.query.clone().after(self.next_token.take());
        let page = self.log.store.select(&query, self.consistent).await?;
        self.next_token = page.next_token;
        self.exhausted = self.next_token.is_none();

        if page.items.is_empty() && self.exhausted {
            return Ok(None);
        }

        let mut decoded = ScanPage::default();
        for item in page.items {
            match decode_step(&item.item_name, &item.attributes) {
                Ok(step) => decoded.steps.push(step),
                Err(err) => decoded.undecodable.push((item.item_name, err)),
            }
        }
        Ok(Some(decoded))
    }

    /// Starts over from the first page.
    pub fn restart(&mut self) {
        self.next_token = None;
        self.exhausted = false;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
