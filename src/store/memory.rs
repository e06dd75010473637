use super::{
    BatchDeleteRequest, BatchPutRequest, DeleteRequest, PutRequest, SelectItem, SelectPage,
    SelectQuery, SortOrder, Store, MAX_BATCH_ITEMS,
};
use crate::core::{Attributes, Clock, DbError, Result, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

const PAGE_TOKEN_PREFIX: &str = "mem:";

/// Store operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Put,
    BatchPut,
    Delete,
    BatchDelete,
    Get,
    Select,
}

/// Makes the next `times` matching operations fail with a transient error.
#[derive(Debug, Clone)]
pub struct FailureRule {
    pub op: StoreOp,
    pub domain: Option<String>,
    pub item_name: Option<String>,
    pub times: usize,
    pub message: String,
}

impl FailureRule {
    pub fn new(op: StoreOp) -> Self {
        Self {
            op,
            domain: None,
            item_name: None,
            times: 1,
            message: "injected transient failure".to_string(),
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn for_item(mut self, item_name: impl Into<String>) -> Self {
        self.item_name = Some(item_name.into());
        self
    }

    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    fn matches(&self, op: StoreOp, domain: &str, item_names: &[&str]) -> bool {
        if self.times == 0 || self.op != op {
            return false;
        }
        if self.domain.as_deref().is_some_and(|expected| expected != domain) {
            return false;
        }
        match self.item_name.as_deref() {
            Some(expected) => item_names.iter().any(|name| *name == expected),
            None => true,
        }
    }
}

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub puts: u64,
    pub batch_puts: u64,
    pub deletes: u64,
    pub batch_deletes: u64,
    pub gets: u64,
    pub consistent_gets: u64,
    pub selects: u64,
    pub consistent_selects: u64,
    pub conflicts: u64,
    pub injected_failures: u64,
}

/// Write history of one item, oldest first. `None` marks a delete.
#[derive(Debug, Default)]
struct ItemHistory {
    writes: Vec<(DateTime<Utc>, Option<Attributes>)>,
}

impl ItemHistory {
    fn latest(&self) -> Option<&Attributes> {
        self.writes.last().and_then(|(_, attrs)| attrs.as_ref())
    }

    fn visible_at(&self, cutoff: DateTime<Utc>) -> Option<&Attributes> {
        self.writes
            .iter()
            .rev()
            .find(|(at, _)| *at <= cutoff)
            .and_then(|(_, attrs)| attrs.as_ref())
    }

    fn record(&mut self, at: DateTime<Utc>, attrs: Option<Attributes>, horizon: DateTime<Utc>) {
        self.writes.push((at, attrs));
        // Everything before the newest write already visible at `horizon` is unreachable.
        if let Some(keep_from) = self.writes.iter().rposition(|(at, _)| *at <= horizon) {
            self.writes.drain(..keep_from);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    domains: HashMap<String, BTreeMap<String, ItemHistory>>,
    failures: Vec<FailureRule>,
    stats: MemoryStoreStats,
}

impl MemoryState {
    fn take_failure(&mut self, op: StoreOp, domain: &str, item_names: &[&str]) -> Result<()> {
        if let Some(rule) = self
            .failures
            .iter_mut()
            .find(|rule| rule.matches(op, domain, item_names))
        {
            rule.times -= 1;
            let message = rule.message.clone();
            self.failures.retain(|rule| rule.times > 0);
            self.stats.injected_failures += 1;
            return Err(DbError::TransientStoreError(message));
        }
        Ok(())
    }
}

/// In-process attribute store with simulated read-after-write lag.
///
/// Default reads and selects only observe writes older than `read_lag`;
/// consistent reads observe the latest state. Conditions are checked against
/// the latest state.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    read_lag: Duration,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            read_lag: Duration::zero(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_read_lag(mut self, read_lag: Duration) -> Self {
        self.read_lag = read_lag;
        self
    }

    pub fn inject_failure(&self, rule: FailureRule) -> Result<()> {
        let mut state = self.state.lock()?;
        state.failures.push(rule);
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<()> {
        self.state.lock()?.failures.clear();
        Ok(())
    }

    pub fn stats(&self) -> Result<MemoryStoreStats> {
        Ok(self.state.lock()?.stats.clone())
    }

    /// Latest attributes of an item, ignoring read lag.
    pub fn item(&self, domain: &str, item_name: &str) -> Result<Option<Attributes>> {
        let state = self.state.lock()?;
        Ok(state
            .domains
            .get(domain)
            .and_then(|items| items.get(item_name))
            .and_then(|history| history.latest().cloned()))
    }

    /// Number of live items in a domain, ignoring read lag.
    pub fn domain_len(&self, domain: &str) -> Result<usize> {
        let state = self.state.lock()?;
        Ok(state
            .domains
            .get(domain)
            .map(|items| items.values().filter(|h| h.latest().is_some()).count())
            .unwrap_or(0))
    }

    fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.read_lag
    }

    fn write(
        state: &mut MemoryState,
        domain: &str,
        item_name: &str,
        attrs: Option<Attributes>,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) {
        state
            .domains
            .entry(domain.to_string())
            .or_default()
            .entry(item_name.to_string())
            .or_default()
            .record(now, attrs, horizon);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Page tokens carry the sort key of the last returned item, so rows deleted
/// between pages do not shift the next page.
type PageKey = (Option<String>, String);

fn sort_key(item: &SelectItem, query: &SelectQuery) -> PageKey {
    let value = query
        .order_by
        .as_ref()
        .and_then(|order_by| item.attributes.get(&order_by.attribute).cloned());
    (value, item.item_name.clone())
}

fn compare_keys(a: &PageKey, b: &PageKey, query: &SelectQuery) -> Ordering {
    match query.order_by.as_ref().map(|order_by| order_by.order) {
        Some(SortOrder::Desc) => b.cmp(a),
        _ => a.cmp(b),
    }
}

fn encode_page_token(key: &PageKey) -> Result<String> {
    Ok(format!("{}{}", PAGE_TOKEN_PREFIX, serde_json::to_string(key)?))
}

fn decode_page_token(token: &str) -> Result<PageKey> {
    token
        .strip_prefix(PAGE_TOKEN_PREFIX)
        .and_then(|raw| serde_json::from_str::<PageKey>(raw).ok())
        .ok_or_else(|| DbError::InvalidArgument(format!("malformed page token '{}'", token)))
}

fn check_batch_len(kind: &str, len: usize) -> Result<()> {
    if len == 0 || len > MAX_BATCH_ITEMS {
        return Err(DbError::InvalidArgument(format!(
            "{} must carry 1..={} items, got {}",
            kind, MAX_BATCH_ITEMS, len
        )));
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, request: PutRequest) -> Result<()> {
        let now = self.clock.now();
        let horizon = self.horizon(now);
        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        state.stats.puts += 1;
        state.take_failure(StoreOp::Put, &request.domain, &[request.item_name.as_str()])?;

        if let Some(condition) = &request.condition {
            let current = state
                .domains
                .get(&request.domain)
                .and_then(|items| items.get(&request.item_name))
                .and_then(|history| history.latest());
            if !condition.holds(current) {
                state.stats.conflicts += 1;
                let actual = current
                    .and_then(|attrs| attrs.get(condition.attribute()))
                    .map(String::as_str)
                    .unwrap_or("<absent>");
                return Err(DbError::version_conflict(
                    &request.domain,
                    &request.item_name,
                    format!("condition {:?} failed, current value {}", condition, actual),
                ));
            }
        }

        Self::write(
            state,
            &request.domain,
            &request.item_name,
            Some(request.attributes),
            now,
            horizon,
        );
        Ok(())
    }

    async fn batch_put(&self, request: BatchPutRequest) -> Result<()> {
        let now = self.clock.now();
        let horizon = self.horizon(now);
        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        state.stats.batch_puts += 1;
        check_batch_len("batch put", request.items.len())?;
        let names = request
            .items
            .iter()
            .map(|item| item.item_name.as_str())
            .collect::<Vec<_>>();
        state.take_failure(StoreOp::BatchPut, &request.domain, &names)?;

        for item in request.items {
            Self::write(
                state,
                &request.domain,
                &item.item_name,
                Some(item.attributes),
                now,
                horizon,
            );
        }
        Ok(())
    }

    async fn delete(&self, request: DeleteRequest) -> Result<()> {
        let now = self.clock.now();
        let horizon = self.horizon(now);
        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        state.stats.deletes += 1;
        state.take_failure(StoreOp::Delete, &request.domain, &[request.item_name.as_str()])?;
        Self::write(
            state,
            &request.domain,
            &request.item_name,
            None,
            now,
            horizon,
        );
        Ok(())
    }

    async fn batch_delete(&self, request: BatchDeleteRequest) -> Result<()> {
        let now = self.clock.now();
        let horizon = self.horizon(now);
        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        state.stats.batch_deletes += 1;
        check_batch_len("batch delete", request.item_names.len())?;
        let names = request
            .item_names
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>();
        state.take_failure(StoreOp::BatchDelete, &request.domain, &names)?;
        for item_name in &request.item_names {
            Self::write(state, &request.domain, item_name, None, now, horizon);
        }
        Ok(())
    }

    async fn get(
        &self,
        domain: &str,
        item_name: &str,
        consistent: bool,
    ) -> Result<Option<Attributes>> {
        let horizon = self.horizon(self.clock.now());
        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        state.stats.gets += 1;
        if consistent {
            state.stats.consistent_gets += 1;
        }
        state.take_failure(StoreOp::Get, domain, &[item_name])?;

        let Some(history) = state.domains.get(domain).and_then(|items| items.get(item_name))
        else {
            return Ok(None);
        };
        let attrs = if consistent {
            history.latest()
        } else {
            history.visible_at(horizon)
        };
        Ok(attrs.cloned())
    }

    async fn select(&self, query: &SelectQuery, consistent: bool) -> Result<SelectPage> {
        query.validate()?;
        let after = query.next_token.as_deref().map(decode_page_token).transpose()?;
        let horizon = self.horizon(self.clock.now());
        let mut guard = self.state.lock()?;
        let state = &mut *guard;
        state.stats.selects += 1;
        if consistent {
            state.stats.consistent_selects += 1;
        }
        state.take_failure(StoreOp::Select, &query.domain, &[])?;

        let mut matched = state
            .domains
            .get(&query.domain)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|(item_name, history)| {
                        let attrs = if consistent {
                            history.latest()
                        } else {
                            history.visible_at(horizon)
                        }?;
                        query.matches(attrs).then(|| SelectItem {
                            item_name: item_name.clone(),
                            attributes: attrs.clone(),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        matched.sort_by(|a, b| compare_keys(&sort_key(a, query), &sort_key(b, query), query));
        if let Some(after) = &after {
            matched.retain(|item| compare_keys(&sort_key(item, query), after, query) == Ordering::Greater);
        }

        let has_more = matched.len() > query.limit;
        matched.truncate(query.limit);
        let next_token = match (has_more, matched.last()) {
            (true, Some(last)) => Some(encode_page_token(&sort_key(last, query))?),
            _ => None,
        };
        let items = matched;

        Ok(SelectPage { items, next_token })
    }
}
