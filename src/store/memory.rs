//! In-process store for tests and local rehearsal.
//!
//! Evaluates the subset of the MongoDB query language the purge generates
//! (`$and`, `$or`, comparisons, `$in`/`$nin`, `$exists`, literal equality,
//! dotted paths) and records every fetch and delete so callers can check
//! exactly what was touched.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering},
    },
};

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{DocumentStore, StoreConnector, StoreError, StoreResult};
use crate::config::ConnectionConfig;

/// Store operations that can be observed or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListCollections,
    Count,
    Fetch,
    Delete,
}

/// A recorded fetch or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub collection: String,
    pub ids: Vec<Bson>,
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    /// 1-based call number of `op` that fails.
    on_call: usize,
    transient: bool,
}

type FetchHook = Box<dyn FnMut(&str, &mut Vec<Document>) + Send>;

pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
    fetches: Mutex<Vec<StoreCall>>,
    deletes: Mutex<Vec<StoreCall>>,
    faults: Mutex<Vec<Fault>>,
    call_counts: Mutex<HashMap<StoreOp, usize>>,
    fetch_hook: Mutex<Option<FetchHook>>,
    connect_attempts: AtomicUsize,
    connected_password: Mutex<Option<String>>,
    refuse_connections: AtomicBool,
    closed: AtomicBool,
    delete_calls: watch::Sender<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(BTreeMap::new()),
            fetches: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            call_counts: Mutex::new(HashMap::new()),
            fetch_hook: Mutex::new(None),
            connect_attempts: AtomicUsize::new(0),
            connected_password: Mutex::new(None),
            refuse_connections: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            delete_calls: watch::channel(0).0,
        }
    }

    /// Add a collection holding `documents`.
    pub fn with_collection(
        self,
        name: impl Into<String>,
        documents: impl IntoIterator<Item = Document>,
    ) -> Self {
        self.insert(name, documents);
        self
    }

    /// Append documents to a collection, creating it if needed.
    pub fn insert(&self, name: impl Into<String>, documents: impl IntoIterator<Item = Document>) {
        self.collections
            .lock()
            .entry(name.into())
            .or_default()
            .extend(documents);
    }

    /// Current number of documents in a collection (0 if it does not exist).
    pub fn document_count(&self, name: &str) -> usize {
        self.collections.lock().get(name).map_or(0, Vec::len)
    }

    /// Snapshot of a collection's documents.
    pub fn documents(&self, name: &str) -> Vec<Document> {
        self.collections.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn fetches(&self) -> Vec<StoreCall> {
        self.fetches.lock().clone()
    }

    pub fn deletes(&self) -> Vec<StoreCall> {
        self.deletes.lock().clone()
    }

    /// Make the `on_call`-th (1-based) invocation of `op` fail once.
    pub fn inject_fault(&self, op: StoreOp, on_call: usize, transient: bool) {
        self.faults.lock().push(Fault {
            op,
            on_call,
            transient,
        });
    }

    /// Run `hook` against the collection right after each fetch, simulating a
    /// concurrent writer between the fetch and the delete.
    pub fn on_fetch(&self, hook: impl FnMut(&str, &mut Vec<Document>) + Send + 'static) {
        *self.fetch_hook.lock() = Some(Box::new(hook));
    }

    /// Reject every subsequent connection attempt.
    pub fn refuse_connections(&self) {
        self.refuse_connections.store(true, AtomicOrdering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(AtomicOrdering::SeqCst)
    }

    /// The password supplied by the most recent connection attempt.
    pub fn connected_password(&self) -> Option<String> {
        self.connected_password.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    /// Watch the number of completed delete calls.
    pub fn subscribe_deletes(&self) -> watch::Receiver<usize> {
        self.delete_calls.subscribe()
    }

    fn check_fault(&self, op: StoreOp) -> StoreResult<()> {
        let call = {
            let mut counts = self.call_counts.lock();
            let count = counts.entry(op).or_insert(0);
            *count += 1;
            *count
        };

        let mut faults = self.faults.lock();
        if let Some(index) = faults
            .iter()
            .position(|f| f.op == op && f.on_call == call)
        {
            let fault = faults.remove(index);
            let message = format!("injected {:?} failure on call {}", op, call);
            return Err(if fault.transient {
                StoreError::Transient(message)
            } else {
                StoreError::Backend(message)
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.check_fault(StoreOp::ListCollections)?;
        Ok(self.collections.lock().keys().cloned().collect())
    }

    async fn count(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        self.check_fault(StoreOp::Count)?;
        let collections = self.collections.lock();
        let Some(documents) = collections.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in documents {
            if matches(document, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn oldest_ids(
        &self,
        collection: &str,
        filter: &Document,
        sort_field: &str,
        limit: u32,
    ) -> StoreResult<Vec<Bson>> {
        self.check_fault(StoreOp::Fetch)?;
        let mut collections = self.collections.lock();

        let mut selected = Vec::new();
        if let Some(documents) = collections.get(collection) {
            for document in documents {
                if matches(document, filter)? {
                    selected.push(document);
                }
            }
        }

        selected.sort_by(|a, b| {
            sort_key_cmp(lookup(a, sort_field), lookup(b, sort_field))
                .then_with(|| sort_key_cmp(a.get("_id"), b.get("_id")))
        });

        let ids: Vec<Bson> = selected
            .into_iter()
            .take(limit as usize)
            .filter_map(|document| document.get("_id").cloned())
            .collect();

        if let Some(hook) = self.fetch_hook.lock().as_mut()
            && let Some(documents) = collections.get_mut(collection)
        {
            hook(collection, documents);
        }

        self.fetches.lock().push(StoreCall {
            collection: collection.to_string(),
            ids: ids.clone(),
        });
        Ok(ids)
    }

    async fn delete_ids(&self, collection: &str, ids: &[Bson]) -> StoreResult<u64> {
        self.check_fault(StoreOp::Delete)?;

        let deleted = {
            let mut collections = self.collections.lock();
            match collections.get_mut(collection) {
                Some(documents) => {
                    let before = documents.len();
                    documents.retain(|d| d.get("_id").is_none_or(|id| !ids.contains(id)));
                    (before - documents.len()) as u64
                }
                None => 0,
            }
        };

        self.deletes.lock().push(StoreCall {
            collection: collection.to_string(),
            ids: ids.to_vec(),
        });
        self.delete_calls.send_modify(|n| *n += 1);
        Ok(deleted)
    }

    async fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl StoreConnector for Arc<MemoryStore> {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        password: Option<String>,
    ) -> StoreResult<Arc<dyn DocumentStore>> {
        self.connect_attempts.fetch_add(1, AtomicOrdering::SeqCst);
        *self.connected_password.lock() = password;

        if self.refuse_connections.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Connection {
                target: config.redacted_uri(),
                message: "connection refused".to_string(),
            });
        }

        Ok(self.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query evaluation
// ─────────────────────────────────────────────────────────────────────────────

fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(StoreError::Backend(format!(
                    "unsupported top-level operator {op}"
                )));
            }
            path => matches_condition(lookup(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, condition: &'a Bson) -> StoreResult<Vec<&'a Document>> {
    let invalid = || StoreError::Backend(format!("{op} expects an array of documents"));
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| item.as_document().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> StoreResult<bool> {
    match condition {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
            for (op, arg) in ops {
                if !apply_operator(value, op, arg)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(equals(value, literal)),
    }
}

fn apply_operator(value: Option<&Bson>, op: &str, arg: &Bson) -> StoreResult<bool> {
    Ok(match op {
        "$eq" => equals(value, arg),
        "$ne" => !equals(value, arg),
        "$lt" => ordered(value, arg, Ordering::is_lt),
        "$lte" => ordered(value, arg, Ordering::is_le),
        "$gt" => ordered(value, arg, Ordering::is_gt),
        "$gte" => ordered(value, arg, Ordering::is_ge),
        "$in" => in_list(value, op, arg)?,
        "$nin" => !in_list(value, op, arg)?,
        "$exists" => value.is_some() == truthy(arg),
        other => {
            return Err(StoreError::Backend(format!(
                "unsupported query operator {other}"
            )));
        }
    })
}

fn equals(value: Option<&Bson>, literal: &Bson) -> bool {
    match value {
        None => matches!(literal, Bson::Null),
        Some(Bson::Array(items)) if !matches!(literal, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, literal))
        }
        Some(value) => values_equal(value, literal),
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Comparison operators only match values of the same type bracket.
fn ordered(value: Option<&Bson>, arg: &Bson, accept: fn(Ordering) -> bool) -> bool {
    value.is_some_and(|v| type_rank(v) == type_rank(arg) && accept(compare(v, arg)))
}

fn in_list(value: Option<&Bson>, op: &str, arg: &Bson) -> StoreResult<bool> {
    match arg {
        Bson::Array(candidates) => Ok(candidates.iter().any(|c| equals(value, c))),
        _ => Err(StoreError::Backend(format!("{op} expects an array"))),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).is_none_or(|n| n != 0.0),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Cross-type ordering used by the server when sorting.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

fn compare(a: &Bson, b: &Bson) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank.is_ne() {
        return rank;
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        },
    }
}

/// Missing fields sort with nulls, before every other value.
fn sort_key_cmp(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    compare(a.unwrap_or(&Bson::Null), b.unwrap_or(&Bson::Null))
}
