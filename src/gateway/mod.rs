//! Remote collection gateway
//!
//! The document store behind the admin dashboard is reached only through
//! [`CollectionGateway`]. Two implementations ship with the crate: an
//! in-memory store for tests and local runs ([`MemoryGateway`]) and a REST
//! client with a realtime change feed ([`RestGateway`]).
//!
//! Subscriptions deliver complete ordered snapshots, never diffs, in the
//! order the store emits them, starting with an initial snapshot.

mod feed;
mod memory;
mod rest;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub use feed::ChangeFeed;
pub use memory::{GatewayCalls, MemoryGateway};
pub use rest::RestGateway;

/// Field stamped by the store when a document is created
pub const CREATED_AT: &str = "createdAt";

/// Field stamped on every mutation
pub const UPDATED_AT: &str = "updatedAt";

/// Sort direction of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ascending => "asc",
            Direction::Descending => "desc",
        }
    }
}

/// An ordered query over a whole collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub collection: String,
    pub order_field: String,
    pub direction: Direction,
}

impl CollectionQuery {
    pub fn new(collection: &str, order_field: &str, direction: Direction) -> Self {
        Self {
            collection: collection.to_string(),
            order_field: order_field.to_string(),
            direction,
        }
    }

    /// Newest documents first, by creation time
    pub fn newest_first(collection: &str) -> Self {
        Self::new(collection, CREATED_AT, Direction::Descending)
    }

    /// Sort documents in place; documents missing the order field go last
    pub fn sort(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            let ordering = match (a.field(&self.order_field), b.field(&self.order_field)) {
                (Some(x), Some(y)) => {
                    let ord = compare_values(x, y);
                    match self.direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    }
                }
                (Some(_), None) => CmpOrdering::Less,
                (None, Some(_)) => CmpOrdering::Greater,
                (None, None) => CmpOrdering::Equal,
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });
    }
}

fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}

/// A stored document: its id plus its fields
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: &str, data: Map<String, Value>) -> Self {
        Self {
            id: id.to_string(),
            data,
        }
    }

    /// Split a row carrying its own `id` column into a document
    pub fn from_row(row: Value) -> Result<Self> {
        let mut data = match row {
            Value::Object(map) => map,
            other => return Err(Error::database(format!("expected an object row, got {}", other))),
        };
        let id = match data.remove("id") {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(Error::database("row without an id")),
        };
        Ok(Self { id, data })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name).filter(|v| !v.is_null())
    }

    /// Decode into a typed record, the document id filling its `id` field
    pub fn decode<R: DeserializeOwned>(&self) -> Result<R> {
        let mut fields = self.data.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

/// Take the fields of a JSON object, dropping any `id` key
pub(crate) fn into_fields(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(Error::validation(format!("document body must be an object, got {}", other))),
    }
}

/// What a subscription listener receives
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// The full ordered contents of the collection
    Snapshot(Vec<Document>),
    /// The subscription could not deliver fresh data
    Error(Error),
}

/// Callback invoked for every subscription event
pub type Listener = Arc<dyn Fn(SubscriptionEvent) + Send + Sync>;

/// Handle of a live subscription
///
/// Unsubscribing stops further callbacks; it may be called any number of
/// times. Dropping the handle unsubscribes.
pub struct Subscription {
    active: Arc<AtomicBool>,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Wrap `listener` so that it goes quiet once the subscription ends
    pub(crate) fn guard(listener: Listener) -> (Listener, Arc<AtomicBool>) {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let guarded: Listener = Arc::new(move |event| {
            if flag.load(Ordering::SeqCst) {
                listener(event);
            }
        });
        (guarded, active)
    }

    pub(crate) fn new(active: Arc<AtomicBool>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            active,
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let cancel = match self.cancel.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Operations on named document collections
#[async_trait]
pub trait CollectionGateway: Send + Sync {
    /// Subscribe to the ordered contents of a collection
    async fn subscribe(&self, query: CollectionQuery, listener: Listener) -> Result<Subscription>;

    /// Insert a document; the store assigns its id and creation time
    async fn create(&self, collection: &str, record: Value) -> Result<String>;

    /// Write a whole document under a known id
    async fn put(&self, collection: &str, id: &str, record: Value) -> Result<()>;

    /// Read one document
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Patch some fields of an existing document and stamp `updatedAt`
    async fn mutate(&self, collection: &str, id: &str, patch: Value) -> Result<()>;

    /// Delete an existing document
    async fn remove(&self, collection: &str, id: &str) -> Result<()>;

    /// Act on behalf of a signed-in user from now on; `None` reverts to the
    /// anonymous key
    fn set_access_token(&self, _token: Option<&str>) {}
}
