use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{
    into_fields, CollectionGateway, CollectionQuery, Document, Listener, Subscription,
    SubscriptionEvent, CREATED_AT, UPDATED_AT,
};
use crate::error::{Error, Result};

/// Number of calls made per gateway operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub subscribe: usize,
    pub create: usize,
    pub put: usize,
    pub get: usize,
    pub mutate: usize,
    pub remove: usize,
}

impl GatewayCalls {
    /// Calls that write to the store
    pub fn writes(&self) -> usize {
        self.create + self.put + self.mutate + self.remove
    }
}

#[derive(Default)]
struct Counters {
    subscribe: AtomicUsize,
    create: AtomicUsize,
    put: AtomicUsize,
    get: AtomicUsize,
    mutate: AtomicUsize,
    remove: AtomicUsize,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    listeners: HashMap<u64, (CollectionQuery, Listener)>,
    next_listener: u64,
    failing: Option<String>,
    access_token: Option<String>,
}

impl MemoryState {
    fn snapshot(&self, query: &CollectionQuery) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id, data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut docs);
        docs
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failing {
            Some(reason) => Err(Error::database(reason)),
            None => Ok(()),
        }
    }
}

struct Shared {
    state: Mutex<MemoryState>,
    // held while a change is applied and announced, so listeners see
    // snapshots in write order
    delivery: Mutex<()>,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_stamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Document store held in process memory
///
/// Behaves like the hosted store as far as the data layer can tell: ids and
/// creation times are assigned on create, `updatedAt` is stamped on mutate
/// and every write pushes a fresh ordered snapshot to the subscribers of
/// that collection. It also counts calls and can be told to fail.
#[derive(Clone)]
pub struct MemoryGateway {
    shared: Arc<Shared>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                delivery: Mutex::new(()),
                counters: Counters::default(),
            }),
        }
    }

    /// Seed a document without counting a call or stamping fields
    pub fn insert(&self, collection: &str, id: &str, record: Value) -> Result<()> {
        let fields = into_fields(record)?;
        let _delivery = lock(&self.shared.delivery);
        lock(&self.shared.state)
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        self.announce(collection);
        Ok(())
    }

    /// Make every following operation fail with a database error until
    /// cleared with `None`
    pub fn fail_with(&self, reason: Option<&str>) {
        lock(&self.shared.state).failing = reason.map(str::to_string);
    }

    /// Push an error to the subscribers of a collection
    pub fn emit_error(&self, collection: &str, message: &str) {
        let listeners: Vec<Listener> = lock(&self.shared.state)
            .listeners
            .values()
            .filter(|(query, _)| query.collection == collection)
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(SubscriptionEvent::Error(Error::realtime(message)));
        }
    }

    pub fn calls(&self) -> GatewayCalls {
        let c = &self.shared.counters;
        GatewayCalls {
            subscribe: c.subscribe.load(Ordering::SeqCst),
            create: c.create.load(Ordering::SeqCst),
            put: c.put.load(Ordering::SeqCst),
            get: c.get.load(Ordering::SeqCst),
            mutate: c.mutate.load(Ordering::SeqCst),
            remove: c.remove.load(Ordering::SeqCst),
        }
    }

    /// Token last handed over with [`set_access_token`](CollectionGateway::set_access_token)
    pub fn access_token(&self) -> Option<String> {
        lock(&self.shared.state).access_token.clone()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.state).listeners.len()
    }

    /// Current contents of a collection, unordered
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.shared.state)
            .collections
            .get(collection)
            .map(|docs| docs.iter().map(|(id, data)| Document::new(id, data.clone())).collect())
            .unwrap_or_default()
    }

    /// Send every subscriber of `collection` its new snapshot; the caller
    /// holds the delivery lock
    fn announce(&self, collection: &str) {
        let pending: Vec<(Listener, Vec<Document>)> = {
            let state = lock(&self.shared.state);
            state
                .listeners
                .values()
                .filter(|(query, _)| query.collection == collection)
                .map(|(query, listener)| (listener.clone(), state.snapshot(query)))
                .collect()
        };
        for (listener, docs) in pending {
            listener(SubscriptionEvent::Snapshot(docs));
        }
    }

    fn write<T>(
        &self,
        collection: &str,
        change: impl FnOnce(&mut BTreeMap<String, Map<String, Value>>) -> Result<T>,
    ) -> Result<T> {
        let _delivery = lock(&self.shared.delivery);
        let result = {
            let mut state = lock(&self.shared.state);
            state.check_failure()?;
            let docs = state.collections.entry(collection.to_string()).or_default();
            change(docs)?
        };
        self.announce(collection);
        Ok(result)
    }
}

#[async_trait]
impl CollectionGateway for MemoryGateway {
    fn set_access_token(&self, token: Option<&str>) {
        lock(&self.shared.state).access_token = token.map(str::to_string);
    }

    async fn subscribe(&self, query: CollectionQuery, listener: Listener) -> Result<Subscription> {
        self.shared.counters.subscribe.fetch_add(1, Ordering::SeqCst);
        let (listener, active) = Subscription::guard(listener);

        let _delivery = lock(&self.shared.delivery);
        let (key, initial) = {
            let mut state = lock(&self.shared.state);
            let key = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(key, (query.clone(), listener.clone()));
            let initial = match state.check_failure() {
                Ok(()) => SubscriptionEvent::Snapshot(state.snapshot(&query)),
                Err(e) => SubscriptionEvent::Error(e),
            };
            (key, initial)
        };
        listener(initial);
        debug!("Subscribed listener {} to {}", key, query.collection);

        let shared = Arc::downgrade(&self.shared);
        Ok(Subscription::new(active, move || {
            if let Some(shared) = shared.upgrade() {
                lock(&shared.state).listeners.remove(&key);
                debug!("Unsubscribed listener {}", key);
            }
        }))
    }

    async fn create(&self, collection: &str, record: Value) -> Result<String> {
        self.shared.counters.create.fetch_add(1, Ordering::SeqCst);
        let mut fields = into_fields(record)?;
        fields.insert(CREATED_AT.to_string(), now_stamp());
        let id = Uuid::new_v4().simple().to_string();
        self.write(collection, |docs| {
            docs.insert(id.clone(), fields);
            Ok(())
        })?;
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, record: Value) -> Result<()> {
        self.shared.counters.put.fetch_add(1, Ordering::SeqCst);
        let mut fields = into_fields(record)?;
        fields.entry(CREATED_AT.to_string()).or_insert_with(now_stamp);
        self.write(collection, |docs| {
            docs.insert(id.to_string(), fields);
            Ok(())
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.shared.counters.get.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.shared.state);
        state.check_failure()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn mutate(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        self.shared.counters.mutate.fetch_add(1, Ordering::SeqCst);
        let patch = into_fields(patch)?;
        self.write(collection, |docs| {
            let doc = docs
                .get_mut(id)
                .ok_or_else(|| Error::not_found(collection, id))?;
            doc.extend(patch);
            doc.insert(UPDATED_AT.to_string(), now_stamp());
            Ok(())
        })
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<()> {
        self.shared.counters.remove.fetch_add(1, Ordering::SeqCst);
        self.write(collection, |docs| {
            docs.remove(id)
                .map(|_| ())
                .ok_or_else(|| Error::not_found(collection, id))
        })
    }
}
