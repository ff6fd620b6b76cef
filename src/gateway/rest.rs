use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::feed::{ChangeFeed, HEARTBEAT_INTERVAL};
use super::{
    into_fields, CollectionGateway, CollectionQuery, Document, Listener, Subscription,
    SubscriptionEvent, UPDATED_AT,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{http_client, Fetch, FetchBuilder};

const RETURN_REPRESENTATION: &str = "return=representation";

/// A store that refuses a write with 401/403 is a rejected write like any
/// other, not a failed sign-in
fn write_rejected(e: Error) -> Error {
    match e {
        Error::Auth(message) => Error::database(format!("write refused: {}", message)),
        other => other,
    }
}

struct RestInner {
    url: String,
    key: String,
    schema: String,
    client: Client,
    access_token: RwLock<Option<String>>,
    poll_interval: Duration,
    change_feed: bool,
}

impl RestInner {
    fn table_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.url, collection)
    }

    fn token(&self) -> Option<String> {
        self.access_token
            .read()
            .map(|token| token.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn authorize<'a>(&self, builder: FetchBuilder<'a>) -> FetchBuilder<'a> {
        let builder = builder.api_key(&self.key);
        match self.token() {
            Some(token) => builder.bearer_auth(&token),
            None => builder,
        }
    }

    async fn fetch_snapshot(&self, query: &CollectionQuery) -> Result<Vec<Document>> {
        let order = format!("{}.{}.nullslast", query.order_field, query.direction.as_str());
        let rows: Vec<Value> = self
            .authorize(Fetch::get(&self.client, &self.table_url(&query.collection)))
            .query("select", "*")
            .query("order", &order)
            .execute()
            .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            match Document::from_row(row) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!("Skipping row of {}: {}", query.collection, e),
            }
        }
        Ok(docs)
    }

    async fn deliver(&self, query: &CollectionQuery, listener: &Listener) {
        match self.fetch_snapshot(query).await {
            Ok(docs) => {
                debug!("Snapshot of {} with {} documents", query.collection, docs.len());
                listener(SubscriptionEvent::Snapshot(docs));
            }
            Err(e) => {
                warn!("Error fetching {}: {}", query.collection, e);
                listener(SubscriptionEvent::Error(e));
            }
        }
    }

    /// Deliver snapshots until the subscription task is aborted: once up
    /// front, then on every change notification, and every poll interval
    /// while the change feed is unavailable
    async fn run(self: Arc<Self>, query: CollectionQuery, listener: Listener) {
        let mut feed_down = false;
        loop {
            self.deliver(&query, &listener).await;

            if self.change_feed {
                let token = self.token();
                match ChangeFeed::connect(
                    &self.url,
                    &self.key,
                    token.as_deref(),
                    &self.schema,
                    &query.collection,
                    HEARTBEAT_INTERVAL,
                )
                .await
                {
                    Ok(mut feed) => {
                        if feed_down {
                            info!("Change feed for {} is back", query.collection);
                            feed_down = false;
                        }
                        while let Some(change) = feed.next_change().await {
                            match change {
                                Ok(()) => self.deliver(&query, &listener).await,
                                Err(e) => {
                                    listener(SubscriptionEvent::Error(e));
                                    break;
                                }
                            }
                        }
                        warn!("Change feed for {} ended, polling", query.collection);
                        feed_down = true;
                    }
                    Err(e) => {
                        if !feed_down {
                            warn!("Change feed for {} unavailable: {}", query.collection, e);
                            listener(SubscriptionEvent::Error(e));
                            feed_down = true;
                        }
                    }
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Gateway over the hosted project's REST interface
///
/// Tables are addressed as `/rest/v1/{collection}` with an `id` primary key
/// and server defaults for `id` and `createdAt`. Subscriptions re-read the
/// table whenever the realtime change feed reports a change.
#[derive(Clone)]
pub struct RestGateway {
    inner: Arc<RestInner>,
}

impl RestGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let client = http_client(config.request_timeout)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: &Config, client: Client) -> Self {
        Self {
            inner: Arc::new(RestInner {
                url: config.url.clone(),
                key: config.key.clone(),
                schema: config.db_schema.clone(),
                client,
                access_token: RwLock::new(None),
                poll_interval: config.poll_interval,
                change_feed: true,
            }),
        }
    }

    /// Refresh subscriptions by polling only, never opening a websocket
    pub fn polling_only(config: &Config) -> Result<Self> {
        let mut gateway = Self::new(config)?;
        if let Some(inner) = Arc::get_mut(&mut gateway.inner) {
            inner.change_feed = false;
        }
        Ok(gateway)
    }

    fn inner(&self) -> &RestInner {
        &self.inner
    }

    fn row_filter(id: &str) -> String {
        format!("eq.{}", id)
    }
}

#[async_trait]
impl CollectionGateway for RestGateway {
    async fn subscribe(&self, query: CollectionQuery, listener: Listener) -> Result<Subscription> {
        let (listener, active) = Subscription::guard(listener);
        let collection = query.collection.clone();
        let handle = tokio::spawn(self.inner.clone().run(query, listener));
        debug!("Subscribed to {}", collection);
        Ok(Subscription::new(active, move || {
            handle.abort();
            debug!("Unsubscribed from {}", collection);
        }))
    }

    async fn create(&self, collection: &str, record: Value) -> Result<String> {
        let inner = self.inner();
        let fields = into_fields(record)?;
        let rows: Vec<Value> = inner
            .authorize(Fetch::post(&inner.client, &inner.table_url(collection)))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&fields)?
            .execute()
            .await
            .map_err(write_rejected)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::database(format!("insert into {} returned no rows", collection)))?;
        let doc = Document::from_row(row)?;
        info!("Created {}/{}", collection, doc.id);
        Ok(doc.id)
    }

    async fn put(&self, collection: &str, id: &str, record: Value) -> Result<()> {
        let inner = self.inner();
        let mut fields = into_fields(record)?;
        fields.insert("id".to_string(), Value::String(id.to_string()));
        inner
            .authorize(Fetch::post(&inner.client, &inner.table_url(collection)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&fields)?
            .execute_empty()
            .await
            .map_err(write_rejected)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.inner();
        let rows: Vec<Value> = inner
            .authorize(Fetch::get(&inner.client, &inner.table_url(collection)))
            .query("select", "*")
            .query("id", &Self::row_filter(id))
            .execute()
            .await?;
        rows.into_iter().next().map(Document::from_row).transpose()
    }

    async fn mutate(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let inner = self.inner();
        let mut fields = into_fields(patch)?;
        fields.insert(
            UPDATED_AT.to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        let rows: Vec<Value> = inner
            .authorize(Fetch::patch(&inner.client, &inner.table_url(collection)))
            .query("id", &Self::row_filter(id))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&fields)?
            .execute()
            .await
            .map_err(write_rejected)?;
        if rows.is_empty() {
            return Err(Error::not_found(collection, id));
        }
        Ok(())
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<()> {
        let inner = self.inner();
        let rows: Vec<Value> = inner
            .authorize(Fetch::delete(&inner.client, &inner.table_url(collection)))
            .query("id", &Self::row_filter(id))
            .header("Prefer", RETURN_REPRESENTATION)
            .execute()
            .await
            .map_err(write_rejected)?;
        if rows.is_empty() {
            return Err(Error::not_found(collection, id));
        }
        Ok(())
    }

    fn set_access_token(&self, token: Option<&str>) {
        let mut current = self
            .inner
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = token.map(str::to_string);
    }
}
