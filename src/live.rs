//! Cache-then-subscribe collections behind the dashboard
//!
//! A live collection paints from the TTL cache first, then attaches a
//! subscription. Every snapshot replaces the view and the cached copy.
//! Subscription errors leave the last snapshot on screen and mark the
//! collection degraded until the next snapshot arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::admin::{AccountAdmin, EnquiryAdmin};
use crate::cache::{CacheKey, TtlCache};
use crate::coordinator::CollectionView;
use crate::error::{Error, Result};
use crate::gateway::{CollectionGateway, CollectionQuery, Document, Listener, Subscription, SubscriptionEvent};
use crate::models::{Account, Enquiry, EnquiryStats, Record};

/// Freshness of the data a live collection shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataState {
    /// Nothing to show yet
    Loading,
    /// Showing a cached snapshot, waiting for the store
    Cached,
    /// Showing the latest snapshot from the store
    Live,
    /// The subscription failed; the last snapshot stays visible
    Degraded(String),
}

fn decode_all<R: Record>(docs: &[Document]) -> Vec<R> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<R>() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed {} document {}: {}", R::COLLECTION, doc.id, e);
                None
            }
        })
        .collect()
}

/// A view kept current by a subscription
pub struct LiveCollection<R> {
    view: CollectionView<R>,
    state: Arc<watch::Sender<DataState>>,
    subscription: Subscription,
}

impl<R: Record> LiveCollection<R> {
    pub async fn watch(gateway: &dyn CollectionGateway, cache: &TtlCache, key: CacheKey) -> Result<Self> {
        Self::watch_with(gateway, cache, key, CollectionQuery::newest_first(R::COLLECTION), |_| {}).await
    }

    /// Like [`watch`](Self::watch), calling `on_snapshot` with every
    /// snapshot the store delivers
    pub async fn watch_with(
        gateway: &dyn CollectionGateway,
        cache: &TtlCache,
        key: CacheKey,
        query: CollectionQuery,
        on_snapshot: impl Fn(&[R]) + Send + Sync + 'static,
    ) -> Result<Self> {
        let view = CollectionView::new();
        let (state, _) = watch::channel(DataState::Loading);
        let state = Arc::new(state);

        if let Some(records) = cache.get::<Vec<R>>(key) {
            debug!("Painting {} {} from cache", records.len(), R::COLLECTION);
            view.replace(records);
            state.send_replace(DataState::Cached);
        }

        let listener: Listener = {
            let view = view.clone();
            let state = state.clone();
            let cache = cache.clone();
            Arc::new(move |event| match event {
                SubscriptionEvent::Snapshot(docs) => {
                    let records: Vec<R> = decode_all(&docs);
                    cache.set(key, &records);
                    view.replace(records.clone());
                    state.send_replace(DataState::Live);
                    on_snapshot(&records);
                }
                SubscriptionEvent::Error(e) => {
                    warn!("Subscription to {} failed: {}", R::COLLECTION, e);
                    state.send_replace(DataState::Degraded(e.to_string()));
                }
            })
        };

        let subscription = gateway.subscribe(query, listener).await?;
        info!("Watching {}", R::COLLECTION);
        Ok(Self {
            view,
            state,
            subscription,
        })
    }

    pub fn view(&self) -> &CollectionView<R> {
        &self.view
    }

    pub fn state(&self) -> DataState {
        self.state.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<DataState> {
        self.state.subscribe()
    }

    /// Wait until a snapshot from the store has been applied
    pub async fn wait_for_live(&self, timeout: Duration) -> Result<()> {
        let mut changes = self.state_changes();
        let wait = async move {
            loop {
                let live = *changes.borrow_and_update() == DataState::Live;
                if live {
                    return Ok(());
                }
                if changes.changed().await.is_err() {
                    return Err(Error::realtime(format!("{} subscription closed", R::COLLECTION)));
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::realtime(format!("no snapshot of {} within {:?}", R::COLLECTION, timeout)))?
    }

    /// Stop following the store; the view keeps its last contents
    pub fn close(&self) {
        self.subscription.unsubscribe();
    }
}

/// Everything the admin dashboard shows and acts on
pub struct Dashboard {
    enquiries: LiveCollection<Enquiry>,
    accounts: LiveCollection<Account>,
    stats: Arc<watch::Sender<EnquiryStats>>,
    enquiry_admin: EnquiryAdmin,
    account_admin: AccountAdmin,
}

impl Dashboard {
    /// Open both collections; stats follow the enquiry snapshots
    pub async fn open(gateway: Arc<dyn CollectionGateway>, cache: TtlCache) -> Result<Self> {
        let cached_stats = cache.get::<EnquiryStats>(CacheKey::Stats);
        let (stats, _) = watch::channel(cached_stats.unwrap_or_default());
        let stats = Arc::new(stats);

        let enquiries = {
            let stats = stats.clone();
            let stats_cache = cache.clone();
            LiveCollection::watch_with(
                gateway.as_ref(),
                &cache,
                CacheKey::Contacts,
                CollectionQuery::newest_first(Enquiry::COLLECTION),
                move |records: &[Enquiry]| {
                    let computed = EnquiryStats::from_enquiries(records);
                    stats_cache.set(CacheKey::Stats, &computed);
                    stats.send_replace(computed);
                },
            )
            .await?
        };
        if cached_stats.is_none() && enquiries.state() == DataState::Cached {
            stats.send_replace(enquiries.view().with(|records| EnquiryStats::from_enquiries(records)));
        }

        let accounts = LiveCollection::watch(gateway.as_ref(), &cache, CacheKey::Users).await?;

        Ok(Self {
            enquiry_admin: EnquiryAdmin::new(gateway.clone(), cache.clone(), enquiries.view().clone()),
            account_admin: AccountAdmin::new(gateway, cache, accounts.view().clone()),
            enquiries,
            accounts,
            stats,
        })
    }

    pub fn enquiries(&self) -> &LiveCollection<Enquiry> {
        &self.enquiries
    }

    pub fn accounts(&self) -> &LiveCollection<Account> {
        &self.accounts
    }

    pub fn stats(&self) -> EnquiryStats {
        *self.stats.borrow()
    }

    pub fn stats_changes(&self) -> watch::Receiver<EnquiryStats> {
        self.stats.subscribe()
    }

    pub fn enquiry_admin(&self) -> &EnquiryAdmin {
        &self.enquiry_admin
    }

    pub fn account_admin(&self) -> &AccountAdmin {
        &self.account_admin
    }

    /// Stop both subscriptions
    pub fn close(&self) {
        self.enquiries.close();
        self.accounts.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::models::{EnquiryStatus, CONTACTS, USERS};
    use serde_json::json;

    fn seed(gateway: &MemoryGateway, id: &str, status: &str, created: &str) {
        gateway
            .insert(
                CONTACTS,
                id,
                json!({"name": id, "email": "e@x.com", "subject": "s", "message": "m", "status": status, "createdAt": created}),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn snapshot_replaces_view_and_cache() {
        let gateway = MemoryGateway::new();
        let cache = TtlCache::in_memory();
        seed(&gateway, "a", "new", "2024-01-02T00:00:00Z");
        seed(&gateway, "b", "new", "2024-01-01T00:00:00Z");

        let live = LiveCollection::<Enquiry>::watch(&gateway, &cache, CacheKey::Contacts)
            .await
            .unwrap();
        assert_eq!(live.state(), DataState::Live);
        assert_eq!(live.view().len(), 2);

        gateway.remove(CONTACTS, "b").await.unwrap();
        assert!(live.view().get("b").is_none());
        assert!(live.view().get("a").is_some());

        let cached: Vec<Enquiry> = cache.get(CacheKey::Contacts).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "a");
    }

    #[tokio::test]
    async fn error_keeps_cached_snapshot_visible() {
        let gateway = MemoryGateway::new();
        let cache = TtlCache::in_memory();
        cache.set(
            CacheKey::Users,
            &json!([{"id": "u1", "name": "Cached", "email": "c@x.com", "role": "admin"}]),
        );
        gateway.fail_with(Some("offline"));

        let live = LiveCollection::<Account>::watch(&gateway, &cache, CacheKey::Users)
            .await
            .unwrap();
        assert!(matches!(live.state(), DataState::Degraded(_)));
        assert_eq!(live.view().get("u1").unwrap().name, "Cached");

        gateway.fail_with(None);
        gateway.insert(USERS, "u2", json!({"name": "Fresh"})).unwrap();
        gateway.remove(USERS, "u2").await.unwrap();
        assert_eq!(live.state(), DataState::Live);
        assert!(live.view().is_empty());
    }

    #[tokio::test]
    async fn wait_for_live_times_out_while_degraded() {
        let gateway = MemoryGateway::new();
        gateway.fail_with(Some("offline"));
        let live = LiveCollection::<Enquiry>::watch(&gateway, &TtlCache::in_memory(), CacheKey::Contacts)
            .await
            .unwrap();
        assert!(live.wait_for_live(Duration::from_millis(20)).await.is_err());
    }

    #[tokio::test]
    async fn closed_collection_stops_updating() {
        let gateway = MemoryGateway::new();
        let live = LiveCollection::<Enquiry>::watch(&gateway, &TtlCache::in_memory(), CacheKey::Contacts)
            .await
            .unwrap();
        live.wait_for_live(Duration::from_millis(100)).await.unwrap();
        live.close();
        seed(&gateway, "late", "new", "2024-01-01T00:00:00Z");
        gateway.remove(CONTACTS, "late").await.unwrap();
        assert_eq!(gateway.listener_count(), 0);
        assert!(live.view().is_empty());
    }

    #[tokio::test]
    async fn dashboard_stats_follow_enquiries() {
        let gateway = MemoryGateway::new();
        let cache = TtlCache::in_memory();
        seed(&gateway, "a", "new", "2024-01-02T00:00:00Z");
        seed(&gateway, "b", "pending", "2024-01-01T00:00:00Z");

        let dashboard = Dashboard::open(Arc::new(gateway.clone()), cache.clone()).await.unwrap();
        assert_eq!(dashboard.stats().total, 2);
        assert_eq!(dashboard.stats().pending, 1);

        dashboard
            .enquiry_admin()
            .set_status("a", EnquiryStatus::Contacted)
            .await
            .unwrap();
        assert_eq!(dashboard.stats().contacted, 1);
        assert_eq!(dashboard.stats().new, 0);
        dashboard.close();

        let reopened = Dashboard::open(Arc::new(gateway.clone()), cache).await.unwrap();
        assert_eq!(reopened.stats().contacted, 1);
    }
}
