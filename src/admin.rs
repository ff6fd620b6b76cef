//! Operator actions on enquiries and accounts
//!
//! Status, role and deletion changes are optimistic. Account edits wait for
//! the store before touching the view. Successful writes drop the cached
//! snapshots they make stale.

use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheKey, TtlCache};
use crate::coordinator::{CollectionView, OptimisticCoordinator, Pending};
use crate::error::{Error, Result};
use crate::export::{export_enquiries, CsvExport};
use crate::filter::{AccountFilter, EnquiryFilter};
use crate::gateway::CollectionGateway;
use crate::models::{Account, AccountEdit, AccountStatus, Enquiry, EnquiryStatus, Role, CONTACTS, USERS};

/// Refuse a change that would leave no admin account
///
/// `next_role` is the role `target` would have afterwards, `None` when the
/// account is being deleted.
pub fn ensure_admin_floor(accounts: &[Account], target: &str, next_role: Option<Role>) -> Result<()> {
    let account = match accounts.iter().find(|a| a.id == target) {
        Some(account) => account,
        None => return Ok(()),
    };
    if !account.is_admin() || next_role == Some(Role::Admin) {
        return Ok(());
    }
    let admins = accounts.iter().filter(|a| a.is_admin()).count();
    if admins <= 1 {
        return Err(Error::policy(match next_role {
            None => "cannot delete the only admin account",
            Some(_) => "cannot remove the admin role from the only admin account",
        }));
    }
    Ok(())
}

/// Whether the dashboard should offer deletion of `account`
pub fn can_delete(accounts: &[Account], account: &Account) -> bool {
    ensure_admin_floor(accounts, &account.id, None).is_ok()
}

fn invalidating(
    cache: &TtlCache,
    keys: &'static [CacheKey],
    write: impl std::future::Future<Output = Result<()>> + Send + 'static,
) -> impl std::future::Future<Output = Result<()>> + Send + 'static {
    let cache = cache.clone();
    async move {
        write.await?;
        for key in keys {
            cache.invalidate(*key);
        }
        Ok(())
    }
}

const ENQUIRY_KEYS: &[CacheKey] = &[CacheKey::Contacts, CacheKey::Stats];
const ACCOUNT_KEYS: &[CacheKey] = &[CacheKey::Users];

/// Actions on the enquiry table
#[derive(Clone)]
pub struct EnquiryAdmin {
    gateway: Arc<dyn CollectionGateway>,
    cache: TtlCache,
    coordinator: OptimisticCoordinator<Enquiry>,
}

impl EnquiryAdmin {
    pub fn new(gateway: Arc<dyn CollectionGateway>, cache: TtlCache, view: CollectionView<Enquiry>) -> Self {
        Self {
            gateway,
            cache,
            coordinator: OptimisticCoordinator::new(view),
        }
    }

    pub fn view(&self) -> &CollectionView<Enquiry> {
        self.coordinator.view()
    }

    /// Move an enquiry to `status`
    pub fn set_status(&self, id: &str, status: EnquiryStatus) -> Pending {
        info!("Setting enquiry {} to {}", id, status);
        let gateway = self.gateway.clone();
        let cache = self.cache.clone();
        let target = id.to_string();
        self.coordinator.update(
            id,
            |e| e.status = status,
            move || {
                let write = async move {
                    gateway
                        .mutate(CONTACTS, &target, json!({ "status": status }))
                        .await
                };
                invalidating(&cache, ENQUIRY_KEYS, write)
            },
        )
    }

    pub fn delete(&self, id: &str) -> Pending {
        info!("Deleting enquiry {}", id);
        let gateway = self.gateway.clone();
        let cache = self.cache.clone();
        let target = id.to_string();
        self.coordinator.delete(id, move || {
            let write = async move { gateway.remove(CONTACTS, &target).await };
            invalidating(&cache, ENQUIRY_KEYS, write)
        })
    }

    /// Enquiries currently shown, narrowed by `filter`
    pub fn filtered(&self, filter: &EnquiryFilter) -> Vec<Enquiry> {
        self.view().with(|records| filter.apply(records))
    }

    /// CSV of the enquiries that pass `filter`
    pub fn export(&self, filter: &EnquiryFilter, today: chrono::NaiveDate) -> Result<CsvExport> {
        export_enquiries(&self.filtered(filter), today)
    }
}

/// Actions on the account table
#[derive(Clone)]
pub struct AccountAdmin {
    gateway: Arc<dyn CollectionGateway>,
    cache: TtlCache,
    coordinator: OptimisticCoordinator<Account>,
}

impl AccountAdmin {
    pub fn new(gateway: Arc<dyn CollectionGateway>, cache: TtlCache, view: CollectionView<Account>) -> Self {
        Self {
            gateway,
            cache,
            coordinator: OptimisticCoordinator::new(view),
        }
    }

    pub fn view(&self) -> &CollectionView<Account> {
        self.coordinator.view()
    }

    /// Change an account's role; demoting the last admin is refused before
    /// anything changes
    pub fn set_role(&self, id: &str, role: Role) -> Result<Pending> {
        info!("Setting role of account {} to {}", id, role);
        let gateway = self.gateway.clone();
        let cache = self.cache.clone();
        let target = id.to_string();
        let local_target = target.clone();
        let check_target = target.clone();
        self.coordinator.apply_checked(
            id,
            |accounts| ensure_admin_floor(accounts, &check_target, Some(role)),
            move |accounts| {
                if let Some(account) = accounts.iter_mut().find(|a| a.id == local_target) {
                    account.role = role;
                }
            },
            move || {
                let write = async move { gateway.mutate(USERS, &target, json!({ "role": role })).await };
                invalidating(&cache, ACCOUNT_KEYS, write)
            },
        )
    }

    pub fn set_status(&self, id: &str, status: AccountStatus) -> Pending {
        info!("Setting status of account {} to {}", id, status);
        let gateway = self.gateway.clone();
        let cache = self.cache.clone();
        let target = id.to_string();
        self.coordinator.update(
            id,
            |a| a.status = status,
            move || {
                let write = async move { gateway.mutate(USERS, &target, json!({ "status": status })).await };
                invalidating(&cache, ACCOUNT_KEYS, write)
            },
        )
    }

    /// Delete an account document; deleting the last admin is refused
    pub fn delete(&self, id: &str) -> Result<Pending> {
        info!("Deleting account {}", id);
        let gateway = self.gateway.clone();
        let cache = self.cache.clone();
        let target = id.to_string();
        let check_target = target.clone();
        self.coordinator.delete_checked(
            id,
            |accounts| ensure_admin_floor(accounts, &check_target, None),
            move || {
                let write = async move { gateway.remove(USERS, &target).await };
                invalidating(&cache, ACCOUNT_KEYS, write)
            },
        )
    }

    /// Save the edit form; the view changes only once the store accepts it
    pub async fn edit(&self, id: &str, edit: AccountEdit) -> Result<()> {
        if edit.name.trim().is_empty() || edit.email.trim().is_empty() {
            return Err(Error::validation("name and email are required"));
        }
        self.view()
            .with(|accounts| ensure_admin_floor(accounts, id, Some(edit.role)))?;

        let patch = serde_json::to_value(&edit)?;
        self.gateway.mutate(USERS, id, patch).await?;
        self.cache.invalidate(CacheKey::Users);

        self.view().modify(|accounts| {
            if let Some(account) = accounts.iter_mut().find(|a| a.id == id) {
                edit.apply_to(account);
            }
        });
        Ok(())
    }

    pub fn filtered(&self, filter: &AccountFilter) -> Vec<Account> {
        self.view().with(|records| filter.apply(records))
    }

    /// Whether deleting `account` is currently allowed
    pub fn can_delete(&self, account: &Account) -> bool {
        self.view().with(|accounts| can_delete(accounts, account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use serde_json::Value;

    fn account(id: &str, role: Role) -> Account {
        Account {
            id: id.into(),
            name: format!("User {}", id),
            email: format!("{}@example.com", id),
            role,
            status: AccountStatus::Active,
            created_at: None,
            updated_at: None,
        }
    }

    fn seeded(accounts: &[Account]) -> (MemoryGateway, AccountAdmin) {
        let gateway = MemoryGateway::new();
        for a in accounts {
            let mut doc = serde_json::to_value(a).unwrap();
            doc.as_object_mut().unwrap().remove("id");
            gateway.insert(USERS, &a.id, doc).unwrap();
        }
        let admin = AccountAdmin::new(
            Arc::new(gateway.clone()),
            TtlCache::in_memory(),
            CollectionView::from_records(accounts.to_vec()),
        );
        (gateway, admin)
    }

    #[tokio::test]
    async fn last_admin_cannot_be_deleted() {
        let accounts = vec![account("root", Role::Admin), account("u", Role::User)];
        let (gateway, admin) = seeded(&accounts);

        let result = admin.delete("root");
        assert!(matches!(result, Err(Error::Policy(_))));
        assert_eq!(admin.view().snapshot(), accounts);
        assert_eq!(gateway.calls().writes(), 0);
        assert!(!admin.can_delete(&accounts[0]));
        assert!(admin.can_delete(&accounts[1]));
    }

    #[tokio::test]
    async fn last_admin_cannot_be_demoted() {
        let accounts = vec![account("root", Role::Admin), account("u", Role::User)];
        let (gateway, admin) = seeded(&accounts);

        assert!(matches!(admin.set_role("root", Role::User), Err(Error::Policy(_))));
        assert!(matches!(admin.set_role("root", Role::Moderator), Err(Error::Policy(_))));
        assert_eq!(admin.view().snapshot(), accounts);
        assert_eq!(gateway.calls().mutate, 0);

        let mut edit = AccountEdit::from_account(&accounts[0]);
        edit.role = Role::User;
        assert!(matches!(admin.edit("root", edit).await, Err(Error::Policy(_))));
        assert_eq!(gateway.calls().mutate, 0);
    }

    #[tokio::test]
    async fn one_of_two_admins_may_be_demoted() {
        let accounts = vec![account("a1", Role::Admin), account("a2", Role::Admin)];
        let (gateway, admin) = seeded(&accounts);

        admin.set_role("a1", Role::User).unwrap().await.unwrap();
        assert_eq!(admin.view().get("a1").unwrap().role, Role::User);
        let doc = gateway.get(USERS, "a1").await.unwrap().unwrap();
        assert_eq!(doc.data["role"], Value::from("user"));

        // a2 is now the only admin
        assert!(admin.delete("a2").is_err());
    }

    #[tokio::test]
    async fn failed_delete_puts_account_back() {
        let accounts = vec![
            account("a1", Role::Admin),
            account("u1", Role::User),
            account("u2", Role::User),
        ];
        let (gateway, admin) = seeded(&accounts);
        gateway.fail_with(Some("network down"));

        let pending = admin.delete("u1").unwrap();
        assert!(admin.view().get("u1").is_none());
        assert!(pending.await.is_err());
        assert_eq!(admin.view().snapshot(), accounts);
    }

    #[tokio::test]
    async fn edit_waits_for_the_store() {
        let accounts = vec![account("a1", Role::Admin), account("u1", Role::User)];
        let (gateway, admin) = seeded(&accounts);

        let mut edit = AccountEdit::from_account(&accounts[1]);
        edit.name = "Renamed".into();
        edit.status = AccountStatus::Inactive;

        gateway.fail_with(Some("offline"));
        assert!(admin.edit("u1", edit.clone()).await.is_err());
        assert_eq!(admin.view().get("u1").unwrap().name, "User u1");

        gateway.fail_with(None);
        admin.edit("u1", edit).await.unwrap();
        let updated = admin.view().get("u1").unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.status, AccountStatus::Inactive);
    }

    #[tokio::test]
    async fn status_change_invalidates_cached_snapshots() {
        let gateway = MemoryGateway::new();
        gateway
            .insert(CONTACTS, "e1", json!({"name": "A", "status": "new"}))
            .unwrap();
        let cache = TtlCache::in_memory();
        cache.set(CacheKey::Contacts, &json!([]));
        cache.set(CacheKey::Stats, &json!({}));

        let view = CollectionView::from_records(vec![Enquiry {
            id: "e1".into(),
            name: "A".into(),
            company: None,
            phone: None,
            email: String::new(),
            subject: String::new(),
            message: String::new(),
            status: EnquiryStatus::New,
            created_at: None,
            updated_at: None,
        }]);
        let admin = EnquiryAdmin::new(Arc::new(gateway.clone()), cache.clone(), view);

        admin.set_status("e1", EnquiryStatus::Pending).await.unwrap();
        assert!(cache.get::<Value>(CacheKey::Contacts).is_none());
        assert!(cache.get::<Value>(CacheKey::Stats).is_none());
        assert_eq!(gateway.get(CONTACTS, "e1").await.unwrap().unwrap().data["status"], "pending");
    }
}
