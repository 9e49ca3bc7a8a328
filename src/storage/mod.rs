//! Durable storage port and an in-memory implementation.
//!
//! The core only ever talks to the `Storage` trait; production embeds a
//! real backend behind it, tests and small deployments use `MemoryStore`.

mod import;

pub use import::{parse_accounts, parse_proxies, ImportReport};

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::{Account, ProxyServer, TaskStatus, ViewTask};

/// Durable storage for tasks, proxies and accounts.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_tasks(&self) -> Result<Vec<ViewTask>, CoreError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<ViewTask>, CoreError>;
    async fn insert_task(&self, task: ViewTask) -> Result<(), CoreError>;
    async fn update_task(&self, task: &ViewTask) -> Result<(), CoreError>;

    async fn load_proxies(&self) -> Result<Vec<ProxyServer>, CoreError>;
    async fn get_proxy(&self, id: Uuid) -> Result<Option<ProxyServer>, CoreError>;
    async fn insert_proxy(&self, proxy: ProxyServer) -> Result<(), CoreError>;
    async fn update_proxy(&self, proxy: &ProxyServer) -> Result<(), CoreError>;

    async fn load_accounts(&self) -> Result<Vec<Account>, CoreError>;
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, CoreError>;
    async fn insert_account(&self, account: Account) -> Result<(), CoreError>;
    async fn update_account(&self, account: &Account) -> Result<(), CoreError>;
}

/// Convenience queries shared by the orchestrator and scheduler.
pub async fn tasks_with_status(
    storage: &dyn Storage,
    status: TaskStatus,
) -> Result<Vec<ViewTask>, CoreError> {
    Ok(storage
        .load_tasks()
        .await?
        .into_iter()
        .filter(|t| t.status == status)
        .collect())
}

pub async fn valid_proxies(storage: &dyn Storage) -> Result<Vec<ProxyServer>, CoreError> {
    Ok(storage
        .load_proxies()
        .await?
        .into_iter()
        .filter(|p| p.is_valid)
        .collect())
}

pub async fn valid_accounts(
    storage: &dyn Storage,
    limit: usize,
) -> Result<Vec<Account>, CoreError> {
    Ok(storage
        .load_accounts()
        .await?
        .into_iter()
        .filter(|a| a.is_valid)
        .take(limit)
        .collect())
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<Uuid, ViewTask>>,
    proxies: RwLock<HashMap<Uuid, ProxyServer>>,
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn load_tasks(&self) -> Result<Vec<ViewTask>, CoreError> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ViewTask>, CoreError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn insert_task(&self, task: ViewTask) -> Result<(), CoreError> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn update_task(&self, task: &ViewTask) -> Result<(), CoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(CoreError::Storage(format!("unknown task {}", task.id))),
        }
    }

    async fn load_proxies(&self) -> Result<Vec<ProxyServer>, CoreError> {
        Ok(self.proxies.read().await.values().cloned().collect())
    }

    async fn get_proxy(&self, id: Uuid) -> Result<Option<ProxyServer>, CoreError> {
        Ok(self.proxies.read().await.get(&id).cloned())
    }

    async fn insert_proxy(&self, proxy: ProxyServer) -> Result<(), CoreError> {
        self.proxies.write().await.insert(proxy.id, proxy);
        Ok(())
    }

    async fn update_proxy(&self, proxy: &ProxyServer) -> Result<(), CoreError> {
        let mut proxies = self.proxies.write().await;
        match proxies.get_mut(&proxy.id) {
            Some(slot) => {
                *slot = proxy.clone();
                Ok(())
            }
            None => Err(CoreError::Storage(format!("unknown proxy {}", proxy.id))),
        }
    }

    async fn load_accounts(&self) -> Result<Vec<Account>, CoreError> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, CoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn insert_account(&self, account: Account) -> Result<(), CoreError> {
        self.accounts.write().await.insert(account.id, account);
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<(), CoreError> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&account.id) {
            Some(slot) => {
                *slot = account.clone();
                Ok(())
            }
            None => Err(CoreError::Storage(format!("unknown account {}", account.id))),
        }
    }
}
