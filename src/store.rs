//! Persistence of accounts across sessions.
//!
//! Two kinds of records are kept: the active [`StoredAccount`] for each
//! provider, and the list of every account ever created ([`AccountRecord`]),
//! from which an inbox can be reopened later.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::provider::ProviderKind;
use crate::{Account, Result};

/// The active account for one provider together with its lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    pub account: Account,
    pub lookup_key: String,
}

/// One entry in the list of known inboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub provider: ProviderKind,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl AccountRecord {
    pub fn new(id: impl Into<String>, provider: ProviderKind, account: &Account) -> Self {
        Self {
            id: id.into(),
            provider,
            address: account.address.clone(),
            token: account.token.clone(),
        }
    }

    pub fn account(&self) -> Account {
        Account {
            address: self.address.clone(),
            token: self.token.clone(),
        }
    }
}

/// Storage backend for accounts.
///
/// `load` returns `Ok(None)` for a provider with nothing stored. A record that
/// exists but cannot be decoded is an error; callers decide whether to
/// recover from it.
#[async_trait]
pub trait AccountStore: Send + Sync + fmt::Debug {
    async fn load(&self, kind: ProviderKind) -> Result<Option<StoredAccount>>;

    async fn save(&self, kind: ProviderKind, stored: &StoredAccount) -> Result<()>;

    async fn remove(&self, kind: ProviderKind) -> Result<()>;

    async fn load_all(&self) -> Result<Vec<AccountRecord>>;

    async fn save_all(&self, records: &[AccountRecord]) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    active: BTreeMap<ProviderKind, StoredAccount>,
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn load(&self, kind: ProviderKind) -> Result<Option<StoredAccount>> {
        Ok(self.doc.lock().await.active.get(&kind).cloned())
    }

    async fn save(&self, kind: ProviderKind, stored: &StoredAccount) -> Result<()> {
        self.doc.lock().await.active.insert(kind, stored.clone());
        Ok(())
    }

    async fn remove(&self, kind: ProviderKind) -> Result<()> {
        self.doc.lock().await.active.remove(&kind);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<AccountRecord>> {
        Ok(self.doc.lock().await.accounts.clone())
    }

    async fn save_all(&self, records: &[AccountRecord]) -> Result<()> {
        self.doc.lock().await.accounts = records.to_vec();
        Ok(())
    }
}

/// Store backed by a single JSON file.
///
/// Every write replaces the whole file through a temporary sibling and a
/// rename, so readers never see a half-written document. A missing file reads
/// as empty.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Document> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Document::default()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, serde_json::to_vec_pretty(doc)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "account store written");
        Ok(())
    }

    async fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Document) + Send,
    {
        let _guard = self.lock.lock().await;
        // A corrupt document is replaced rather than blocking every write.
        let mut doc = match self.read().await {
            Ok(doc) => doc,
            Err(crate::Error::Json(e)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding corrupt account store");
                Document::default()
            }
            Err(e) => return Err(e),
        };
        change(&mut doc);
        self.write(&doc).await
    }
}

#[async_trait]
impl AccountStore for JsonFileStore {
    async fn load(&self, kind: ProviderKind) -> Result<Option<StoredAccount>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.active.remove(&kind))
    }

    async fn save(&self, kind: ProviderKind, stored: &StoredAccount) -> Result<()> {
        let stored = stored.clone();
        self.update(move |doc| {
            doc.active.insert(kind, stored);
        })
        .await
    }

    async fn remove(&self, kind: ProviderKind) -> Result<()> {
        self.update(move |doc| {
            doc.active.remove(&kind);
        })
        .await
    }

    async fn load_all(&self) -> Result<Vec<AccountRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.accounts)
    }

    async fn save_all(&self, records: &[AccountRecord]) -> Result<()> {
        let records = records.to_vec();
        self.update(move |doc| doc.accounts = records).await
    }
}
