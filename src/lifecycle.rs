//! Account lifecycle: create, restore, switch and burn inboxes.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};

use crate::cache::CachedMessage;
use crate::poller::{PollSettings, Poller, poll_once};
use crate::provider::{DeleteSupport, Provider, ProviderKind, random_string};
use crate::registry::ProviderRegistry;
use crate::session::{InboxEvent, LifecycleState, Session, SharedSession};
use crate::store::{AccountRecord, AccountStore, StoredAccount};
use crate::{Account, Error, MessageSource, Result};

const EVENT_CAPACITY: usize = 64;

/// Drives the active inbox.
///
/// The manager owns the session context (provider, account, lookup key and
/// message cache) and the poller attached to it. Transitions are serialized:
/// a switch requested while an account is being created waits for the
/// creation to finish, then replaces it.
///
/// ```no_run
/// use std::sync::Arc;
/// use tempmail_client::{AccountManager, JsonFileStore, ProviderKind, ProviderRegistry};
///
/// # async fn run() -> tempmail_client::Result<()> {
/// let manager = AccountManager::new(
///     ProviderRegistry::with_defaults()?,
///     Arc::new(JsonFileStore::new("accounts.json")),
/// );
/// manager.initialize(ProviderKind::MailTm).await?;
/// println!("inbox: {}", manager.address().await);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AccountManager {
    registry: ProviderRegistry,
    store: Arc<dyn AccountStore>,
    session: SharedSession,
    poller: Poller,
    events: broadcast::Sender<InboxEvent>,
    transition: Mutex<()>,
}

impl AccountManager {
    /// A manager with no active inbox. Call [`AccountManager::initialize`] next.
    ///
    /// Polling uses [`PollSettings::default`].
    pub fn new(registry: ProviderRegistry, store: Arc<dyn AccountStore>) -> Self {
        let initial = registry.default_kind().unwrap_or(ProviderKind::MailTm);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            store,
            session: Session::shared(initial),
            poller: Poller::default(),
            events,
            transition: Mutex::new(()),
        }
    }

    /// Override the polling interval.
    pub fn with_poll_settings(mut self, settings: PollSettings) -> Self {
        self.poller = Poller::new(settings);
        self
    }

    /// The adapters this manager can switch between.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The shared session, for callers that render straight from it.
    pub fn session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    /// Receive state changes, new-mail signals and poll failures.
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use tempmail_client::{AccountManager, InboxEvent, MemoryStore, ProviderKind, ProviderRegistry};
    /// # async fn run() -> tempmail_client::Result<()> {
    /// let manager = AccountManager::new(ProviderRegistry::with_defaults()?, Arc::new(MemoryStore::new()));
    /// let mut events = manager.subscribe();
    /// manager.initialize(ProviderKind::Mailsac).await?;
    /// while let Ok(event) = events.recv().await {
    ///     if let InboxEvent::NewMail { count, .. } = event {
    ///         println!("{count} new message(s)");
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.events.subscribe()
    }

    /// Open the persisted inbox for `kind`, or create one if there is none or
    /// it cannot be read.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownProvider`] if `kind` is not registered, or the
    /// [`Error::AccountCreation`] of a failed creation. After a failed
    /// creation the session is in [`LifecycleState::Error`].
    pub async fn initialize(&self, kind: ProviderKind) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.activate(kind).await
    }

    /// Leave the current inbox and open the one for `kind`.
    ///
    /// A persisted account is restored without any network call.
    pub async fn switch_provider(&self, kind: ProviderKind) -> Result<()> {
        let _guard = self.transition.lock().await;
        tracing::info!(provider = %kind, "switching provider");
        self.activate(kind).await
    }

    /// Discard the persisted account for `kind` and create a new one.
    pub async fn burn(&self, kind: ProviderKind) -> Result<()> {
        let _guard = self.transition.lock().await;
        let provider = self.registry.require(kind)?;
        if let Err(e) = self.store.remove(kind).await {
            tracing::warn!(provider = %kind, error = %e, "failed to remove persisted account");
        }
        tracing::info!(provider = %kind, "burning inbox");
        self.create(kind, provider, None, None).await
    }

    /// Create `username@domain` on the current provider and make it active.
    pub async fn create_custom(&self, username: &str, domain: &str) -> Result<()> {
        let _guard = self.transition.lock().await;
        let kind = self.session.read().await.provider();
        let provider = self.registry.require(kind)?;
        self.create(kind, provider, Some(username), Some(domain))
            .await
    }

    /// Every account recorded in the store.
    pub async fn accounts(&self) -> Result<Vec<AccountRecord>> {
        self.store.load_all().await
    }

    /// Reopen a recorded account. No network call is made.
    pub async fn switch_account(&self, id: &str) -> Result<()> {
        let _guard = self.transition.lock().await;
        let record = self
            .store
            .load_all()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::UnknownAccount(id.to_string()))?;

        let kind = record.provider;
        let provider = self.registry.require(kind)?;
        let account = record.account();
        let lookup_key = kind
            .lookup_key_kind()
            .resolve(&account)
            .ok_or_else(|| Error::UnknownAccount(id.to_string()))?;

        self.stop_polling();
        self.persist_active(kind, &account, &lookup_key).await;
        tracing::info!(provider = %kind, address = %account.address, "switched account");
        self.enter_ready(kind, provider, account, lookup_key, Some(record.id))
            .await;
        Ok(())
    }

    /// Forget a recorded account. Removing the active account replaces it with
    /// a new one on the same provider.
    pub async fn remove_account(&self, id: &str) -> Result<()> {
        let _guard = self.transition.lock().await;
        let mut records = self.store.load_all().await?;
        let Some(index) = records.iter().position(|r| r.id == id) else {
            return Err(Error::UnknownAccount(id.to_string()));
        };
        let removed = records.remove(index);
        self.store.save_all(&records).await?;
        tracing::info!(provider = %removed.provider, address = %removed.address, "account removed");

        let is_active = self.session.read().await.account_id() == Some(id);
        if is_active {
            let kind = removed.provider;
            self.store.remove(kind).await?;
            let provider = self.registry.require(kind)?;
            return self.create(kind, provider, None, None).await;
        }
        Ok(())
    }

    /// Poll now instead of waiting for the next tick.
    ///
    /// Returns the number of messages that arrived since the previous poll.
    pub async fn refresh(&self) -> Result<usize> {
        let (provider, lookup_key) = self.ready_context().await?;
        poll_once(provider.as_ref(), &lookup_key, &self.session, &self.events).await
    }

    /// Select a message, fetching its full content the first time.
    ///
    /// An unread message is also marked read, upstream where the provider
    /// supports it.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMessage`] if the message is not cached,
    /// [`Error::Fetch`] if the detail cannot be fetched and [`Error::NotReady`]
    /// if the inbox was replaced while fetching.
    pub async fn open_message(&self, id: &str) -> Result<CachedMessage> {
        let (provider, lookup_key) = self.ready_context().await?;

        let cached = {
            let mut session = self.session.write().await;
            let cached = session
                .cache()
                .get(id)
                .cloned()
                .ok_or_else(|| Error::UnknownMessage(id.to_string()))?;
            session.select(Some(id.to_string()));
            cached
        };

        if !cached.body.is_loaded() {
            let mut detail = provider.get_message(&lookup_key, id).await?;
            // Cache entries are keyed by the listed id, whatever form the detail echoes.
            detail.summary.id = id.to_string();
            let mut session = self.session.write().await;
            if !session.is_current(&lookup_key) {
                return Err(Error::NotReady);
            }
            session.cache_mut().merge_detail(detail);
        }

        if !cached.summary.seen {
            self.mark_read(provider.as_ref(), &lookup_key, id).await;
        }

        let session = self.session.read().await;
        if !session.is_current(&lookup_key) {
            return Err(Error::NotReady);
        }
        session
            .cache()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownMessage(id.to_string()))
    }

    async fn mark_read(&self, provider: &dyn Provider, lookup_key: &str, id: &str) {
        match provider.mark_as_read(lookup_key, id).await {
            // Providers without read state upstream are tracked locally.
            Ok(()) | Err(Error::Unsupported { .. }) => {
                let mut session = self.session.write().await;
                if session.is_current(lookup_key) {
                    session.cache_mut().mark_seen(id);
                }
            }
            Err(e) => {
                tracing::warn!(provider = %provider.kind(), message = id, error = %e, "mark as read failed");
            }
        }
    }

    /// Delete a message.
    ///
    /// With [`DeleteSupport::Upstream`] the upstream is called first and the
    /// cached copy is dropped only on success. Otherwise the message is
    /// removed from the cache and hidden from later polls of this inbox.
    pub async fn delete_message(&self, id: &str) -> Result<()> {
        let (provider, lookup_key) = self.ready_context().await?;
        let support = provider.delete_support();
        if support == DeleteSupport::Upstream {
            provider.delete_message(&lookup_key, id).await?;
        }

        let mut session = self.session.write().await;
        if session.is_current(&lookup_key) {
            session.forget_message(id, support == DeleteSupport::ClientCacheOnly);
        }
        tracing::debug!(provider = %provider.kind(), message = id, ?support, "message deleted");
        Ok(())
    }

    /// Raw source of a message.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] on providers without a source endpoint.
    pub async fn message_source(&self, id: &str) -> Result<MessageSource> {
        let (provider, lookup_key) = self.ready_context().await?;
        provider.get_message_source(&lookup_key, id).await
    }

    /// Domains the current provider can create addresses on.
    pub async fn domains(&self) -> Result<Vec<String>> {
        let kind = self.session.read().await.provider();
        self.registry.require(kind)?.get_domains().await
    }

    /// Cached messages, newest first.
    pub async fn messages(&self) -> Vec<CachedMessage> {
        let session = self.session.read().await;
        session.cache().messages().into_iter().cloned().collect()
    }

    /// The message last opened, if it is still cached.
    pub async fn selected(&self) -> Option<CachedMessage> {
        let session = self.session.read().await;
        let id = session.selected()?;
        session.cache().get(id).cloned()
    }

    pub async fn state(&self) -> LifecycleState {
        self.session.read().await.state().clone()
    }

    pub async fn provider_kind(&self) -> ProviderKind {
        self.session.read().await.provider()
    }

    /// The active account, while ready.
    pub async fn account(&self) -> Option<Account> {
        self.session.read().await.account().cloned()
    }

    /// See [`Session::display_address`].
    pub async fn address(&self) -> String {
        self.session.read().await.display_address()
    }

    /// Stop background polling. The session keeps its state.
    pub fn shutdown(&self) {
        self.stop_polling();
    }

    async fn ready_context(&self) -> Result<(Arc<dyn Provider>, String)> {
        let session = self.session.read().await;
        let lookup_key = match (session.state(), session.lookup_key()) {
            (LifecycleState::Ready, Some(key)) => key.to_string(),
            _ => return Err(Error::NotReady),
        };
        let provider = self.registry.require(session.provider())?;
        Ok((provider, lookup_key))
    }

    async fn activate(&self, kind: ProviderKind) -> Result<()> {
        let provider = self.registry.require(kind)?;
        self.stop_polling();
        self.session.write().await.detach(kind);

        match self.store.load(kind).await {
            Ok(Some(stored)) if is_restorable(&stored) => {
                let account_id = self.record_id(kind, &stored.account).await;
                tracing::info!(provider = %kind, address = %stored.account.address, "account restored");
                self.enter_ready(kind, provider, stored.account, stored.lookup_key, account_id)
                    .await;
                Ok(())
            }
            Ok(Some(_)) => {
                tracing::warn!(provider = %kind, "persisted account is incomplete, creating a new one");
                self.create(kind, provider, None, None).await
            }
            Ok(None) => self.create(kind, provider, None, None).await,
            Err(e) => {
                tracing::warn!(provider = %kind, error = %e, "persisted account unreadable, creating a new one");
                self.create(kind, provider, None, None).await
            }
        }
    }

    async fn create(
        &self,
        kind: ProviderKind,
        provider: Arc<dyn Provider>,
        username: Option<&str>,
        domain: Option<&str>,
    ) -> Result<()> {
        self.stop_polling();
        self.session.write().await.begin_creating(kind);
        self.publish_state(LifecycleState::Creating);

        let created = provider
            .create_account(username, domain)
            .await
            .and_then(|account| {
                let lookup_key = kind.lookup_key_kind().resolve(&account).ok_or_else(|| {
                    Error::account_creation(
                        kind.name(),
                        Error::ResponseParse("account has no lookup key".into()),
                    )
                })?;
                Ok((account, lookup_key))
            });

        let (account, lookup_key) = match created {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(provider = %kind, error = %e, "account creation failed");
                let message = e.to_string();
                self.session.write().await.enter_error(message.clone());
                self.publish_state(LifecycleState::Error(message));
                return Err(e);
            }
        };

        self.persist_active(kind, &account, &lookup_key).await;
        let account_id = self.record_new(kind, &account).await;
        tracing::info!(provider = %kind, address = %account.address, "account created");
        self.enter_ready(kind, provider, account, lookup_key, account_id)
            .await;
        Ok(())
    }

    async fn enter_ready(
        &self,
        kind: ProviderKind,
        provider: Arc<dyn Provider>,
        account: Account,
        lookup_key: String,
        account_id: Option<String>,
    ) {
        self.session
            .write()
            .await
            .enter_ready(kind, account, lookup_key.clone(), account_id);
        self.poller.start(
            provider,
            lookup_key,
            Arc::clone(&self.session),
            self.events.clone(),
        );
        self.publish_state(LifecycleState::Ready);
    }

    async fn persist_active(&self, kind: ProviderKind, account: &Account, lookup_key: &str) {
        let stored = StoredAccount {
            account: account.clone(),
            lookup_key: lookup_key.to_string(),
        };
        if let Err(e) = self.store.save(kind, &stored).await {
            tracing::warn!(provider = %kind, error = %e, "failed to persist account");
        }
    }

    /// Append a new account to the known-accounts list.
    async fn record_new(&self, kind: ProviderKind, account: &Account) -> Option<String> {
        let id = format!("{}-{}", Utc::now().timestamp_millis(), random_string(6));
        let result = async {
            let mut records = self.store.load_all().await?;
            records.push(AccountRecord::new(id.clone(), kind, account));
            self.store.save_all(&records).await
        }
        .await;
        match result {
            Ok(()) => Some(id),
            Err(e) => {
                tracing::warn!(provider = %kind, error = %e, "failed to record account");
                None
            }
        }
    }

    async fn record_id(&self, kind: ProviderKind, account: &Account) -> Option<String> {
        let records = self.store.load_all().await.ok()?;
        records
            .into_iter()
            .find(|r| r.provider == kind && r.address == account.address)
            .map(|r| r.id)
    }

    fn stop_polling(&self) {
        self.poller.stop();
    }

    fn publish_state(&self, state: LifecycleState) {
        let _ = self.events.send(InboxEvent::StateChanged(state));
    }
}

fn is_restorable(stored: &StoredAccount) -> bool {
    stored.account.is_well_formed() && !stored.lookup_key.trim().is_empty()
}
