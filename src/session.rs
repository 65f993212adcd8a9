//! The state of the active inbox, shared between the manager and the poller.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cache::MessageCache;
use crate::provider::ProviderKind;
use crate::{Account, MessageSummary};

/// Shown as the address while an account is being created.
pub const INITIALIZING_ADDRESS: &str = "Initializing...";

/// Error text shown in place of an address is cut to this many characters.
const ERROR_DISPLAY_CHARS: usize = 20;

/// Where the active inbox is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Creating,
    Ready,
    /// Account creation failed; holds the error message.
    Error(String),
}

/// Notifications published by the account manager and its poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxEvent {
    /// A poll found messages that were not cached before.
    NewMail {
        provider: ProviderKind,
        count: usize,
    },
    /// A poll tick failed. The next tick still runs.
    PollFailed {
        provider: ProviderKind,
        error: String,
    },
    StateChanged(LifecycleState),
}

/// Context of the active inbox.
///
/// The provider, account and lookup key change together, and every change
/// starts from an empty cache.
#[derive(Debug)]
pub struct Session {
    provider: ProviderKind,
    state: LifecycleState,
    account: Option<Account>,
    account_id: Option<String>,
    lookup_key: Option<String>,
    cache: MessageCache,
    selected: Option<String>,
    previous_message_count: Option<usize>,
    // Deleted locally on providers without upstream delete.
    hidden: HashSet<String>,
}

pub type SharedSession = Arc<RwLock<Session>>;

impl Session {
    /// An uninitialized session on `provider`.
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            state: LifecycleState::Uninitialized,
            account: None,
            account_id: None,
            lookup_key: None,
            cache: MessageCache::new(),
            selected: None,
            previous_message_count: None,
            hidden: HashSet::new(),
        }
    }

    /// [`Session::new`] behind the lock the manager and poller share.
    pub fn shared(provider: ProviderKind) -> SharedSession {
        Arc::new(RwLock::new(Self::new(provider)))
    }

    /// The selected provider. Set even before an account exists.
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// The active account, only while [`LifecycleState::Ready`].
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Id of the account in the known-accounts list, if it was recorded there.
    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Key the provider's message calls take for the active account.
    pub fn lookup_key(&self) -> Option<&str> {
        self.lookup_key.as_deref()
    }

    /// Messages of the active account.
    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    /// Id of the message last opened.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    /// What to show as the inbox address.
    ///
    /// The address when ready, a placeholder while creating, and the first
    /// twenty characters of the error after a failed creation.
    pub fn display_address(&self) -> String {
        match (&self.state, &self.account) {
            (LifecycleState::Ready, Some(account)) => account.address.clone(),
            (LifecycleState::Error(message), _) => {
                message.chars().take(ERROR_DISPLAY_CHARS).collect()
            }
            _ => INITIALIZING_ADDRESS.to_string(),
        }
    }

    /// Leave the current inbox without choosing the next one yet.
    pub(crate) fn detach(&mut self, provider: ProviderKind) {
        self.provider = provider;
        self.state = LifecycleState::Uninitialized;
        self.account = None;
        self.account_id = None;
        self.lookup_key = None;
        self.reset_inbox();
    }

    /// Drop the account and key and enter `Creating` on `provider`.
    pub(crate) fn begin_creating(&mut self, provider: ProviderKind) {
        self.provider = provider;
        self.state = LifecycleState::Creating;
        self.account = None;
        self.account_id = None;
        self.lookup_key = None;
        self.reset_inbox();
    }

    pub(crate) fn enter_ready(
        &mut self,
        provider: ProviderKind,
        account: Account,
        lookup_key: String,
        account_id: Option<String>,
    ) {
        self.provider = provider;
        self.state = LifecycleState::Ready;
        self.account = Some(account);
        self.account_id = account_id;
        self.lookup_key = Some(lookup_key);
        self.reset_inbox();
    }

    pub(crate) fn enter_error(&mut self, message: String) {
        self.state = LifecycleState::Error(message);
        self.account = None;
        self.account_id = None;
        self.lookup_key = None;
        self.reset_inbox();
    }

    fn reset_inbox(&mut self) {
        self.cache.clear();
        self.selected = None;
        self.previous_message_count = None;
        self.hidden.clear();
    }

    /// Whether a response for `lookup_key` still belongs to this session.
    pub(crate) fn is_current(&self, lookup_key: &str) -> bool {
        self.is_ready() && self.lookup_key.as_deref() == Some(lookup_key)
    }

    /// Merge a poll result fetched with `lookup_key`.
    ///
    /// Returns `None` when the key is stale and nothing was merged. Otherwise
    /// returns how many messages arrived since the previous poll; the first
    /// poll after entering `Ready` only records a baseline and reports zero.
    pub(crate) fn apply_poll(
        &mut self,
        lookup_key: &str,
        summaries: Vec<MessageSummary>,
    ) -> Option<usize> {
        if !self.is_current(lookup_key) {
            return None;
        }
        let visible: Vec<_> = summaries
            .into_iter()
            .filter(|s| !self.hidden.contains(&s.id))
            .collect();
        self.cache.merge_summaries(visible);

        let count = self.cache.len();
        let arrived = match self.previous_message_count {
            Some(previous) => count.saturating_sub(previous),
            None => 0,
        };
        self.previous_message_count = Some(count);
        Some(arrived)
    }

    pub(crate) fn cache_mut(&mut self) -> &mut MessageCache {
        &mut self.cache
    }

    pub(crate) fn select(&mut self, id: Option<String>) {
        self.selected = id;
    }

    /// Drop a message from the cache. With `hide`, later polls will not bring
    /// it back.
    pub(crate) fn forget_message(&mut self, id: &str, hide: bool) -> bool {
        let removed = self.cache.remove(id).is_some();
        if hide {
            self.hidden.insert(id.to_string());
        }
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        if self.previous_message_count.is_some() {
            self.previous_message_count = Some(self.cache.len());
        }
        removed
    }
}
