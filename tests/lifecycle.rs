use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use pretty_assertions::assert_eq;
use tempmail_client::{
    Account, AccountManager, AccountRecord, AccountStore, DeleteSupport, Error, InboxEvent,
    LifecycleState, MemoryStore, MessageDetail, MessageSummary, PollSettings, Poller, Provider,
    ProviderKind, ProviderRegistry, Result, Sender, Session, StoredAccount, poll_once,
};
use tokio::sync::broadcast;

/// In-process provider. Inboxes are keyed by lookup key.
#[derive(Debug)]
struct FakeProvider {
    kind: ProviderKind,
    inboxes: Mutex<HashMap<String, Vec<MessageSummary>>>,
    created: AtomicUsize,
    listed: AtomicUsize,
    details: AtomicUsize,
    marked: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    /// Number of upcoming `get_messages` calls that fail.
    failing_polls: AtomicUsize,
    /// Echo detail ids in another form, as some upstreams do for numeric ids.
    pad_detail_ids: AtomicBool,
}

impl FakeProvider {
    fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            inboxes: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            listed: AtomicUsize::new(0),
            details: AtomicUsize::new(0),
            marked: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            failing_polls: AtomicUsize::new(0),
            pad_detail_ids: AtomicBool::new(false),
        })
    }

    fn deliver(&self, lookup_key: &str, id: &str, subject: &str) {
        let summary = MessageSummary {
            id: id.into(),
            from: Sender::new("noreply@service.test", None),
            subject: subject.into(),
            intro: subject.into(),
            seen: false,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            has_attachments: Some(false),
            download_url: None,
            tag: None,
        };
        self.inboxes
            .lock()
            .unwrap()
            .entry(lookup_key.to_string())
            .or_default()
            .push(summary);
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn listed(&self) -> usize {
        self.listed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_account(&self, username: Option<&str>, domain: Option<&str>) -> Result<Account> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::AccountCreation {
                provider: self.name(),
                source: Box::new(Error::Status {
                    status: 429,
                    body: "Too Many Requests".into(),
                }),
            });
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let user = username.map_or_else(|| format!("user{n}"), str::to_string);
        let domain = domain.unwrap_or("fake.test");
        let address = format!("{user}@{domain}");
        let token = match self.kind.lookup_key_kind() {
            tempmail_client::LookupKeyKind::Address => address.clone(),
            _ => format!("{}-key-{n}", self.kind.name()),
        };
        Ok(Account::new(address).with_token(token))
    }

    async fn get_messages(&self, lookup_key: &str) -> Result<Vec<MessageSummary>> {
        self.listed.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Fetch {
                provider: self.name(),
                source: Box::new(Error::Status {
                    status: 503,
                    body: "Service Unavailable".into(),
                }),
            });
        }
        Ok(self
            .inboxes
            .lock()
            .unwrap()
            .get(lookup_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_message(&self, lookup_key: &str, message_id: &str) -> Result<MessageDetail> {
        self.details.fetch_add(1, Ordering::SeqCst);
        let mut summary = self
            .inboxes
            .lock()
            .unwrap()
            .get(lookup_key)
            .and_then(|msgs| msgs.iter().find(|m| m.id == message_id).cloned())
            .ok_or_else(|| Error::Fetch {
                provider: self.name(),
                source: Box::new(Error::Status {
                    status: 404,
                    body: "not found".into(),
                }),
            })?;
        if self.pad_detail_ids.load(Ordering::SeqCst) {
            summary.id = format!("00{}", summary.id);
        }
        Ok(MessageDetail {
            summary,
            text: "Your verification code is 884422".into(),
            html: Some(vec![
                r#"<a href="https://svc.test/verify?t=1&amp;u=2">Verify email</a>"#.into(),
            ]),
            attachments: Some(Vec::new()),
            metadata_complete: true,
        })
    }

    async fn get_domains(&self) -> Result<Vec<String>> {
        Ok(vec!["fake.test".into()])
    }

    fn delete_support(&self) -> DeleteSupport {
        match self.kind {
            ProviderKind::MailTm | ProviderKind::Guerrilla => DeleteSupport::Upstream,
            _ => DeleteSupport::ClientCacheOnly,
        }
    }

    async fn delete_message(&self, lookup_key: &str, message_id: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(message_id.to_string());
        if let Some(msgs) = self.inboxes.lock().unwrap().get_mut(lookup_key) {
            msgs.retain(|m| m.id != message_id);
        }
        Ok(())
    }

    async fn mark_as_read(&self, _lookup_key: &str, message_id: &str) -> Result<()> {
        if self.kind != ProviderKind::MailTm {
            return Err(Error::Unsupported {
                provider: self.name(),
                operation: "mark_as_read",
            });
        }
        self.marked.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

/// Store whose active-account records cannot be decoded.
#[derive(Debug, Default)]
struct CorruptStore {
    inner: MemoryStore,
}

#[async_trait]
impl AccountStore for CorruptStore {
    async fn load(&self, _kind: ProviderKind) -> Result<Option<StoredAccount>> {
        let err = serde_json::from_str::<serde_json::Value>("{\"account\":").unwrap_err();
        Err(Error::Json(err))
    }

    async fn save(&self, kind: ProviderKind, stored: &StoredAccount) -> Result<()> {
        self.inner.save(kind, stored).await
    }

    async fn remove(&self, kind: ProviderKind) -> Result<()> {
        self.inner.remove(kind).await
    }

    async fn load_all(&self) -> Result<Vec<AccountRecord>> {
        self.inner.load_all().await
    }

    async fn save_all(&self, records: &[AccountRecord]) -> Result<()> {
        self.inner.save_all(records).await
    }
}

// Long interval: only the immediate first tick runs during a test.
fn slow_polling() -> PollSettings {
    PollSettings {
        interval: Duration::from_secs(3600),
    }
}

fn manager_with(providers: &[Arc<FakeProvider>], store: Arc<dyn AccountStore>) -> AccountManager {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider.clone());
    }
    AccountManager::new(registry, store).with_poll_settings(slow_polling())
}

async fn key_of(manager: &AccountManager) -> String {
    manager
        .session()
        .read()
        .await
        .lookup_key()
        .map(str::to_string)
        .unwrap()
}

#[tokio::test]
async fn initialize_creates_then_restores_without_network() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let store: Arc<dyn AccountStore> = Arc::new(MemoryStore::new());

    let first = manager_with(&[provider.clone()], store.clone());
    first.initialize(ProviderKind::MailTm).await.unwrap();
    assert_eq!(first.state().await, LifecycleState::Ready);
    let address = first.address().await;
    assert!(address.ends_with("@fake.test"));
    first.shutdown();

    let second = manager_with(&[provider.clone()], store.clone());
    second.initialize(ProviderKind::MailTm).await.unwrap();
    assert_eq!(second.address().await, address);
    assert_eq!(provider.created(), 1);

    let records = second.accounts().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].address, address);
    assert_eq!(
        second.session().read().await.account_id(),
        Some(records[0].id.as_str())
    );
}

#[tokio::test]
async fn corrupt_persisted_account_creates_fresh() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let manager = manager_with(&[provider.clone()], Arc::new(CorruptStore::default()));

    manager.initialize(ProviderKind::MailTm).await.unwrap();

    assert_eq!(manager.state().await, LifecycleState::Ready);
    assert_eq!(provider.created(), 1);
}

#[tokio::test]
async fn incomplete_persisted_account_creates_fresh() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            ProviderKind::MailTm,
            &StoredAccount {
                account: Account::new("broken"),
                lookup_key: String::new(),
            },
        )
        .await
        .unwrap();

    let manager = manager_with(&[provider.clone()], store);
    manager.initialize(ProviderKind::MailTm).await.unwrap();
    assert_eq!(provider.created(), 1);
    assert!(manager.account().await.unwrap().is_well_formed());
}

#[tokio::test]
async fn failed_creation_enters_error_state() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    provider.fail_create.store(true, Ordering::SeqCst);
    let manager = manager_with(&[provider], Arc::new(MemoryStore::new()));
    let mut events = manager.subscribe();

    let err = manager.initialize(ProviderKind::MailTm).await.unwrap_err();

    assert!(matches!(err, Error::AccountCreation { .. }));
    assert!(matches!(manager.state().await, LifecycleState::Error(_)));
    assert_eq!(manager.address().await, "Mail.tm: account cre");
    assert!(matches!(manager.refresh().await, Err(Error::NotReady)));

    assert_eq!(
        events.recv().await.unwrap(),
        InboxEvent::StateChanged(LifecycleState::Creating)
    );
    assert!(matches!(
        events.recv().await.unwrap(),
        InboxEvent::StateChanged(LifecycleState::Error(_))
    ));
}

#[tokio::test]
async fn switching_provider_isolates_messages() {
    let mail_tm = FakeProvider::new(ProviderKind::MailTm);
    let guerrilla = FakeProvider::new(ProviderKind::Guerrilla);
    let manager = manager_with(
        &[mail_tm.clone(), guerrilla.clone()],
        Arc::new(MemoryStore::new()),
    );

    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let key_a = key_of(&manager).await;
    mail_tm.deliver(&key_a, "a1", "Welcome");
    mail_tm.deliver(&key_a, "a2", "Hello again");
    manager.refresh().await.unwrap();
    assert_eq!(manager.messages().await.len(), 2);

    manager.switch_provider(ProviderKind::Guerrilla).await.unwrap();
    assert_eq!(manager.provider_kind().await, ProviderKind::Guerrilla);
    assert!(manager.messages().await.is_empty());

    let key_b = key_of(&manager).await;
    assert_ne!(key_a, key_b);
    guerrilla.deliver(&key_b, "b1", "Other inbox");
    manager.refresh().await.unwrap();
    let ids: Vec<String> = manager
        .messages()
        .await
        .into_iter()
        .map(|m| m.summary.id)
        .collect();
    assert_eq!(ids, vec!["b1".to_string()]);

    // Switching back restores the first account without creating another.
    manager.switch_provider(ProviderKind::MailTm).await.unwrap();
    assert_eq!(key_of(&manager).await, key_a);
    assert_eq!(mail_tm.created(), 1);
}

#[tokio::test]
async fn stale_poll_result_is_discarded() {
    let mail_tm = FakeProvider::new(ProviderKind::MailTm);
    let guerrilla = FakeProvider::new(ProviderKind::Guerrilla);
    let manager = manager_with(
        &[mail_tm.clone(), guerrilla.clone()],
        Arc::new(MemoryStore::new()),
    );
    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let old_key = key_of(&manager).await;
    mail_tm.deliver(&old_key, "late", "Arrives after the switch");

    manager.switch_provider(ProviderKind::Guerrilla).await.unwrap();

    let (events, _rx) = broadcast::channel(8);
    let arrived = poll_once(mail_tm.as_ref(), &old_key, &manager.session(), &events)
        .await
        .unwrap();
    assert_eq!(arrived, 0);
    assert!(manager.messages().await.is_empty());
}

#[tokio::test]
async fn burn_replaces_account_and_clears_cache() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(&[provider.clone()], store.clone());

    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let before = manager.address().await;
    let key = key_of(&manager).await;
    provider.deliver(&key, "m1", "Old mail");
    manager.refresh().await.unwrap();
    assert_eq!(manager.messages().await.len(), 1);

    manager.burn(ProviderKind::MailTm).await.unwrap();

    let after = manager.address().await;
    assert_ne!(before, after);
    assert!(manager.messages().await.is_empty());
    assert_eq!(provider.created(), 2);
    let stored = store.load(ProviderKind::MailTm).await.unwrap().unwrap();
    assert_eq!(stored.account.address, after);
    assert_eq!(manager.accounts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn create_custom_uses_requested_address() {
    let provider = FakeProvider::new(ProviderKind::Mailsac);
    let manager = manager_with(&[provider], Arc::new(MemoryStore::new()));
    manager.initialize(ProviderKind::Mailsac).await.unwrap();

    manager.create_custom("alice", "fake.test").await.unwrap();

    assert_eq!(manager.address().await, "alice@fake.test");
    assert_eq!(key_of(&manager).await, "alice@fake.test");
}

#[tokio::test]
async fn open_message_fetches_detail_once_and_marks_read() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let manager = manager_with(&[provider.clone()], Arc::new(MemoryStore::new()));
    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let key = key_of(&manager).await;
    provider.deliver(&key, "m1", "Welcome");
    manager.refresh().await.unwrap();

    let opened = manager.open_message("m1").await.unwrap();
    assert_eq!(opened.body.as_loaded(), Some("Your verification code is 884422"));
    assert_eq!(opened.otp.as_deref(), Some("884422"));
    let link = opened.action_link.clone().unwrap();
    assert_eq!(link.url, "https://svc.test/verify?t=1&u=2");
    assert!(opened.summary.seen);
    assert_eq!(manager.selected().await.map(|m| m.summary.id), Some("m1".into()));

    // A later poll keeps the loaded body; a second open does not refetch.
    manager.refresh().await.unwrap();
    let reopened = manager.open_message("m1").await.unwrap();
    assert!(reopened.body.is_loaded());
    assert_eq!(provider.details.load(Ordering::SeqCst), 1);
    assert_eq!(provider.marked.lock().unwrap().as_slice(), ["m1".to_string()]);

    assert!(matches!(
        manager.open_message("nope").await,
        Err(Error::UnknownMessage(_))
    ));
}

#[tokio::test]
async fn unsupported_mark_read_is_tracked_locally() {
    let provider = FakeProvider::new(ProviderKind::OneSecMail);
    let manager = manager_with(&[provider.clone()], Arc::new(MemoryStore::new()));
    manager.initialize(ProviderKind::OneSecMail).await.unwrap();
    let key = key_of(&manager).await;
    provider.deliver(&key, "m1", "Hello");
    manager.refresh().await.unwrap();

    let opened = manager.open_message("m1").await.unwrap();
    assert!(opened.summary.seen);
    assert!(provider.marked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn delete_follows_provider_support() {
    let upstream = FakeProvider::new(ProviderKind::MailTm);
    let cache_only = FakeProvider::new(ProviderKind::Mailsac);
    let manager = manager_with(
        &[upstream.clone(), cache_only.clone()],
        Arc::new(MemoryStore::new()),
    );

    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let key = key_of(&manager).await;
    upstream.deliver(&key, "m1", "Delete me");
    manager.refresh().await.unwrap();
    manager.delete_message("m1").await.unwrap();
    assert_eq!(upstream.deleted.lock().unwrap().as_slice(), ["m1".to_string()]);
    assert!(manager.messages().await.is_empty());

    manager.switch_provider(ProviderKind::Mailsac).await.unwrap();
    let key = key_of(&manager).await;
    cache_only.deliver(&key, "p1", "Public mail");
    manager.refresh().await.unwrap();
    manager.delete_message("p1").await.unwrap();
    assert!(cache_only.deleted.lock().unwrap().is_empty());

    // Still upstream, but hidden from this inbox.
    manager.refresh().await.unwrap();
    assert!(manager.messages().await.is_empty());
}

#[tokio::test]
async fn message_source_unsupported_is_reported() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let manager = manager_with(&[provider], Arc::new(MemoryStore::new()));
    manager.initialize(ProviderKind::MailTm).await.unwrap();

    let err = manager.message_source("m1").await.unwrap_err();
    assert!(err.is_unsupported());
}

#[tokio::test]
async fn switch_and_remove_recorded_accounts() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let manager = manager_with(&[provider.clone()], Arc::new(MemoryStore::new()));

    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let first = manager.address().await;
    manager.burn(ProviderKind::MailTm).await.unwrap();
    let second = manager.address().await;

    let records = manager.accounts().await.unwrap();
    let first_id = records.iter().find(|r| r.address == first).unwrap().id.clone();
    let second_id = records.iter().find(|r| r.address == second).unwrap().id.clone();

    manager.switch_account(&first_id).await.unwrap();
    assert_eq!(manager.address().await, first);
    assert_eq!(provider.created(), 2);

    // Removing an inactive account leaves the session alone.
    manager.remove_account(&second_id).await.unwrap();
    assert_eq!(manager.address().await, first);

    // Removing the active one replaces it.
    manager.remove_account(&first_id).await.unwrap();
    assert_eq!(provider.created(), 3);
    assert_ne!(manager.address().await, first);
    assert!(matches!(
        manager.switch_account(&first_id).await,
        Err(Error::UnknownAccount(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn poller_signals_new_mail_after_baseline() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let manager = AccountManager::new(registry, Arc::new(MemoryStore::new())).with_poll_settings(
        PollSettings {
            interval: Duration::from_secs(5),
        },
    );
    let mut events = manager.subscribe();

    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let key = key_of(&manager).await;
    provider.deliver(&key, "m1", "Already there");

    // The first tick only records a baseline.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.messages().await.len(), 1);

    provider.deliver(&key, "m2", "Your code is 551100");
    tokio::time::sleep(Duration::from_secs(5)).await;

    let mut new_mail = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let InboxEvent::NewMail { count, .. } = event {
            new_mail.push(count);
        }
    }
    assert_eq!(new_mail, vec![1]);
    assert!(provider.listed() >= 2);

    let cached = manager.messages().await;
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().any(|m| m.otp.as_deref() == Some("551100")));

    manager.shutdown();
}

#[tokio::test]
async fn detail_with_other_id_form_lands_in_listed_entry() {
    let provider = FakeProvider::new(ProviderKind::Guerrilla);
    provider.pad_detail_ids.store(true, Ordering::SeqCst);
    let manager = manager_with(&[provider.clone()], Arc::new(MemoryStore::new()));
    manager.initialize(ProviderKind::Guerrilla).await.unwrap();
    let key = key_of(&manager).await;
    provider.deliver(&key, "42", "Your code is 771203");
    manager.refresh().await.unwrap();

    let opened = manager.open_message("42").await.unwrap();
    assert_eq!(opened.summary.id, "42");
    assert!(opened.body.is_loaded());

    manager.open_message("42").await.unwrap();
    assert_eq!(provider.details.load(Ordering::SeqCst), 1);
    assert_eq!(manager.messages().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_tick_does_not_stop_polling() {
    let provider = FakeProvider::new(ProviderKind::MailTm);
    provider.failing_polls.store(1, Ordering::SeqCst);
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let manager = AccountManager::new(registry, Arc::new(MemoryStore::new())).with_poll_settings(
        PollSettings {
            interval: Duration::from_secs(5),
        },
    );
    let mut events = manager.subscribe();

    manager.initialize(ProviderKind::MailTm).await.unwrap();
    let key = key_of(&manager).await;
    provider.deliver(&key, "m1", "Hello");

    // Ticks at 0 s (fails), 5 s and 10 s.
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(provider.listed(), 3);
    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if let InboxEvent::PollFailed { provider, error } = event {
            assert_eq!(provider, ProviderKind::MailTm);
            assert!(error.contains("503"));
            failures += 1;
        }
    }
    assert_eq!(failures, 1);
    assert_eq!(manager.state().await, LifecycleState::Ready);
    assert_eq!(manager.messages().await.len(), 1);

    manager.shutdown();
}

#[tokio::test(start_paused = true)]
async fn restarting_poller_replaces_previous_loop() {
    let provider = FakeProvider::new(ProviderKind::Mailsac);
    let session = Session::shared(ProviderKind::Mailsac);
    let (events, _rx) = broadcast::channel(16);
    let poller = Poller::new(PollSettings {
        interval: Duration::from_secs(5),
    });

    poller.start(provider.clone(), "a@fake.test".into(), session.clone(), events.clone());
    poller.start(provider.clone(), "a@fake.test".into(), session.clone(), events.clone());
    assert!(poller.is_running());

    // One loop ticks at 0 s, 5 s and 10 s. Two loops would double that.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(provider.listed(), 3);

    poller.stop();
    assert!(!poller.is_running());
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(provider.listed(), 3);
}
