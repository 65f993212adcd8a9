//! Background polling of the active inbox.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::Result;
use crate::provider::Provider;
use crate::session::{InboxEvent, SharedSession};

/// Settings for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Time between ticks. The first tick fires immediately.
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Fetch the message list once and merge it into the session.
///
/// The result is merged only if `lookup_key` is still the session's key when
/// the response arrives. Returns the number of messages that arrived since
/// the previous poll, which is zero for a discarded response or the first
/// poll of an account.
///
/// # Errors
///
/// The provider's [`Error::Fetch`](crate::Error::Fetch). It is also logged and
/// published as [`InboxEvent::PollFailed`].
pub async fn poll_once(
    provider: &dyn Provider,
    lookup_key: &str,
    session: &SharedSession,
    events: &broadcast::Sender<InboxEvent>,
) -> Result<usize> {
    let kind = provider.kind();
    let summaries = match provider.get_messages(lookup_key).await {
        Ok(summaries) => summaries,
        Err(e) => {
            tracing::warn!(provider = %kind, error = %e, "poll failed");
            let _ = events.send(InboxEvent::PollFailed {
                provider: kind,
                error: e.to_string(),
            });
            return Err(e);
        }
    };

    let fetched = summaries.len();
    let merged = session.write().await.apply_poll(lookup_key, summaries);
    match merged {
        None => {
            tracing::debug!(provider = %kind, "discarding poll result for a replaced inbox");
            Ok(0)
        }
        Some(arrived) => {
            tracing::debug!(provider = %kind, fetched, arrived, "poll merged");
            if arrived > 0 {
                tracing::info!(provider = %kind, count = arrived, "new mail");
                let _ = events.send(InboxEvent::NewMail {
                    provider: kind,
                    count: arrived,
                });
            }
            Ok(arrived)
        }
    }
}

/// Owns the polling task of the active inbox.
///
/// At most one loop runs at a time: [`Poller::start`] aborts the previous
/// loop before spawning the next. Each tick runs in its own task, so a slow
/// or failed tick never delays the following one.
#[derive(Debug)]
pub struct Poller {
    settings: PollSettings,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// An idle poller. Nothing runs until [`Poller::start`].
    pub fn new(settings: PollSettings) -> Self {
        Self {
            settings,
            handle: Mutex::new(None),
        }
    }

    /// The settings every loop started by this poller uses.
    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll `provider` with `lookup_key` until stopped or restarted.
    ///
    /// The first tick fires immediately. A loop that is already running is
    /// aborted; ticks it has already spawned finish, and their results are
    /// discarded by the lookup-key check in [`poll_once`].
    pub fn start(
        &self,
        provider: Arc<dyn Provider>,
        lookup_key: String,
        session: SharedSession,
        events: broadcast::Sender<InboxEvent>,
    ) {
        let interval = self.settings.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let provider = Arc::clone(&provider);
                let lookup_key = lookup_key.clone();
                let session = Arc::clone(&session);
                let events = events.clone();
                tokio::spawn(async move {
                    // Failures are already logged and published.
                    let _ = poll_once(provider.as_ref(), &lookup_key, &session, &events).await;
                });
            }
        });

        let previous = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::debug!(?interval, "poller started");
    }

    /// Abort the running loop, if any. Calling it on an idle poller does nothing.
    pub fn stop(&self) {
        let previous = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.abort();
            tracing::debug!("poller stopped");
        }
    }

    /// Whether a loop is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(PollSettings::default())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
