//! # Temp Mail Client
//! One asynchronous interface over several disposable email services (Mail.tm, 1secmail, GuerrillaMail and Mailsac). Each service is wrapped in an adapter implementing [`Provider`], and [`AccountManager`] keeps one inbox alive on top of them: it creates or restores the account, polls for mail, and caches what it has fetched.
//!
//! ## Audience and uses
//! For Rust developers who need throwaway addresses in integration tests, sign-up automation or a temp-mail front end: pick a [`ProviderKind`], let [`AccountManager`] obtain an address, read messages from its cache, and burn the inbox when done. One-time codes and confirmation links are pulled out of each message ([`extract_otp`], [`extract_action_link`]).
//!
//! ## Providers differ
//! The upstreams key their inboxes differently: a bearer token, a session id or the address itself. [`LookupKeyKind`] names the difference instead of hiding it, and [`DeleteSupport`] says whether a delete reaches the upstream. Some upstreams cannot report sender and subject when a single message is fetched; see [`MessageDetail::metadata_complete`].
//!
//! ## Runtime requirements
//! Async-only; run inside a Tokio (v1) runtime. The poller spawns tasks, so the runtime must be able to drive them while your code awaits.
//!
//! ## Out of scope
//! Not a mail protocol implementation (no SMTP or IMAP) and not durable storage. Inboxes inherit the availability, spam filtering and retention limits of the services behind them.
//!
//! ## Errors
//! Adapters report [`Error::AccountCreation`] and [`Error::Fetch`], each naming the provider and carrying the transport cause ([`Error::Request`], [`Error::Status`], [`Error::ResponseParse`] or [`Error::Json`]). Optional operations a provider lacks fail with [`Error::Unsupported`]. Failed background polls are logged with `tracing` and published as [`InboxEvent::PollFailed`], never returned. The crate-wide [`Result`] alias wraps these errors.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use tempmail_client::{AccountManager, MemoryStore, ProviderKind, ProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tempmail_client::Error> {
//!     let manager = AccountManager::new(ProviderRegistry::with_defaults()?, Arc::new(MemoryStore::new()));
//!     manager.initialize(ProviderKind::MailTm).await?;
//!     println!("Inbox: {}", manager.address().await);
//!
//!     manager.refresh().await?;
//!     for msg in manager.messages().await {
//!         println!("From: {}, Subject: {}", msg.summary.from.display_name(), msg.summary.subject);
//!         if let Some(code) = &msg.otp {
//!             println!("  code: {code}");
//!         }
//!     }
//!
//!     manager.burn(ProviderKind::MailTm).await?;
//!     Ok(())
//! }
//! ```

mod cache;
mod error;
mod extract;
mod http;
mod lifecycle;
mod models;
mod poller;
pub mod provider;
mod registry;
mod retry;
mod session;
mod store;

pub use cache::{Body, CachedMessage, MessageCache};
pub use error::Error;
pub use extract::{ActionLink, extract_action_link, extract_otp};
pub use http::HttpOptions;
pub use lifecycle::AccountManager;
pub use models::{Account, Attachment, MessageDetail, MessageSource, MessageSummary, MessageTag, Sender};
pub use poller::{PollSettings, Poller, poll_once};
pub use provider::{
    DeleteSupport, Guerrilla, LookupKeyKind, MailTm, Mailsac, OneSecMail, Provider, ProviderKind,
};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use session::{INITIALIZING_ADDRESS, InboxEvent, LifecycleState, Session, SharedSession};
pub use store::{AccountRecord, AccountStore, JsonFileStore, MemoryStore, StoredAccount};

/// Result type alias for crate operations.
///
/// This is equivalent to `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
