//! The provider contract and its four adapters.
//!
//! Every disposable-mail service is wrapped in a type implementing
//! [`Provider`]. The adapters differ in how a mailbox is addressed once it
//! exists, and that difference is part of the contract rather than hidden
//! behind it:
//!
//! | adapter | [`LookupKeyKind`] | key passed to message calls |
//! |---|---|---|
//! | [`MailTm`] | `BearerToken` | JWT from `/token` |
//! | [`OneSecMail`] | `Address` | the address |
//! | [`Guerrilla`] | `SessionId` | `sid_token` |
//! | [`Mailsac`] | `Address` | the address |
//!
//! Use [`LookupKeyKind::resolve`] to derive the key from an [`Account`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::{Account, Error, MessageDetail, MessageSource, MessageSummary, Result};

mod guerrilla;
mod mail_tm;
mod mailsac;
mod one_sec_mail;

pub use guerrilla::Guerrilla;
pub use mail_tm::MailTm;
pub use mailsac::Mailsac;
pub use one_sec_mail::OneSecMail;

/// Identifies one of the supported services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    MailTm,
    OneSecMail,
    Guerrilla,
    Mailsac,
}

impl ProviderKind {
    /// All kinds, in registry order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::MailTm,
        ProviderKind::OneSecMail,
        ProviderKind::Guerrilla,
        ProviderKind::Mailsac,
    ];

    /// Human-readable name, also used as the persistence key.
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::MailTm => "Mail.tm",
            ProviderKind::OneSecMail => "1secmail",
            ProviderKind::Guerrilla => "Guerrilla",
            ProviderKind::Mailsac => "Mailsac",
        }
    }

    /// What [`Provider::get_messages`] expects as its key for this provider.
    pub fn lookup_key_kind(self) -> LookupKeyKind {
        match self {
            ProviderKind::MailTm => LookupKeyKind::BearerToken,
            ProviderKind::OneSecMail | ProviderKind::Mailsac => LookupKeyKind::Address,
            ProviderKind::Guerrilla => LookupKeyKind::SessionId,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| {
                kind.name().eq_ignore_ascii_case(s)
                    || serde_json::to_value(kind)
                        .ok()
                        .and_then(|v| v.as_str().map(|tag| tag.eq_ignore_ascii_case(s)))
                        .unwrap_or(false)
            })
            .ok_or_else(|| Error::UnknownProvider(s.to_string()))
    }
}

/// The meaning of the lookup key a provider's message calls take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKeyKind {
    /// A bearer credential issued at login.
    BearerToken,
    /// A server-side session id.
    SessionId,
    /// The mailbox address itself.
    Address,
}

impl LookupKeyKind {
    /// Derive the lookup key from an account created by the same provider.
    ///
    /// Returns `None` when a token-keyed account carries no token.
    pub fn resolve(self, account: &Account) -> Option<String> {
        match self {
            LookupKeyKind::BearerToken | LookupKeyKind::SessionId => {
                account.token.clone().filter(|t| !t.is_empty())
            }
            LookupKeyKind::Address => Some(account.address.clone()),
        }
    }
}

/// Whether deleting a message reaches the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSupport {
    /// [`Provider::delete_message`] removes the message upstream.
    Upstream,
    /// The upstream has no delete call; deletion only drops the cached copy.
    ClientCacheOnly,
}

/// One disposable-mail upstream, normalized.
///
/// Adapters are stateless apart from their HTTP client and are meant to live
/// for the whole process behind an `Arc<dyn Provider>`. An [`Account`] from one
/// provider must never be passed to another provider's methods.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Display name of the provider.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Create a mailbox.
    ///
    /// With both `username` and `domain`, the address is `username@domain`.
    /// With neither, a random local part is generated and the domain comes
    /// from [`Provider::get_domains`] or from the upstream.
    ///
    /// # Errors
    ///
    /// [`Error::AccountCreation`] when the upstream rejects the address or is unreachable.
    async fn create_account(&self, username: Option<&str>, domain: Option<&str>)
    -> Result<Account>;

    /// List message summaries for a mailbox.
    ///
    /// `lookup_key` follows the provider's [`LookupKeyKind`]. An empty or
    /// malformed key yields an empty list rather than an error.
    ///
    /// # Errors
    ///
    /// [`Error::Fetch`] when the upstream call fails.
    async fn get_messages(&self, lookup_key: &str) -> Result<Vec<MessageSummary>>;

    /// Fetch one message in full.
    ///
    /// Check [`MessageDetail::metadata_complete`]: some upstreams cannot
    /// report sender and subject on this call.
    async fn get_message(&self, lookup_key: &str, message_id: &str) -> Result<MessageDetail>;

    /// Domains new addresses can be created on.
    async fn get_domains(&self) -> Result<Vec<String>>;

    /// Whether [`Provider::delete_message`] reaches the upstream.
    fn delete_support(&self) -> DeleteSupport {
        DeleteSupport::ClientCacheOnly
    }

    /// Delete a message upstream.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] unless [`Provider::delete_support`] is
    /// [`DeleteSupport::Upstream`].
    async fn delete_message(&self, _lookup_key: &str, _message_id: &str) -> Result<()> {
        Err(Error::unsupported(self.name(), "delete_message"))
    }

    /// Fetch the raw source of a message.
    async fn get_message_source(&self, _lookup_key: &str, _message_id: &str) -> Result<MessageSource> {
        Err(Error::unsupported(self.name(), "get_message_source"))
    }

    /// Mark a message as read upstream.
    async fn mark_as_read(&self, _lookup_key: &str, _message_id: &str) -> Result<()> {
        Err(Error::unsupported(self.name(), "mark_as_read"))
    }
}

/// Join a local part and domain, rejecting anything that is not a single
/// well-formed `user@domain`.
pub(crate) fn compose_address(username: &str, domain: &str) -> Result<String> {
    let address = format!("{}@{}", username.trim(), domain.trim());
    if crate::models::split_address(&address).is_none() {
        return Err(Error::ResponseParse(format!(
            "invalid address {address:?}"
        )));
    }
    Ok(address)
}

/// Lowercase alphanumeric string for generated local parts and passwords.
pub(crate) fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Deserializers for upstreams that send numbers as strings and vice versa.
pub(crate) mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Accept `"123"`, `123` or `null` as a string.
    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Accept `"1700000000"` or `1700000000`.
    pub fn i64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| serde::de::Error::custom("integer out of range")),
            Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
            Value::Null => Ok(0),
            other => Err(serde::de::Error::custom(format!(
                "expected integer, got {other}"
            ))),
        }
    }
}
