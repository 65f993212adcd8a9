//! Normalized data types shared by all providers.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mailbox identity on one provider.
///
/// `token` is provider-specific: a bearer credential (Mail.tm), a session id
/// (GuerrillaMail), a copy of `address` (Mailsac) or absent (1secmail). Use
/// [`LookupKeyKind::resolve`](crate::LookupKeyKind::resolve) to derive the key
/// the provider's message calls expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Full address, `user@domain`.
    pub address: String,
    /// Provider-specific credential or session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Account {
    /// An account identified by its address alone.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
        }
    }

    /// Attach a provider token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The part before `@`, if the address is well formed.
    pub fn local_part(&self) -> Option<&str> {
        split_address(&self.address).map(|(local, _)| local)
    }

    /// The part after `@`, if the address is well formed.
    pub fn domain(&self) -> Option<&str> {
        split_address(&self.address).map(|(_, domain)| domain)
    }

    /// Exactly one `@` with a non-empty local part and domain.
    pub fn is_well_formed(&self) -> bool {
        split_address(&self.address).is_some()
    }
}

/// Split `user@domain` into its halves. `None` unless there is exactly one
/// `@` and both halves are non-empty.
pub(crate) fn split_address(address: &str) -> Option<(&str, &str)> {
    let (local, domain) = address.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some((local, domain))
}

/// Message sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Sender address as reported by the upstream.
    pub address: String,
    /// Display name, when the upstream reports one separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Sender {
    /// Build a sender, treating a blank name as absent.
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    /// Parse a raw header value such as `Alice <alice@example.com>` or a bare address.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match (raw.find('<'), raw.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = raw[..open].trim().trim_matches('"').trim();
                let address = raw[open + 1..close].trim();
                Self::new(address, Some(name.to_string()))
            }
            _ => Self::new(raw, None),
        }
    }

    /// Display name, falling back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Inbox category hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTag {
    Spam,
    Updates,
}

/// A message as it appears in the inbox listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    /// Opaque id, unique within one (provider, account) pair.
    pub id: String,
    pub from: Sender,
    pub subject: String,
    /// Short preview of the body. Some upstreams only offer the subject here.
    pub intro: String,
    pub seen: bool,
    /// Serialized as ISO-8601.
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_attachments: Option<bool>,
    /// Where the full message (EML) can be downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<MessageTag>,
}

/// A fully fetched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetail {
    #[serde(flatten)]
    pub summary: MessageSummary,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// `false` when the upstream's detail call cannot report sender, subject
    /// or date; those summary fields are then empty placeholders and should
    /// not replace list-time values.
    pub metadata_complete: bool,
}

/// A message attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub filename: String,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Attachment {
    /// Size rendered as kilobytes with one decimal, e.g. `"12.3 KB"`.
    pub fn size_label(&self) -> Option<String> {
        self.size.map(|bytes| format!("{:.1} KB", bytes as f64 / 1024.0))
    }
}

/// Raw transport-level content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSource {
    pub id: String,
    /// The RFC 5322 source.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// Convert epoch seconds to a UTC timestamp.
pub(crate) fn from_epoch_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Parse the timestamp formats the upstreams use: RFC 3339, `YYYY-MM-DD HH:MM:SS`
/// (taken as UTC) and epoch seconds.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    raw.parse::<i64>().ok().and_then(from_epoch_secs)
}
