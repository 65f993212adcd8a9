//! Mailsac adapter: public inboxes, no authentication.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{Provider, ProviderKind, compose_address, random_string};
use crate::http::{HttpOptions, absolute_url, read_json, read_text};
use crate::models::split_address;
use crate::{Account, Error, MessageDetail, MessageSource, MessageSummary, Result, Sender};

const API_BASE: &str = "https://mailsac.com/api";
const NAME: &str = "Mailsac";
const PUBLIC_DOMAIN: &str = "mailsac.com";

/// Adapter for Mailsac's public inboxes.
///
/// Every `@mailsac.com` address is world-readable, so creating an account
/// only composes an address. The lookup key, and the account token, is the
/// address itself.
///
/// The text endpoint used by [`Provider::get_message`] returns only the body:
/// the resulting detail has `metadata_complete = false` with empty sender and
/// subject, and its timestamp is the fetch time.
#[derive(Debug, Clone)]
pub struct Mailsac {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Party {
    #[serde(default)]
    address: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    from: Vec<Party>,
    #[serde(default)]
    subject: Option<String>,
    received: DateTime<Utc>,
    #[serde(default)]
    attachments: Option<Vec<String>>,
}

impl Mailsac {
    /// Adapter against `mailsac.com` with default [`HttpOptions`].
    pub fn new() -> Result<Self> {
        Self::with_options(HttpOptions::default())
    }

    /// Adapter against `mailsac.com` with custom transport options.
    pub fn with_options(options: HttpOptions) -> Result<Self> {
        Self::with_base_url(API_BASE, options)
    }

    /// Point the adapter at another API root, such as a forwarding proxy.
    pub fn with_base_url(base_url: impl Into<String>, options: HttpOptions) -> Result<Self> {
        Ok(Self {
            http: options.build_client(false)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        absolute_url(&self.base_url, path)
    }

    async fn list(&self, address: &str) -> Result<Vec<MessageSummary>> {
        let response = self
            .http
            .get(self.url(&format!("/addresses/{address}/messages")))
            .send()
            .await?;
        let records: Vec<Value> = read_json(response).await?;
        Ok(records
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<MessageRecord>(raw) {
                Ok(record) => Some(normalize(record)),
                Err(e) => {
                    tracing::warn!(provider = NAME, error = %e, "skipping malformed message row");
                    None
                }
            })
            .collect())
    }

    async fn text(&self, address: &str, id: &str) -> Result<String> {
        let response = self
            .http
            .get(self.url(&format!("/text/{address}/{id}")))
            .send()
            .await?;
        read_text(response).await
    }

    async fn raw(&self, address: &str, id: &str) -> Result<MessageSource> {
        let url = self.url(&format!("/raw/{address}/{id}"));
        let response = self.http.get(&url).send().await?;
        Ok(MessageSource {
            id: id.to_string(),
            data: read_text(response).await?,
            download_url: Some(url),
        })
    }
}

fn normalize(m: MessageRecord) -> MessageSummary {
    let from = m
        .from
        .into_iter()
        .next()
        .map(|p| Sender::new(p.address, p.name))
        .unwrap_or_else(|| Sender::new("", None));
    let subject = m.subject.unwrap_or_default();
    MessageSummary {
        id: m.id,
        from,
        // No preview in the listing.
        intro: subject.clone(),
        subject,
        // Public inboxes have no per-reader state.
        seen: false,
        created_at: m.received,
        has_attachments: Some(m.attachments.is_some_and(|a| !a.is_empty())),
        download_url: None,
        tag: None,
    }
}

fn require_address(lookup_key: &str) -> Result<&str> {
    split_address(lookup_key)
        .map(|_| lookup_key)
        .ok_or_else(|| Error::fetch(NAME, Error::ResponseParse(format!("not an address: {lookup_key:?}"))))
}

#[async_trait]
impl Provider for Mailsac {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mailsac
    }

    async fn create_account(
        &self,
        username: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Account> {
        let domain = domain.map_or(PUBLIC_DOMAIN, str::trim);
        if !domain.eq_ignore_ascii_case(PUBLIC_DOMAIN) {
            return Err(Error::account_creation(
                NAME,
                Error::ResponseParse(format!("unsupported domain {domain:?}")),
            ));
        }
        let local = username.map_or_else(|| random_string(8), str::to_string);
        let address = compose_address(&local, PUBLIC_DOMAIN)
            .map_err(|e| Error::account_creation(NAME, e))?;
        Ok(Account::new(address.clone()).with_token(address))
    }

    async fn get_messages(&self, lookup_key: &str) -> Result<Vec<MessageSummary>> {
        if split_address(lookup_key).is_none() {
            return Ok(Vec::new());
        }
        self.list(lookup_key)
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }

    async fn get_message(&self, lookup_key: &str, message_id: &str) -> Result<MessageDetail> {
        let address = require_address(lookup_key)?;
        let text = self
            .text(address, message_id)
            .await
            .map_err(|e| Error::fetch(NAME, e))?;

        Ok(MessageDetail {
            summary: MessageSummary {
                id: message_id.to_string(),
                from: Sender::new("", None),
                subject: String::new(),
                intro: String::new(),
                seen: false,
                created_at: Utc::now(),
                has_attachments: None,
                download_url: None,
                tag: None,
            },
            text,
            html: None,
            attachments: None,
            metadata_complete: false,
        })
    }

    async fn get_domains(&self) -> Result<Vec<String>> {
        Ok(vec![PUBLIC_DOMAIN.to_string()])
    }

    async fn get_message_source(&self, lookup_key: &str, message_id: &str) -> Result<MessageSource> {
        let address = require_address(lookup_key)?;
        self.raw(address, message_id)
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }
}
