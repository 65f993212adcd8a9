//! 1secmail adapter: instant mailboxes keyed by address.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use super::{Provider, ProviderKind, compose_address, de, random_string};
use crate::http::{HttpOptions, read_json};
use crate::models::{parse_timestamp, split_address};
use crate::{Account, Attachment, Error, MessageDetail, MessageSummary, Result, Sender};

const API_BASE: &str = "https://www.1secmail.com/api/v1/";
const NAME: &str = "1secmail";

/// Adapter for the 1secmail API.
///
/// Any `login@domain` on a 1secmail domain receives mail without
/// registration, so a requested address is returned as-is. The lookup key is
/// the address.
#[derive(Debug, Clone)]
pub struct OneSecMail {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    #[serde(deserialize_with = "de::string_or_number")]
    id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetailRecord {
    #[serde(flatten)]
    summary: MessageRecord,
    #[serde(default)]
    attachments: Vec<AttachmentRecord>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    text_body: String,
    #[serde(default)]
    html_body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentRecord {
    filename: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

impl OneSecMail {
    /// Adapter against the public 1secmail API.
    pub fn new() -> Result<Self> {
        Self::with_options(HttpOptions::default())
    }

    /// Same as [`OneSecMail::new`] with custom transport options.
    pub fn with_options(options: HttpOptions) -> Result<Self> {
        Self::with_base_url(API_BASE, options)
    }

    /// Point the adapter at another endpoint. Every call is a query on this URL.
    pub fn with_base_url(base_url: impl Into<String>, options: HttpOptions) -> Result<Self> {
        Ok(Self {
            http: options.build_client(false)?,
            base_url: base_url.into(),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T> {
        let response = self.http.get(&self.base_url).query(params).send().await?;
        read_json(response).await
    }

    async fn fetch_domains(&self) -> Result<Vec<String>> {
        self.call(&[("action", "getDomainList")]).await
    }

    async fn create(&self, username: Option<&str>, domain: Option<&str>) -> Result<Account> {
        match (username, domain) {
            (Some(username), Some(domain)) => Ok(Account::new(compose_address(username, domain)?)),
            (None, None) => {
                let generated: Vec<String> = self
                    .call(&[("action", "genRandomMailbox"), ("count", "1")])
                    .await?;
                let address = generated
                    .into_iter()
                    .next()
                    .filter(|a| split_address(a).is_some())
                    .ok_or_else(|| Error::ResponseParse("no mailbox generated".into()))?;
                Ok(Account::new(address))
            }
            (username, domain) => {
                let domain = match domain {
                    Some(domain) => domain.to_string(),
                    None => self
                        .fetch_domains()
                        .await?
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::ResponseParse("no domains available".into()))?,
                };
                let username = username.map_or_else(|| random_string(10), str::to_string);
                Ok(Account::new(compose_address(&username, &domain)?))
            }
        }
    }

    async fn list(&self, login: &str, domain: &str) -> Result<Vec<MessageSummary>> {
        let records: Vec<MessageRecord> = self
            .call(&[("action", "getMessages"), ("login", login), ("domain", domain)])
            .await?;
        records.into_iter().map(normalize).collect()
    }

    async fn detail(&self, login: &str, domain: &str, id: &str) -> Result<MessageDetail> {
        let record: MessageDetailRecord = self
            .call(&[
                ("action", "readMessage"),
                ("login", login),
                ("domain", domain),
                ("id", id),
            ])
            .await?;

        let attachments = record
            .attachments
            .into_iter()
            .map(|a| Attachment {
                id: Some(a.filename.clone()),
                download_url: self.download_url(login, domain, id, &a.filename),
                filename: a.filename,
                content_type: a.content_type,
                size: a.size,
            })
            .collect();

        let text = if record.text_body.is_empty() {
            record.body
        } else {
            record.text_body
        };
        let html = if record.html_body.is_empty() {
            None
        } else {
            Some(vec![record.html_body])
        };

        Ok(MessageDetail {
            summary: normalize(record.summary)?,
            text,
            html,
            attachments: Some(attachments),
            metadata_complete: true,
        })
    }

    fn download_url(&self, login: &str, domain: &str, id: &str, file: &str) -> String {
        match Url::parse(&self.base_url) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("action", "download")
                    .append_pair("login", login)
                    .append_pair("domain", domain)
                    .append_pair("id", id)
                    .append_pair("file", file);
                url.to_string()
            }
            Err(_) => format!(
                "{}?action=download&login={login}&domain={domain}&id={id}&file={file}",
                self.base_url
            ),
        }
    }
}

fn normalize(m: MessageRecord) -> Result<MessageSummary> {
    let created_at = parse_timestamp(&m.date)
        .ok_or_else(|| Error::ResponseParse(format!("bad date {:?} on message {}", m.date, m.id)))?;
    Ok(MessageSummary {
        id: m.id,
        from: Sender::parse(&m.from),
        // The listing carries no preview.
        intro: m.subject.clone(),
        subject: m.subject,
        seen: false,
        created_at,
        has_attachments: None,
        download_url: None,
        tag: None,
    })
}

#[async_trait]
impl Provider for OneSecMail {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OneSecMail
    }

    async fn create_account(
        &self,
        username: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Account> {
        self.create(username, domain)
            .await
            .map_err(|e| Error::account_creation(NAME, e))
    }

    async fn get_messages(&self, lookup_key: &str) -> Result<Vec<MessageSummary>> {
        let Some((login, domain)) = split_address(lookup_key) else {
            return Ok(Vec::new());
        };
        self.list(login, domain)
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }

    async fn get_message(&self, lookup_key: &str, message_id: &str) -> Result<MessageDetail> {
        let (login, domain) = split_address(lookup_key).ok_or_else(|| {
            Error::fetch(
                NAME,
                Error::ResponseParse(format!("not an address: {lookup_key:?}")),
            )
        })?;
        self.detail(login, domain, message_id)
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }

    async fn get_domains(&self) -> Result<Vec<String>> {
        self.fetch_domains()
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }
}
