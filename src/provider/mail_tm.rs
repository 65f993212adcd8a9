//! Mail.tm adapter: registered accounts, bearer-token access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{DeleteSupport, Provider, ProviderKind, compose_address, random_string};
use crate::http::{HttpOptions, absolute_url, check_status, read_json};
use crate::retry::{RetryPolicy, retry};
use crate::{Account, Attachment, Error, MessageDetail, MessageSource, MessageSummary, Result, Sender};

const API_BASE: &str = "https://api.mail.tm";
const NAME: &str = "Mail.tm";

/// Adapter for the Mail.tm REST API.
///
/// Creating an account is two calls: `POST /accounts` registers the address,
/// then `POST /token` logs in. The login is retried under a [`RetryPolicy`]
/// because a freshly registered account is not always visible to the token
/// endpoint straight away. The lookup key is the bearer token.
#[derive(Debug, Clone)]
pub struct MailTm {
    http: reqwest::Client,
    base_url: String,
    token_retry: RetryPolicy,
}

/// Hydra collection envelope, tolerating a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Collection<T> {
    Hydra {
        #[serde(rename = "hydra:member")]
        member: Vec<T>,
    },
    Flat(Vec<T>),
}

impl<T> Collection<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Collection::Hydra { member } => member,
            Collection::Flat(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainRecord {
    domain: String,
    #[serde(default = "active_by_default")]
    is_active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    address: String,
}

#[derive(Debug, Deserialize)]
struct TokenRecord {
    token: String,
}

#[derive(Debug, Deserialize)]
struct Party {
    #[serde(default)]
    address: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    id: String,
    from: Party,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    intro: String,
    #[serde(default)]
    seen: bool,
    #[serde(default)]
    has_attachments: Option<bool>,
    #[serde(default)]
    download_url: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetailRecord {
    #[serde(flatten)]
    summary: MessageRecord,
    #[serde(default)]
    text: String,
    #[serde(default)]
    html: Vec<String>,
    #[serde(default)]
    attachments: Vec<AttachmentRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentRecord {
    id: String,
    filename: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    download_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceRecord {
    id: String,
    data: String,
    #[serde(default)]
    download_url: Option<String>,
}

impl MailTm {
    /// Adapter against the public API with default [`HttpOptions`].
    pub fn new() -> Result<Self> {
        Self::with_options(HttpOptions::default())
    }

    /// Adapter against the public API, e.g. through a proxy.
    ///
    /// ```no_run
    /// use tempmail_client::{HttpOptions, MailTm};
    ///
    /// let mail_tm = MailTm::with_options(HttpOptions::new().proxy("socks5://127.0.0.1:9050"))?;
    /// # Ok::<(), tempmail_client::Error>(())
    /// ```
    pub fn with_options(options: HttpOptions) -> Result<Self> {
        Self::with_base_url(API_BASE, options)
    }

    /// Point the adapter at another API root, such as a forwarding proxy.
    pub fn with_base_url(base_url: impl Into<String>, options: HttpOptions) -> Result<Self> {
        Ok(Self {
            http: options.build_client(false)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_retry: RetryPolicy::default(),
        })
    }

    /// Override the login retry budget (default: 10 attempts, 1 second apart).
    pub fn with_token_retry(mut self, policy: RetryPolicy) -> Self {
        self.token_retry = policy;
        self
    }

    fn url(&self, path: &str) -> String {
        absolute_url(&self.base_url, path)
    }

    async fn fetch_domains(&self) -> Result<Vec<String>> {
        let response = self.http.get(self.url("/domains")).send().await?;
        let domains: Collection<DomainRecord> = read_json(response).await?;
        Ok(domains
            .into_vec()
            .into_iter()
            .filter(|d| d.is_active)
            .map(|d| d.domain)
            .collect())
    }

    async fn register(&self, address: &str, password: &str) -> Result<AccountRecord> {
        let response = self
            .http
            .post(self.url("/accounts"))
            .json(&json!({ "address": address, "password": password }))
            .send()
            .await?;
        read_json(response).await
    }

    async fn login(&self, address: &str, password: &str) -> Result<String> {
        let response = self
            .http
            .post(self.url("/token"))
            .json(&json!({ "address": address, "password": password }))
            .send()
            .await?;
        let token: TokenRecord = read_json(response).await?;
        Ok(token.token)
    }

    async fn create(&self, username: Option<&str>, domain: Option<&str>) -> Result<Account> {
        let domain = match domain {
            Some(domain) => domain.to_string(),
            None => self
                .fetch_domains()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::ResponseParse("no domains available".into()))?,
        };
        let username = match username {
            Some(username) => username.to_string(),
            None => format!("ghost.{}", random_string(7)),
        };
        let password = format!("Pwd{}!", random_string(12));
        let address = compose_address(&username, &domain)?;

        tracing::debug!(provider = NAME, %address, "registering account");
        let registered = self.register(&address, &password).await?;

        // The API may normalize the local part, so log in with what it returned.
        let token = retry(self.token_retry, |attempt| {
            tracing::debug!(provider = NAME, address = %registered.address, attempt, "requesting token");
            self.login(&registered.address, &password)
        })
        .await?;

        tracing::info!(provider = NAME, address = %registered.address, "account created");
        Ok(Account::new(registered.address).with_token(token))
    }

    async fn list(&self, token: &str) -> Result<Vec<MessageSummary>> {
        let response = self
            .http
            .get(self.url("/messages"))
            .query(&[("page", "1")])
            .bearer_auth(token)
            .send()
            .await?;
        let messages: Collection<Value> = read_json(response).await?;
        Ok(messages
            .into_vec()
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<MessageRecord>(raw) {
                Ok(record) => Some(self.normalize(record)),
                Err(e) => {
                    tracing::warn!(provider = NAME, error = %e, "skipping malformed message row");
                    None
                }
            })
            .collect())
    }

    async fn detail(&self, token: &str, id: &str) -> Result<MessageDetail> {
        let response = self
            .http
            .get(self.url(&format!("/messages/{id}")))
            .bearer_auth(token)
            .send()
            .await?;
        let record: MessageDetailRecord = read_json(response).await?;

        let attachments = record
            .attachments
            .into_iter()
            .map(|a| Attachment {
                id: Some(a.id),
                filename: a.filename,
                download_url: self.url(&a.download_url),
                content_type: a.content_type,
                size: a.size,
            })
            .collect();
        let html = (!record.html.is_empty()).then_some(record.html);

        Ok(MessageDetail {
            summary: self.normalize(record.summary),
            text: record.text,
            html,
            attachments: Some(attachments),
            metadata_complete: true,
        })
    }

    fn normalize(&self, m: MessageRecord) -> MessageSummary {
        MessageSummary {
            id: m.id,
            from: Sender::new(m.from.address, m.from.name),
            subject: m.subject,
            intro: m.intro,
            seen: m.seen,
            created_at: m.created_at,
            has_attachments: m.has_attachments,
            download_url: m.download_url.map(|u| self.url(&u)),
            tag: None,
        }
    }
}

#[async_trait]
impl Provider for MailTm {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MailTm
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
        if lookup_key.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.list(lookup_key)
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }

    async fn get_message(&self, lookup_key: &str, message_id: &str) -> Result<MessageDetail> {
        self.detail(lookup_key, message_id)
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }

    async fn get_domains(&self) -> Result<Vec<String>> {
        self.fetch_domains()
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }

    fn delete_support(&self) -> DeleteSupport {
        DeleteSupport::Upstream
    }

    async fn delete_message(&self, lookup_key: &str, message_id: &str) -> Result<()> {
        let send = async {
            let response = self
                .http
                .delete(self.url(&format!("/messages/{message_id}")))
                .bearer_auth(lookup_key)
                .send()
                .await?;
            check_status(response).await?;
            Ok::<_, Error>(())
        };
        send.await.map_err(|e| Error::fetch(NAME, e))
    }

    async fn get_message_source(&self, lookup_key: &str, message_id: &str) -> Result<MessageSource> {
        let fetch = async {
            let response = self
                .http
                .get(self.url(&format!("/sources/{message_id}")))
                .bearer_auth(lookup_key)
                .send()
                .await?;
            let source: SourceRecord = read_json(response).await?;
            Ok::<_, Error>(MessageSource {
                id: source.id,
                data: source.data,
                download_url: source.download_url.map(|u| self.url(&u)),
            })
        };
        fetch.await.map_err(|e| Error::fetch(NAME, e))
    }

    async fn mark_as_read(&self, lookup_key: &str, message_id: &str) -> Result<()> {
        let send = async {
            let response = self
                .http
                .patch(self.url(&format!("/messages/{message_id}")))
                .bearer_auth(lookup_key)
                .header(CONTENT_TYPE, "application/merge-patch+json")
                .body(json!({ "seen": true }).to_string())
                .send()
                .await?;
            check_status(response).await?;
            Ok::<_, Error>(())
        };
        send.await.map_err(|e| Error::fetch(NAME, e))
    }
}
