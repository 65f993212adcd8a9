//! GuerrillaMail adapter: session-token keyed inboxes.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{DeleteSupport, Provider, ProviderKind, de};
use crate::http::{HttpOptions, check_status, read_json};
use crate::models::from_epoch_secs;
use crate::{Account, Error, MessageDetail, MessageSummary, Result, Sender};

const AJAX_URL: &str = "https://api.guerrillamail.com/ajax.php";
const NAME: &str = "Guerrilla";

/// Domains GuerrillaMail delivers to. Any alias works on all of them.
const DOMAINS: [&str; 5] = [
    "guerrillamail.com",
    "guerrillamailblock.com",
    "sharklasers.com",
    "guerrillamail.net",
    "guerrillamail.org",
];

/// Adapter for the GuerrillaMail AJAX API.
///
/// The upstream assigns an address when a session starts and identifies the
/// inbox by its `sid_token`, which is the lookup key. A requested username is
/// applied with `set_email_user` on the new session.
#[derive(Debug, Clone)]
pub struct Guerrilla {
    http: reqwest::Client,
    ajax_url: String,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct SessionRecord {
    email_addr: String,
    #[serde(default)]
    sid_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboxRecord {
    #[serde(default)]
    list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    #[serde(deserialize_with = "de::string_or_number")]
    mail_id: String,
    #[serde(default)]
    mail_from: String,
    #[serde(default)]
    mail_subject: String,
    #[serde(default)]
    mail_excerpt: String,
    #[serde(deserialize_with = "de::i64_lenient")]
    mail_timestamp: i64,
    #[serde(default, deserialize_with = "de::string_or_number")]
    mail_read: String,
    #[serde(default, deserialize_with = "de::string_or_number")]
    att: String,
}

#[derive(Debug, Deserialize)]
struct MessageDetailRecord {
    #[serde(flatten)]
    summary: MessageRecord,
    #[serde(default)]
    mail_body: String,
}

impl Guerrilla {
    /// Adapter against `guerrillamail.com` with default [`HttpOptions`].
    pub fn new() -> Result<Self> {
        Self::with_options(HttpOptions::default())
    }

    /// Adapter against the public endpoint with custom transport options.
    pub fn with_options(options: HttpOptions) -> Result<Self> {
        Self::with_base_url(AJAX_URL, options)
    }

    /// Override the AJAX endpoint URL.
    pub fn with_base_url(ajax_url: impl Into<String>, options: HttpOptions) -> Result<Self> {
        // Cookie store keeps the PHPSESSID the upstream pairs with sid_token.
        Ok(Self {
            http: options.build_client(true)?,
            ajax_url: ajax_url.into(),
            user_agent: options.user_agent_value().to_string(),
        })
    }

    /// Common GET API request pattern.
    async fn get_api<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let timestamp = Self::timestamp();
        let mut query = vec![("f", function)];
        query.extend_from_slice(params);
        query.push(("_", timestamp.as_str()));

        let response = self
            .http
            .get(&self.ajax_url)
            .query(&query)
            .headers(self.headers())
            .send()
            .await?;
        read_json(response).await
    }

    async fn start_session(&self) -> Result<SessionRecord> {
        self.get_api("get_email_address", &[("lang", "en")]).await
    }

    async fn create(&self, username: Option<&str>, domain: Option<&str>) -> Result<Account> {
        if let Some(domain) = domain {
            if !DOMAINS.contains(&domain) {
                return Err(Error::ResponseParse(format!(
                    "{domain} is not a GuerrillaMail domain"
                )));
            }
        }

        let session = self.start_session().await?;
        let sid = session
            .sid_token
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ResponseParse("missing sid_token".into()))?;

        let assigned = match username {
            Some(alias) => {
                let renamed: SessionRecord = self
                    .get_api(
                        "set_email_user",
                        &[("email_user", alias), ("lang", "en"), ("sid_token", sid.as_str())],
                    )
                    .await?;
                renamed.email_addr
            }
            None => session.email_addr,
        };

        let address = match domain {
            Some(domain) => super::compose_address(Self::extract_alias(&assigned), domain)?,
            None => assigned,
        };
        if crate::models::split_address(&address).is_none() {
            return Err(Error::ResponseParse(format!("invalid address {address:?}")));
        }

        tracing::info!(provider = NAME, %address, "session started");
        Ok(Account::new(address).with_token(sid))
    }

    async fn list(&self, sid: &str) -> Result<Vec<MessageSummary>> {
        let inbox: InboxRecord = self
            .get_api("check_email", &[("seq", "0"), ("sid_token", sid)])
            .await?;

        Ok(inbox
            .list
            .into_iter()
            .filter_map(|raw| {
                serde_json::from_value::<MessageRecord>(raw)
                    .map_err(Error::from)
                    .and_then(normalize)
                    .inspect_err(|e| {
                        tracing::warn!(provider = NAME, error = %e, "skipping malformed inbox row");
                    })
                    .ok()
            })
            .collect())
    }

    async fn detail(&self, sid: &str, id: &str) -> Result<MessageDetail> {
        let raw: Value = self
            .get_api("fetch_email", &[("email_id", id), ("sid_token", sid)])
            .await?;
        // Unknown ids come back as `false`.
        if !raw.is_object() {
            return Err(Error::ResponseParse(format!("no message {id}")));
        }
        let record: MessageDetailRecord = serde_json::from_value(raw)?;
        let body = record.mail_body;

        Ok(MessageDetail {
            summary: normalize(record.summary)?,
            text: body.clone(),
            html: Some(vec![body]),
            attachments: Some(Vec::new()),
            metadata_complete: true,
        })
    }

    async fn delete(&self, sid: &str, id: &str) -> Result<()> {
        let timestamp = Self::timestamp();
        let response = self
            .http
            .get(&self.ajax_url)
            .query(&[
                ("f", "del_email"),
                ("email_ids[]", id),
                ("sid_token", sid),
                ("_", timestamp.as_str()),
            ])
            .headers(self.headers())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Extract alias from email address.
    fn extract_alias(email: &str) -> &str {
        email.split('@').next().unwrap_or(email)
    }

    /// Generate timestamp for cache-busting.
    fn timestamp() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            .to_string()
    }

    /// Build headers for API requests.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers
    }
}

fn normalize(m: MessageRecord) -> Result<MessageSummary> {
    let created_at = from_epoch_secs(m.mail_timestamp).ok_or_else(|| {
        Error::ResponseParse(format!("bad timestamp {} on message {}", m.mail_timestamp, m.mail_id))
    })?;
    let has_attachments = m.att.trim().parse::<u32>().map(|n| n > 0).unwrap_or(false);
    Ok(MessageSummary {
        id: m.mail_id,
        from: Sender::parse(&m.mail_from),
        subject: m.mail_subject,
        intro: m.mail_excerpt,
        seen: m.mail_read == "1",
        created_at,
        has_attachments: Some(has_attachments),
        download_url: None,
        tag: None,
    })
}

#[async_trait]
impl Provider for Guerrilla {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Guerrilla
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
        Ok(DOMAINS.iter().map(|d| d.to_string()).collect())
    }

    fn delete_support(&self) -> DeleteSupport {
        DeleteSupport::Upstream
    }

    async fn delete_message(&self, lookup_key: &str, message_id: &str) -> Result<()> {
        self.delete(lookup_key, message_id)
            .await
            .map_err(|e| Error::fetch(NAME, e))
    }
}
