//! The session message cache and its merge rules.

use std::collections::HashMap;

use crate::extract::{ActionLink, extract_action_link, extract_otp};
use crate::{Attachment, MessageDetail, MessageSummary};

/// Body of a cached message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// Only the summary has been seen; the detail was never fetched.
    #[default]
    Unloaded,
    Loaded(String),
}

impl Body {
    /// Whether the detail has been fetched.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Body::Loaded(_))
    }

    /// The fetched text, or `None` while unloaded.
    pub fn as_loaded(&self) -> Option<&str> {
        match self {
            Body::Loaded(text) => Some(text),
            Body::Unloaded => None,
        }
    }
}

/// The richest version of a message observed during the current account's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub summary: MessageSummary,
    pub body: Body,
    pub html: Option<Vec<String>>,
    pub attachments: Option<Vec<Attachment>>,
    /// Sticky once set.
    pub otp: Option<String>,
    /// Sticky once set.
    pub action_link: Option<ActionLink>,
}

impl CachedMessage {
    fn from_summary(summary: MessageSummary) -> Self {
        let mut message = Self {
            summary,
            body: Body::Unloaded,
            html: None,
            attachments: None,
            otp: None,
            action_link: None,
        };
        message.annotate();
        message
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// Fill in whichever annotations are still missing.
    fn annotate(&mut self) {
        let text = self.body.as_loaded().unwrap_or(&self.summary.intro);
        if self.otp.is_none() {
            let haystack = format!("{}\n{}\n{}", self.summary.subject, self.summary.intro, text);
            self.otp = extract_otp(&haystack);
        }
        if self.action_link.is_none() {
            self.action_link =
                extract_action_link(text, self.html.as_deref(), Some(&self.summary.subject));
        }
    }
}

/// Take the fresh summary, keeping optional fields the fresh copy lacks.
/// `seen` only moves from unread to read.
fn merge_summary(existing: &MessageSummary, fresh: MessageSummary) -> MessageSummary {
    MessageSummary {
        seen: fresh.seen || existing.seen,
        has_attachments: fresh.has_attachments.or(existing.has_attachments),
        download_url: fresh.download_url.or_else(|| existing.download_url.clone()),
        tag: fresh.tag.or(existing.tag),
        ..fresh
    }
}

/// Messages of one account, keyed by id.
///
/// Polls only ever add or enrich entries. Entries leave the cache through
/// [`MessageCache::remove`] or [`MessageCache::clear`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageCache {
    messages: HashMap<String, CachedMessage>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a poll's summaries.
    ///
    /// Summary fields come from the fresh copy; body, HTML, attachments and
    /// annotations already resolved are kept. Messages missing from `fresh`
    /// stay cached. Applying the same list twice leaves the cache unchanged.
    ///
    /// Returns the number of messages that were not cached before.
    pub fn merge_summaries(&mut self, fresh: Vec<MessageSummary>) -> usize {
        let mut added = 0;
        for summary in fresh {
            match self.messages.get_mut(&summary.id) {
                Some(existing) => {
                    existing.summary = merge_summary(&existing.summary, summary);
                    existing.annotate();
                }
                None => {
                    added += 1;
                    self.messages
                        .insert(summary.id.clone(), CachedMessage::from_summary(summary));
                }
            }
        }
        added
    }

    /// Store a fetched detail in the entry it belongs to.
    ///
    /// A detail for a message no longer cached is dropped and `false` is
    /// returned. When the detail's metadata is incomplete, the list-time
    /// sender, subject and date are kept.
    pub fn merge_detail(&mut self, detail: MessageDetail) -> bool {
        let Some(existing) = self.messages.get_mut(&detail.summary.id) else {
            return false;
        };
        if detail.metadata_complete {
            existing.summary = merge_summary(&existing.summary, detail.summary);
        }
        existing.body = Body::Loaded(detail.text);
        if detail.html.is_some() {
            existing.html = detail.html;
        }
        if detail.attachments.is_some() {
            existing.attachments = detail.attachments;
        }
        existing.annotate();
        true
    }

    /// Flag a message as read. Returns `false` if it is not cached.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        match self.messages.get_mut(id) {
            Some(message) => {
                message.summary.seen = true;
                true
            }
            None => false,
        }
    }

    /// The cached entry for `id`.
    pub fn get(&self, id: &str) -> Option<&CachedMessage> {
        self.messages.get(id)
    }

    /// Whether `id` is cached.
    pub fn contains(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }

    /// Drop one entry, returning it if it was cached.
    pub fn remove(&mut self, id: &str) -> Option<CachedMessage> {
        self.messages.remove(id)
    }

    /// All cached messages, newest first.
    pub fn messages(&self) -> Vec<&CachedMessage> {
        let mut messages: Vec<_> = self.messages.values().collect();
        messages.sort_by(|a, b| {
            b.summary
                .created_at
                .cmp(&a.summary.created_at)
                .then_with(|| a.summary.id.cmp(&b.summary.id))
        });
        messages
    }

    /// Number of cached messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
