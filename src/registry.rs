//! The set of adapters available to a session.

use std::sync::Arc;

use crate::http::HttpOptions;
use crate::provider::{Guerrilla, MailTm, Mailsac, OneSecMail, Provider, ProviderKind};
use crate::{Error, Result};

/// Adapters keyed by [`ProviderKind`], in registration order.
///
/// Adapters are long-lived and shared, so lookups hand out `Arc` clones that
/// can be moved into a polling task.
///
/// ```
/// use tempmail_client::{ProviderKind, ProviderRegistry};
///
/// # fn main() -> tempmail_client::Result<()> {
/// let registry = ProviderRegistry::with_defaults()?;
/// assert_eq!(registry.default_kind(), Some(ProviderKind::MailTm));
///
/// let mailsac = registry.by_name("mailsac").expect("registered");
/// assert_eq!(mailsac.kind(), ProviderKind::Mailsac);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// An empty registry. Use [`ProviderRegistry::with_defaults`] for the
    /// four built-in adapters.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in adapters against their public endpoints.
    pub fn with_defaults() -> Result<Self> {
        Self::with_options(HttpOptions::default())
    }

    /// All built-in adapters, sharing one set of transport options.
    pub fn with_options(options: HttpOptions) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(MailTm::with_options(options.clone())?));
        registry.register(Arc::new(OneSecMail::with_options(options.clone())?));
        registry.register(Arc::new(Guerrilla::with_options(options.clone())?));
        registry.register(Arc::new(Mailsac::with_options(options)?));
        Ok(registry)
    }

    /// Add an adapter, replacing any previous one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let kind = provider.kind();
        match self.providers.iter_mut().find(|p| p.kind() == kind) {
            Some(slot) => *slot = provider,
            None => self.providers.push(provider),
        }
    }

    /// The adapter registered for `kind`.
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.kind() == kind).cloned()
    }

    /// Like [`ProviderRegistry::get`], but an unregistered kind is an error.
    pub fn require(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>> {
        self.get(kind)
            .ok_or_else(|| Error::UnknownProvider(kind.name().to_string()))
    }

    /// Case-insensitive lookup by display name or tag.
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Provider>> {
        name.parse::<ProviderKind>().ok().and_then(|kind| self.get(kind))
    }

    /// Every adapter, in registration order.
    pub fn all(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// The first registered adapter, used when nothing else was selected.
    pub fn default_kind(&self) -> Option<ProviderKind> {
        self.providers.first().map(|p| p.kind())
    }
}
