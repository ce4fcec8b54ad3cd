use crate::types::{InboundMessage, Notification};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Delivers notifications to an external channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, n: Notification) -> Result<()>;
}

/// Processes an inbound message. Implemented by the dispatcher; the receiver
/// awaits `handle` before advancing its offset.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: InboundMessage);
}

/// Named notifier implementations. The first registered notifier becomes the
/// default used by the socket server and the dispatcher.
pub struct NotifierRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
    default_name: Option<String>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                notifiers: HashMap::new(),
                default_name: None,
            }),
        }
    }

    pub fn register(&self, notifier: Arc<dyn Notifier>) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let name = notifier.name().to_string();
        if inner.notifiers.contains_key(&name) {
            bail!("notifier {name:?} already registered");
        }
        if inner.default_name.is_none() {
            inner.default_name = Some(name.clone());
        }
        inner.notifiers.insert(name, notifier);
        Ok(())
    }

    pub fn default_notifier(&self) -> Result<Arc<dyn Notifier>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let Some(name) = &inner.default_name else {
            bail!("no notifiers registered");
        };
        match inner.notifiers.get(name) {
            Some(n) => Ok(n.clone()),
            None => bail!("notifier {name:?} not found"),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Notifier>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match inner.notifiers.get(name) {
            Some(n) => Ok(n.clone()),
            None => bail!("notifier {name:?} not found"),
        }
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
