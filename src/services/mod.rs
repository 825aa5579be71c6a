//! Marketplace operations. Each submodule adds an `impl Marketplace` block
//! for one area; handlers call these and never touch storage directly.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::config::{Config, MarketplaceConfig};
use crate::domain::{Id, NewActivity};
use crate::error::{BazaarError, Result};
use crate::hub::Hub;
use crate::storage::Storage;

pub mod academics;
pub mod accounts;
pub mod cart;
pub mod catalog;
pub mod chat;
pub mod checkout;
pub mod dashboard;
pub mod moderation;
pub mod notifications;
pub mod orders;
pub mod uploads;
pub mod validation;

pub use checkout::{CheckoutForm, CheckoutOutcome, PendingPayment};
pub use uploads::{Upload, Uploads};

/// Client details recorded with account activity.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewActivity {
    pub fn with_meta(mut self, meta: &RequestMeta) -> Self {
        self.ip_address = meta.ip_address.clone();
        self.user_agent = meta.user_agent.clone();
        self
    }
}

pub struct Marketplace {
    pub storage: Arc<dyn Storage>,
    pub hub: Hub,
    pub settings: MarketplaceConfig,
    pub uploads: Uploads,
    session_ttl: Duration,
    pending_payments: Mutex<HashMap<Id, PendingPayment>>,
}

impl Marketplace {
    pub fn new(storage: Arc<dyn Storage>, hub: Hub, config: &Config) -> Self {
        Self {
            storage,
            hub,
            settings: config.marketplace.clone(),
            uploads: Uploads::new(&config.server.upload_dir),
            session_ttl: Duration::hours(config.server.session_ttl_hours),
            pending_payments: Mutex::new(HashMap::new()),
        }
    }

    /// Activity logging never fails the operation that triggered it.
    pub(crate) async fn log_activity(&self, activity: NewActivity) {
        if let Err(e) = self.storage.record_activity(&activity).await {
            warn!(error = %e, action = %activity.action, "Failed to record activity");
        }
    }

    pub(crate) fn pending_payments(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Id, PendingPayment>>> {
        self.pending_payments
            .lock()
            .map_err(|_| BazaarError::Storage("pending payment table poisoned".into()))
    }
}
