pub mod orders;
pub mod payments;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::documents::{LocalDocumentStore, SharedDocumentStore};
use crate::services::gateway::{SharedPaymentGateway, SslCommerzGateway};
use crate::services::invoice::{SharedInvoiceRenderer, TextInvoiceRenderer};
use crate::services::notifications::{notifier_from_config, SharedNotifier};
use crate::services::orders::OrderService;
use crate::services::settlement::SettlementService;
use crate::services::transaction_id::{RandomTransactionIdGenerator, TransactionIdGenerator};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// External capabilities the settlement coordinator depends on
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: SharedPaymentGateway,
    pub transaction_ids: Arc<dyn TransactionIdGenerator>,
    pub renderer: SharedInvoiceRenderer,
    pub documents: SharedDocumentStore,
    pub notifier: SharedNotifier,
}

impl Collaborators {
    /// Production wiring from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            gateway: Arc::new(SslCommerzGateway::new(config.gateway.clone())?),
            transaction_ids: Arc::new(RandomTransactionIdGenerator),
            renderer: Arc::new(TextInvoiceRenderer),
            documents: Arc::new(LocalDocumentStore::from_config(&config.documents)),
            notifier: notifier_from_config(&config.mail)?,
        })
    }
}

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub settlement: Arc<SettlementService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        collaborators: Collaborators,
        config: &AppConfig,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            collaborators.gateway,
            collaborators.transaction_ids,
            event_sender.clone(),
            config.settlement.strict_status_transitions,
        ));
        let settlement = Arc::new(SettlementService::new(
            db_pool,
            collaborators.renderer,
            collaborators.documents,
            collaborators.notifier,
            event_sender,
            &config.settlement,
        ));

        Self { orders, settlement }
    }
}
