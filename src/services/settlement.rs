//! Gateway callback settlement.
//!
//! Each callback runs in its own transaction. The first statement is a
//! compare-and-swap on the payment row, so concurrent deliveries for one
//! transaction id serialize on that row and only one of them applies.

use metrics::counter;
use sea_orm::{DatabaseTransaction, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::config::SettlementConfig;
use crate::db::{rollback, DbPool};
use crate::entities::{order, payment, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{order_repository, payment_repository, user_repository};
use crate::services::documents::SharedDocumentStore;
use crate::services::invoice::{InvoiceData, InvoiceLine, SharedInvoiceRenderer};
use crate::services::notifications::{Attachment, EmailMessage, SharedNotifier};

pub const INVOICE_EMAIL_SUBJECT: &str = "Your Order Invoice";
pub const INVOICE_EMAIL_TEMPLATE: &str = "invoice";

/// Outcome reported by the gateway for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SettlementEvent {
    Success,
    Fail,
    Cancel,
}

impl SettlementEvent {
    pub fn payment_status(self) -> PaymentStatus {
        match self {
            SettlementEvent::Success => PaymentStatus::Paid,
            SettlementEvent::Fail => PaymentStatus::Failed,
            SettlementEvent::Cancel => PaymentStatus::Cancelled,
        }
    }

    pub fn order_status(self) -> OrderStatus {
        match self {
            SettlementEvent::Success => OrderStatus::Confirmed,
            SettlementEvent::Fail => OrderStatus::Failed,
            SettlementEvent::Cancel => OrderStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// This delivery moved the payment out of UNPAID
    Settled(PaymentStatus),
    /// The payment was already terminal; nothing was changed
    AlreadySettled(PaymentStatus),
}

impl SettlementOutcome {
    pub fn payment_status(self) -> PaymentStatus {
        match self {
            SettlementOutcome::Settled(status) | SettlementOutcome::AlreadySettled(status) => {
                status
            }
        }
    }
}

enum Applied {
    Transitioned { order_id: uuid::Uuid },
    Replay(PaymentStatus),
}

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DbPool>,
    renderer: SharedInvoiceRenderer,
    documents: SharedDocumentStore,
    notifier: SharedNotifier,
    event_sender: EventSender,
    side_effect_timeout: Duration,
    invoice_issuer: String,
}

impl SettlementService {
    pub fn new(
        db: Arc<DbPool>,
        renderer: SharedInvoiceRenderer,
        documents: SharedDocumentStore,
        notifier: SharedNotifier,
        event_sender: EventSender,
        config: &SettlementConfig,
    ) -> Self {
        Self {
            db,
            renderer,
            documents,
            notifier,
            event_sender,
            side_effect_timeout: config.side_effect_timeout(),
            invoice_issuer: config.invoice_issuer.clone(),
        }
    }

    /// Applies a gateway outcome to the payment and its order.
    ///
    /// On success the invoice is rendered, stored and mailed before commit;
    /// any failure leaves the pair at (PENDING, UNPAID) for a later retry.
    /// Deliveries for an already terminal payment return `AlreadySettled`
    /// without side effects.
    #[instrument(skip(self), fields(transaction_id = %transaction_id, event = %event))]
    pub async fn settle(
        &self,
        transaction_id: &str,
        event: SettlementEvent,
    ) -> Result<SettlementOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        match self.settle_in(&txn, transaction_id, event).await {
            Ok(Applied::Transitioned { order_id }) => {
                txn.commit().await?;

                let status = event.payment_status();
                counter!("settlement.completed", 1, "outcome" => event.to_string());
                info!(%order_id, %status, "Payment settled");

                self.event_sender
                    .send_or_log(Event::PaymentSettled {
                        order_id,
                        transaction_id: transaction_id.to_string(),
                        status,
                    })
                    .await;
                Ok(SettlementOutcome::Settled(status))
            }
            Ok(Applied::Replay(status)) => {
                rollback(txn).await;
                counter!("settlement.replayed", 1);
                info!(%status, "Payment already settled, ignoring callback");
                Ok(SettlementOutcome::AlreadySettled(status))
            }
            Err(e) => {
                rollback(txn).await;
                counter!("settlement.failed", 1);
                error!(error = %e, "Settlement aborted, payment left unpaid");
                Err(e)
            }
        }
    }

    async fn settle_in(
        &self,
        txn: &DatabaseTransaction,
        transaction_id: &str,
        event: SettlementEvent,
    ) -> Result<Applied, ServiceError> {
        let target = event.payment_status();
        let acquired =
            payment_repository::transition_from_unpaid(txn, transaction_id, target).await?;

        let payment = payment_repository::find_by_transaction_id(txn, transaction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;
        if !acquired {
            return Ok(Applied::Replay(payment.status));
        }

        let order = order_repository::get_by_id(txn, payment.order_id).await?;
        let order = order_repository::set_status(txn, order, event.order_status()).await?;

        if event == SettlementEvent::Success {
            self.deliver_invoice(txn, &order, payment).await?;
        }

        Ok(Applied::Transitioned { order_id: order.id })
    }

    async fn deliver_invoice(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
        payment: payment::Model,
    ) -> Result<(), ServiceError> {
        let customer = user_repository::find_by_id(txn, order.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;
        let items = order_repository::find_items(txn, order.id).await?;

        let invoice = InvoiceData {
            issuer: self.invoice_issuer.clone(),
            transaction_id: payment.transaction_id.clone(),
            order_id: order.id,
            order_date: order.created_at,
            customer_name: customer.name.clone(),
            customer_email: customer.email.clone(),
            billing_address: order.billing_address.clone(),
            payment_method: order.payment_method,
            lines: items
                .into_iter()
                .map(|item| InvoiceLine {
                    line_total: item.line_total(),
                    name: item.product_name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    size: item.size,
                })
                .collect(),
            shipping_cost: order.shipping_cost,
            total_amount: payment.amount,
        };

        let document = self
            .bounded("render invoice", self.renderer.render(&invoice))
            .await?;
        let file_name = format!(
            "invoice-{}.{}",
            payment.transaction_id,
            self.renderer.extension()
        );

        let stored = self
            .bounded(
                "upload invoice",
                self.documents.upload(document.clone(), &file_name),
            )
            .await?;
        payment_repository::record_invoice(txn, payment, stored.url).await?;

        let message = EmailMessage {
            to: customer.email,
            subject: INVOICE_EMAIL_SUBJECT.to_string(),
            template: INVOICE_EMAIL_TEMPLATE.to_string(),
            data: serde_json::to_value(&invoice)?,
            attachments: vec![Attachment {
                filename: file_name,
                content_type: self.renderer.content_type().to_string(),
                content: document,
            }],
        };
        self.bounded("send invoice email", self.notifier.send(message))
            .await
    }

    /// Runs one side effect under the configured time limit.
    async fn bounded<T, F>(&self, step: &'static str, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.side_effect_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(step, timeout = ?self.side_effect_timeout, "settlement step timed out");
                Err(ServiceError::ExternalServiceError(format!(
                    "{} timed out after {:?}",
                    step, self.side_effect_timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SettlementEvent::Success, PaymentStatus::Paid, OrderStatus::Confirmed)]
    #[case(SettlementEvent::Fail, PaymentStatus::Failed, OrderStatus::Failed)]
    #[case(SettlementEvent::Cancel, PaymentStatus::Cancelled, OrderStatus::Cancelled)]
    fn event_targets(
        #[case] event: SettlementEvent,
        #[case] payment: PaymentStatus,
        #[case] order: OrderStatus,
    ) {
        assert_eq!(event.payment_status(), payment);
        assert_eq!(event.order_status(), order);
        assert!(payment.is_terminal());
    }

    #[test]
    fn event_names_match_callback_status() {
        assert_eq!(SettlementEvent::Success.to_string(), "success");
        assert_eq!(SettlementEvent::Cancel.to_string(), "cancel");
        let parsed: SettlementEvent = serde_json::from_str("\"fail\"").unwrap();
        assert_eq!(parsed, SettlementEvent::Fail);
    }
}
