use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{BillingAddress, PaymentMethod};
use crate::errors::ServiceError;

/// One billed line with the price captured at order time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub size: Decimal,
    pub line_total: Decimal,
}

/// Everything printed on an invoice. Also passed to the mail template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceData {
    pub issuer: String,
    pub transaction_id: String,
    pub order_id: Uuid,
    pub order_date: DateTime<Utc>,
    pub customer_name: String,
    pub customer_email: String,
    pub billing_address: BillingAddress,
    pub payment_method: PaymentMethod,
    pub lines: Vec<InvoiceLine>,
    pub shipping_cost: Decimal,
    /// Amount actually charged, taken from the payment
    pub total_amount: Decimal,
}

#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    /// File extension of rendered documents, without the dot
    fn extension(&self) -> &'static str;

    fn content_type(&self) -> &'static str;

    async fn render(&self, invoice: &InvoiceData) -> Result<Vec<u8>, ServiceError>;
}

pub type SharedInvoiceRenderer = Arc<dyn InvoiceRenderer>;

/// Fixed-width plain text invoice
#[derive(Debug, Default, Clone, Copy)]
pub struct TextInvoiceRenderer;

impl TextInvoiceRenderer {
    fn render_text(invoice: &InvoiceData) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        writeln!(out, "{}", invoice.issuer)?;
        writeln!(out, "INVOICE {}", invoice.transaction_id)?;
        writeln!(out, "Order: {}", invoice.order_id)?;
        writeln!(out, "Date: {}", invoice.order_date.format("%Y-%m-%d %H:%M UTC"))?;
        writeln!(out)?;
        writeln!(out, "Bill to: {}", invoice.billing_address.name)?;
        writeln!(out, "         {}", invoice.billing_address.one_line())?;
        writeln!(out, "Phone:   {}", invoice.billing_address.phone)?;
        writeln!(out, "Customer: {} <{}>", invoice.customer_name, invoice.customer_email)?;
        writeln!(out, "Payment method: {}", invoice.payment_method)?;
        writeln!(out)?;
        writeln!(
            out,
            "{:<32} {:>6} {:>6} {:>12} {:>12}",
            "Item", "Size", "Qty", "Unit", "Total"
        )?;
        for line in &invoice.lines {
            writeln!(
                out,
                "{:<32} {:>6} {:>6} {:>12} {:>12}",
                line.name, line.size, line.quantity, line.unit_price, line.line_total
            )?;
        }
        writeln!(out)?;
        writeln!(out, "{:<58} {:>12}", "Shipping", invoice.shipping_cost)?;
        writeln!(out, "{:<58} {:>12}", "TOTAL", invoice.total_amount)?;
        Ok(out)
    }
}

#[async_trait]
impl InvoiceRenderer for TextInvoiceRenderer {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    async fn render(&self, invoice: &InvoiceData) -> Result<Vec<u8>, ServiceError> {
        Self::render_text(invoice)
            .map(String::into_bytes)
            .map_err(|e| ServiceError::InternalError(format!("failed to render invoice: {}", e)))
    }
}
