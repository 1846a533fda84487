//! Hosted payment page client.
//!
//! The gateway issues a checkout URL for a transaction id and later calls
//! the success/fail/cancel endpoints with the same id.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::GatewayConfig;
use crate::errors::ServiceError;

/// Customer and amount details for a new checkout session
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySessionRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub amount: Decimal,
    pub transaction_id: String,
}

#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub redirect_url: String,
    /// Full provider response
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn init_session(
        &self,
        request: GatewaySessionRequest,
    ) -> Result<GatewaySession, ServiceError>;
}

pub type SharedPaymentGateway = Arc<dyn PaymentGateway>;

#[derive(Debug, Serialize)]
struct SessionForm<'a> {
    store_id: &'a str,
    store_passwd: &'a str,
    total_amount: String,
    currency: &'a str,
    tran_id: &'a str,
    success_url: String,
    fail_url: String,
    cancel_url: String,
    shipping_method: &'static str,
    product_name: &'static str,
    product_category: &'static str,
    product_profile: &'static str,
    cus_name: &'a str,
    cus_email: &'a str,
    cus_add1: &'a str,
    cus_city: &'a str,
    cus_country: &'static str,
    cus_phone: &'a str,
}

/// SSLCommerz-compatible session client
pub struct SslCommerzGateway {
    client: Client,
    config: GatewayConfig,
    breaker: CircuitBreaker,
}

impl SslCommerzGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build gateway client: {}", e))
            })?;

        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: GatewayConfig, client: Client) -> Self {
        let breaker = CircuitBreaker::new(
            "payment_gateway",
            CircuitBreakerConfig {
                failure_threshold: config.failure_threshold,
                timeout: config.reset_timeout(),
                success_threshold: 1,
            },
        );

        Self {
            client,
            config,
            breaker,
        }
    }

    /// Callback URL carrying the parameters the settlement endpoints expect.
    fn callback_url(
        base: &str,
        request: &GatewaySessionRequest,
        status: &str,
    ) -> Result<String, ServiceError> {
        let amount = request.amount.to_string();
        let url = url::Url::parse_with_params(
            base,
            &[
                ("transactionId", request.transaction_id.as_str()),
                ("amount", amount.as_str()),
                ("status", status),
            ],
        )
        .map_err(|e| ServiceError::InternalError(format!("invalid callback url {}: {}", base, e)))?;

        Ok(url.into())
    }

    async fn post_session(
        &self,
        request: &GatewaySessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let form = SessionForm {
            store_id: &self.config.store_id,
            store_passwd: &self.config.store_password,
            total_amount: request.amount.to_string(),
            currency: &self.config.currency,
            tran_id: &request.transaction_id,
            success_url: Self::callback_url(&self.config.success_url, request, "success")?,
            fail_url: Self::callback_url(&self.config.fail_url, request, "fail")?,
            cancel_url: Self::callback_url(&self.config.cancel_url, request, "cancel")?,
            shipping_method: "NO",
            product_name: "Order",
            product_category: "General",
            product_profile: "general",
            cus_name: &request.name,
            cus_email: &request.email,
            cus_add1: &request.address,
            cus_city: &request.city,
            cus_country: "Bangladesh",
            cus_phone: &request.phone,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment gateway unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "payment gateway responded with {}",
                status
            )));
        }

        let raw: serde_json::Value = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid payment gateway response: {}", e))
        })?;

        let redirect_url = raw
            .get("GatewayPageURL")
            .and_then(|v| v.as_str())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                let reason = raw
                    .get("failedreason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("no checkout url returned");
                ServiceError::ExternalServiceError(format!(
                    "payment gateway rejected session: {}",
                    reason
                ))
            })?;

        Ok(GatewaySession { redirect_url, raw })
    }
}

#[async_trait]
impl PaymentGateway for SslCommerzGateway {
    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn init_session(
        &self,
        request: GatewaySessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let result = self.breaker.call(|| self.post_session(&request)).await;
        match &result {
            Ok(_) => info!("gateway session created"),
            Err(e) => warn!(error = %e, "gateway session failed"),
        }
        result
    }
}
