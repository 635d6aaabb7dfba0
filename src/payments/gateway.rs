use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::types::{GatewayCollection, GatewayOrder, GatewayPayment};
use crate::payments::utils::{BasicAuth, GatewayHttpClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key id handed to the checkout widget.
    fn key_id(&self) -> &str;

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<GatewayOrder>;

    async fn fetch_order(&self, order_id: &str) -> GatewayResult<GatewayOrder>;

    async fn fetch_order_payments(&self, order_id: &str) -> GatewayResult<Vec<GatewayPayment>>;
}

pub struct RazorpayGateway {
    http: GatewayHttpClient,
    base_url: String,
    auth: BasicAuth,
    key_id: String,
}

impl RazorpayGateway {
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(config.timeout(), config.max_retries)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: BasicAuth {
                username: config.key_id.clone(),
                password: config.key_secret.clone(),
            },
            key_id: config.key_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<GatewayOrder> {
        let body = json!({
            "amount": request.amount,
            "currency": request.currency,
            "receipt": request.receipt,
            "notes": request.notes,
        });
        let order: GatewayOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.url("orders"),
                Some(&self.auth),
                Some(&body),
            )
            .await?;
        info!(order_id = %order.id, receipt = %request.receipt, "gateway order created");
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str) -> GatewayResult<GatewayOrder> {
        debug!(order_id = %order_id, "fetching order from gateway");
        self.http
            .request_json(
                reqwest::Method::GET,
                &self.url(&format!("orders/{}", order_id)),
                Some(&self.auth),
                None,
            )
            .await
            .map_err(|e| match e {
                GatewayError::NotFound { .. } => GatewayError::NotFound {
                    resource: "order".to_string(),
                    id: order_id.to_string(),
                },
                other => other,
            })
    }

    async fn fetch_order_payments(&self, order_id: &str) -> GatewayResult<Vec<GatewayPayment>> {
        let collection: GatewayCollection<GatewayPayment> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.url(&format!("orders/{}/payments", order_id)),
                Some(&self.auth),
                None,
            )
            .await?;
        Ok(collection.items)
    }
}

/// Gateway used when running without external services: orders are minted locally
/// and lookups find nothing.
pub struct OfflineGateway {
    key_id: String,
}

impl OfflineGateway {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for OfflineGateway {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<GatewayOrder> {
        Ok(GatewayOrder {
            id: format!("order_offline_{}", Uuid::new_v4().simple()),
            amount: Some(request.amount),
            currency: Some(request.currency.clone()),
            receipt: Some(request.receipt.clone()),
            status: Some("created".to_string()),
            notes: json!(request.notes),
        })
    }

    async fn fetch_order(&self, order_id: &str) -> GatewayResult<GatewayOrder> {
        Err(GatewayError::NotFound {
            resource: "order".to_string(),
            id: order_id.to_string(),
        })
    }

    async fn fetch_order_payments(&self, _order_id: &str) -> GatewayResult<Vec<GatewayPayment>> {
        Ok(Vec::new())
    }
}
