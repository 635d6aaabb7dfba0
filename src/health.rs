//! Health check module
//! Reports the datastore and the webhook work queue.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, warn};

use crate::database::error::DatabaseError;
use crate::database::store::BookingStore;
use crate::workers::webhook_dispatch::WebhookDispatcher;

/// Queue fill ratio above which the service reports itself degraded.
const QUEUE_WARNING_RATIO: f64 = 0.9;
const DATABASE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn BookingStore>,
    dispatcher: Option<Arc<WebhookDispatcher>>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self {
            store,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<WebhookDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        health_status
            .checks
            .insert("database".to_string(), self.database_component().await);
        if let Some(dispatcher) = &self.dispatcher {
            health_status.checks.insert(
                "webhook_queue".to_string(),
                queue_component(dispatcher.queue_depth(), dispatcher.queue_capacity()),
            );
        }

        health_status.status = overall_state(&health_status.checks);
        health_status
    }

    async fn database_component(&self) -> ComponentHealth {
        match timeout(DATABASE_PROBE_TIMEOUT, check_store_health(self.store.as_ref())).await {
            Ok(Ok(response_time)) => ComponentHealth::up(Some(response_time)),
            Ok(Err(e)) => {
                error!(error = %e, "database health check failed");
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("database health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }
}

fn queue_component(depth: usize, capacity: usize) -> ComponentHealth {
    let capacity = capacity.max(1);
    let details = Some(format!("{}/{} queued", depth, capacity));
    if depth as f64 / capacity as f64 >= QUEUE_WARNING_RATIO {
        warn!(depth, capacity, "webhook queue nearly full");
        ComponentHealth::warning(None, details)
    } else {
        ComponentHealth {
            details,
            ..ComponentHealth::up(None)
        }
    }
}

/// Any component down makes the service unhealthy; a warning only degrades it.
fn overall_state(checks: &HashMap<String, ComponentHealth>) -> HealthState {
    let any = |state: ComponentState| checks.values().any(|c| c.status == state);
    if any(ComponentState::Down) {
        HealthState::Unhealthy
    } else if any(ComponentState::Warning) {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

pub async fn check_store_health(store: &dyn BookingStore) -> Result<u128, DatabaseError> {
    let start = Instant::now();
    store.ping().await?;
    Ok(start.elapsed().as_millis())
}
