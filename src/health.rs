//! Dependency health checks.
//!
//! Postgres is load-bearing: if it is down the service is unhealthy. The
//! remote cache is disposable, so a cache outage (or an open breaker) only
//! degrades the service.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::breaker::BreakerSnapshot;
use crate::cache::RemoteCache;

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub dependencies: HashMap<String, DependencyStatus>,
    pub circuits: Vec<BreakerSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, DependencyStatus::Healthy { .. })
    }

    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.into(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this dependency being down makes the whole service unhealthy
    /// rather than merely degraded.
    fn critical(&self) -> bool;

    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    fn name(&self) -> &str {
        "postgres"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match timeout(CHECK_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool)).await {
            Ok(Ok(_)) => DependencyStatus::healthy(start),
            Ok(Err(e)) => DependencyStatus::unhealthy(e.to_string()),
            Err(_) => DependencyStatus::unhealthy("check timed out"),
        }
    }
}

pub struct RemoteCacheChecker {
    store: Arc<dyn RemoteCache>,
}

impl RemoteCacheChecker {
    pub fn new(store: Arc<dyn RemoteCache>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for RemoteCacheChecker {
    fn name(&self) -> &str {
        "remote_cache"
    }

    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match timeout(CHECK_TIMEOUT, self.store.exists("health_probe")).await {
            Ok(Ok(_)) => DependencyStatus::healthy(start),
            Ok(Err(e)) => DependencyStatus::unhealthy(e.to_string()),
            Err(_) => DependencyStatus::unhealthy("check timed out"),
        }
    }
}

/// Runs every checker and folds the results into healthy / degraded /
/// unhealthy. An open circuit counts as degradation even when the probe
/// itself currently succeeds.
pub async fn evaluate(
    checkers: &[Box<dyn DependencyChecker>],
    circuits: Vec<BreakerSnapshot>,
) -> HealthResponse {
    let mut dependencies = HashMap::new();
    let mut unhealthy = false;
    let mut degraded = false;

    for checker in checkers {
        let status = checker.check().await;
        if !status.is_healthy() {
            if checker.critical() {
                unhealthy = true;
            } else {
                degraded = true;
            }
        }
        dependencies.insert(checker.name().to_string(), status);
    }

    if circuits.iter().any(|c| c.state != "closed") {
        degraded = true;
    }

    let status = if unhealthy {
        "unhealthy"
    } else if degraded {
        "degraded"
    } else {
        "healthy"
    };

    HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies,
        circuits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    struct StaticChecker {
        name: &'static str,
        critical: bool,
        healthy: bool,
    }

    #[async_trait]
    impl DependencyChecker for StaticChecker {
        fn name(&self) -> &str {
            self.name
        }

        fn critical(&self) -> bool {
            self.critical
        }

        async fn check(&self) -> DependencyStatus {
            if self.healthy {
                DependencyStatus::healthy(Instant::now())
            } else {
                DependencyStatus::unhealthy("down")
            }
        }
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let checkers: Vec<Box<dyn DependencyChecker>> = vec![Box::new(StaticChecker {
            name: "postgres",
            critical: true,
            healthy: true,
        })];
        let report = evaluate(&checkers, Vec::new()).await;
        assert_eq!(report.status, "healthy");
    }

    #[tokio::test]
    async fn test_cache_outage_degrades() {
        let checkers: Vec<Box<dyn DependencyChecker>> = vec![
            Box::new(StaticChecker {
                name: "postgres",
                critical: true,
                healthy: true,
            }),
            Box::new(StaticChecker {
                name: "remote_cache",
                critical: false,
                healthy: false,
            }),
        ];
        let report = evaluate(&checkers, Vec::new()).await;
        assert_eq!(report.status, "degraded");
    }

    #[tokio::test]
    async fn test_database_outage_is_unhealthy() {
        let checkers: Vec<Box<dyn DependencyChecker>> = vec![Box::new(StaticChecker {
            name: "postgres",
            critical: true,
            healthy: false,
        })];
        let report = evaluate(&checkers, Vec::new()).await;
        assert_eq!(report.status, "unhealthy");
    }

    #[tokio::test]
    async fn test_open_circuit_degrades() {
        use crate::breaker::{BreakerRegistry, CircuitConfig};

        let registry = BreakerRegistry::new();
        let breaker = registry.get_or_create(
            "redis",
            CircuitConfig {
                failure_threshold: 1,
                ..CircuitConfig::default()
            },
        );
        let _ = breaker
            .call(async { Err::<(), _>("boom") })
            .await;

        let checkers: Vec<Box<dyn DependencyChecker>> = vec![Box::new(StaticChecker {
            name: "postgres",
            critical: true,
            healthy: true,
        })];
        let report = evaluate(&checkers, registry.snapshots()).await;
        assert_eq!(report.status, "degraded");
    }

    #[tokio::test]
    async fn test_memory_store_checker_is_healthy() {
        let checker = RemoteCacheChecker::new(Arc::new(MemoryStore::new()));
        assert!(checker.check().await.is_healthy());
    }
}
