//! Health check classification and the local health report

use crate::cache::HtmlCacheService;
use crate::proxy::headers::{paths, USER_AGENT};
use chrono::{SecondsFormat, Utc};
use http::HeaderMap;
use serde::Serialize;

/// User agents of load balancers and uptime probes
pub const HEALTH_CHECK_USER_AGENTS: &[&str] = &[
    "ELB-HealthChecker",
    "kube-probe",
    "GoogleHC",
    "Amazon-Route53-Health-Check-Service",
    "UptimeRobot",
];

pub fn is_health_path(path: &str) -> bool {
    paths::HEALTH.contains(&path)
}

pub fn is_health_check_agent(headers: &HeaderMap) -> bool {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|agent| {
            HEALTH_CHECK_USER_AGENTS
                .iter()
                .any(|known| agent.contains(known))
        })
}

/// Health checks never mint tokens or receive cookies
pub fn is_health_check(path: &str, headers: &HeaderMap) -> bool {
    is_health_path(path) || is_health_check_agent(headers)
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub cache: CacheHealth,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub ready: bool,
    pub ping: bool,
}

impl HealthReport {
    /// The proxy keeps serving without its cache, so a dead cache only degrades
    pub async fn collect(cache: &HtmlCacheService) -> Self {
        let ready = cache.is_ready();
        let ping = ready && cache.ping().await;

        Self {
            status: if ping { "ok" } else { "degraded" },
            cache: CacheHealth { ready, ping },
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
