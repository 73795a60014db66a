use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Every route the API serves, as listed by the health endpoint.
pub const ENDPOINTS: &[&str] = &[
    "POST /api/text-to-speech",
    "POST /api/upload-audio/",
    "POST /api/transcribe/file",
    "POST /api/tts/echo",
    "POST /api/llm/query",
    "POST /api/agent/chat",
    "POST /api/agent/chat/{session_id}",
    "GET /api/agent/chat/{session_id}/history",
    "DELETE /api/agent/chat/{session_id}",
    "GET /api/health",
    "GET /api/metrics",
    "GET /api/config",
];

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let gateways: serde_json::Map<String, serde_json::Value> = state
        .gateway_status()
        .iter()
        .map(|(name, available)| {
            let status = if *available { "configured" } else { "missing_api_key" };
            (name.to_string(), json!({ "available": available, "status": status }))
        })
        .collect();
    let all_available = state.gateway_status().iter().all(|(_, available)| *available);

    HttpResponse::Ok().json(json!({
        // The process is alive either way; "degraded" means some endpoints will answer 503.
        "status": if all_available { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "gateways": gateways,
        "sessions": {
            "live": state.sessions().len(),
            "active_turns": metrics.active_turns,
        },
        "memory": get_memory_info(),
        "endpoints": ENDPOINTS,
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "turns": {
            "active": metrics.active_turns,
            "completed": metrics.turns_completed,
            "failed": metrics.turns_failed,
            "degraded_replies": metrics.degraded_replies,
        },
        "sessions": {
            "live": state.sessions().len(),
            "max_turns": state.config.session.max_turns(),
            "idle_ttl_secs": state.config.session.idle_ttl().map(|ttl| ttl.as_secs()),
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}
