use cortex_types::{Anomaly, AnomalyType, Reading, Severity};
use serde_json::json;

// Fixed rule table keyed by source_id. Every anomaly the engine can emit
// comes from here; there is no dynamic registration.

const DISK_PRESSURE_PCT: f64 = 0.85;
const DISK_CRITICAL_PCT: f64 = 0.95;
const MEMORY_PRESSURE_PCT: f64 = 0.85;
const MEMORY_CRITICAL_PCT: f64 = 0.95;
const LOG_BLOAT_MB: f64 = 1_024.0;

/// Classify one reading into zero or more anomalies.
///
/// Unavailable readings only matter for the gateway source (an unreachable
/// gateway probe is the anomaly); for every other source an unavailable
/// probe is a probe problem, not a system anomaly.
pub fn classify_reading(reading: &Reading) -> Vec<Anomaly> {
    match reading.source_id.as_str() {
        "heal.disk" => classify_disk(reading),
        "heal.memory" => classify_memory(reading),
        "heal.process" => classify_processes(reading),
        "heal.gateway" => classify_gateway(reading),
        "heal.braindb" => classify_braindb(reading),
        "heal.logbloat" => classify_logbloat(reading),
        "predict.signal" => classify_signal(reading),
        "predict.positions" => classify_positions(reading),
        "predict.pipeline" => classify_pipeline(reading),
        "fleet.heartbeat" => classify_fleet(reading),
        _ => Vec::new(),
    }
}

fn classify_disk(reading: &Reading) -> Vec<Anomaly> {
    let Some(usage) = reading.metric("usage_pct") else {
        return Vec::new();
    };
    let target = reading.text("mount").unwrap_or("/").to_string();
    if usage >= DISK_CRITICAL_PCT {
        vec![anomaly(AnomalyType::DiskCritical, target, Severity::Critical, reading)]
    } else if usage >= DISK_PRESSURE_PCT {
        vec![anomaly(AnomalyType::DiskPressure, target, Severity::High, reading)]
    } else {
        Vec::new()
    }
}

fn classify_memory(reading: &Reading) -> Vec<Anomaly> {
    let Some(usage) = reading.metric("usage_pct") else {
        return Vec::new();
    };
    if usage >= MEMORY_CRITICAL_PCT {
        vec![anomaly(AnomalyType::MemoryCritical, "system".to_string(), Severity::Critical, reading)]
    } else if usage >= MEMORY_PRESSURE_PCT {
        vec![anomaly(AnomalyType::MemoryPressure, "system".to_string(), Severity::Medium, reading)]
    } else {
        Vec::new()
    }
}

fn classify_processes(reading: &Reading) -> Vec<Anomaly> {
    let Some(processes) = reading.data.as_ref().and_then(|d| d.get("processes")).and_then(|p| p.as_array())
    else {
        return Vec::new();
    };
    processes
        .iter()
        .filter_map(|process| {
            let name = process.get("name")?.as_str()?.to_string();
            match process.get("status")?.as_str()? {
                "dead" => Some(anomaly(AnomalyType::ProcessDead, name, Severity::High, reading)),
                "zombie" => Some(anomaly(AnomalyType::ProcessZombie, name, Severity::Medium, reading)),
                _ => None,
            }
        })
        .collect()
}

fn classify_gateway(reading: &Reading) -> Vec<Anomaly> {
    let unreachable = !reading.available
        || reading
            .data
            .as_ref()
            .and_then(|d| d.get("reachable"))
            .and_then(|r| r.as_bool())
            == Some(false);
    if unreachable {
        let target = reading.text("endpoint").unwrap_or("gateway").to_string();
        vec![anomaly(AnomalyType::GatewayUnresponsive, target, Severity::High, reading)]
    } else {
        Vec::new()
    }
}

fn classify_braindb(reading: &Reading) -> Vec<Anomaly> {
    let corrupt = reading
        .data
        .as_ref()
        .and_then(|d| d.get("integrity_ok"))
        .and_then(|v| v.as_bool())
        == Some(false);
    if corrupt {
        vec![anomaly(AnomalyType::DbCorruption, "brain-db".to_string(), Severity::Critical, reading)]
    } else {
        Vec::new()
    }
}

fn classify_logbloat(reading: &Reading) -> Vec<Anomaly> {
    let Some(total_mb) = reading.metric("total_mb") else {
        return Vec::new();
    };
    if total_mb >= LOG_BLOAT_MB {
        let target = reading.text("dir").unwrap_or("logs").to_string();
        vec![anomaly(AnomalyType::LogBloat, target, Severity::Low, reading)]
    } else {
        Vec::new()
    }
}

fn classify_signal(reading: &Reading) -> Vec<Anomaly> {
    let (Some(age_ms), Some(freshness_ms)) =
        (reading.metric("age_ms"), reading.metric("freshness_ms"))
    else {
        return Vec::new();
    };
    if age_ms > freshness_ms {
        let target = reading.text("signal").unwrap_or("signal").to_string();
        vec![anomaly(AnomalyType::SignalStale, target, Severity::Medium, reading)]
    } else {
        Vec::new()
    }
}

fn classify_positions(reading: &Reading) -> Vec<Anomaly> {
    let phantom = reading
        .data
        .as_ref()
        .and_then(|d| d.get("phantom"))
        .and_then(|v| v.as_bool())
        == Some(true);
    if phantom {
        let target = reading.text("position").unwrap_or("positions").to_string();
        vec![anomaly(AnomalyType::PhantomPosition, target, Severity::High, reading)]
    } else {
        Vec::new()
    }
}

fn classify_pipeline(reading: &Reading) -> Vec<Anomaly> {
    let stalled = reading
        .data
        .as_ref()
        .and_then(|d| d.get("stalled"))
        .and_then(|v| v.as_bool())
        == Some(true);
    if stalled {
        let target = reading.text("pipeline").unwrap_or("pipeline").to_string();
        vec![anomaly(AnomalyType::PipelineStuck, target, Severity::High, reading)]
    } else {
        Vec::new()
    }
}

fn classify_fleet(reading: &Reading) -> Vec<Anomaly> {
    let Some(hosts) = reading
        .data
        .as_ref()
        .and_then(|d| d.get("unreachable"))
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };
    hosts
        .iter()
        .filter_map(|host| host.as_str())
        .map(|host| anomaly(AnomalyType::FleetUnreachable, host.to_string(), Severity::High, reading))
        .collect()
}

fn anomaly(
    anomaly_type: AnomalyType,
    target_id: String,
    severity: Severity,
    reading: &Reading,
) -> Anomaly {
    Anomaly {
        anomaly_type,
        target_id,
        severity,
        details: reading.data.clone().unwrap_or_else(|| json!({})),
    }
}
