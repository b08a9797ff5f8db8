use cortex_store::NewMemory;
use cortex_types::MemorySource;
use serde_json::{Value, json};

use super::{ToolResponse, arg_bool, require_str};
use crate::runtime::Cortex;

/// Operator surface for the self-healing engine.
pub fn heal(cortex: &Cortex, args: &Value) -> ToolResponse {
    let action = match require_str(args, "action") {
        Ok(action) => action,
        Err(resp) => return resp,
    };

    // record_fix works without the engine; everything else needs it
    if action == "record_fix" {
        return record_fix(cortex, args);
    }

    let healing = cortex.healing.lock().expect("healing handle poisoned");
    let Some(engine) = healing.as_ref() else {
        return ToolResponse::with_details(
            "Self-healing is not enabled",
            json!({"error": "unavailable"}),
        );
    };

    match action {
        "status" => match engine.open_incidents() {
            Ok(incidents) if incidents.is_empty() => {
                ToolResponse::with_details("No open incidents", json!({"count": 0}))
            }
            Ok(incidents) => {
                let lines: Vec<String> = incidents
                    .iter()
                    .map(|i| {
                        format!(
                            "[{}] {} on '{}' ({}, {})",
                            &i.id[..8],
                            i.anomaly_type.as_str(),
                            i.target_id,
                            i.severity.as_str(),
                            i.state.as_str()
                        )
                    })
                    .collect();
                ToolResponse::with_details(
                    lines.join("\n"),
                    json!({
                        "count": incidents.len(),
                        "ids": incidents.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
                    }),
                )
            }
            Err(err) => err.into(),
        },
        "list_runbooks" => {
            let runbooks = engine.registry().list();
            let lines: Vec<String> = runbooks
                .iter()
                .map(|(def, state)| {
                    format!(
                        "{}: {} [{}, confidence {:.2}, {} dry runs]",
                        def.id,
                        def.label,
                        state.mode.as_str(),
                        state.confidence,
                        state.dry_run_count
                    )
                })
                .collect();
            ToolResponse::with_details(
                lines.join("\n"),
                json!({"count": runbooks.len()}),
            )
        }
        "approve" => {
            let runbook_id = match require_str(args, "runbook_id") {
                Ok(id) => id,
                Err(resp) => return resp,
            };
            match engine.registry().approve(runbook_id) {
                Ok(true) => ToolResponse::with_details(
                    format!("Runbook '{}' approved for auto-execute", runbook_id),
                    json!({"runbook_id": runbook_id, "mode": "auto_execute"}),
                ),
                Ok(false) => ToolResponse::with_details(
                    format!("Unknown runbook '{}'", runbook_id),
                    json!({"error": "not_found"}),
                ),
                Err(err) => err.into(),
            }
        }
        "dry_run" => {
            let runbook_id = match require_str(args, "runbook_id") {
                Ok(id) => id,
                Err(resp) => return resp,
            };
            match engine.dry_run_runbook(runbook_id) {
                Some(steps) => ToolResponse::with_details(
                    steps.join("\n"),
                    json!({"runbook_id": runbook_id, "steps": steps.len()}),
                ),
                None => ToolResponse::with_details(
                    format!("Unknown runbook '{}'", runbook_id),
                    json!({"error": "not_found"}),
                ),
            }
        }
        "execute" => {
            if arg_bool(args, "confirm") != Some(true) {
                return ToolResponse::with_details(
                    "Execution requires confirm=true",
                    json!({"error": "forbidden"}),
                );
            }
            let runbook_id = match require_str(args, "runbook_id") {
                Ok(id) => id,
                Err(resp) => return resp,
            };
            match engine.execute_runbook(runbook_id) {
                Ok(results) => ToolResponse::with_details(
                    results.join("\n"),
                    json!({"runbook_id": runbook_id, "steps": results.len()}),
                ),
                Err(err) => err.into(),
            }
        }
        "dismiss" => {
            let incident_id = match require_str(args, "incident_id") {
                Ok(id) => id,
                Err(resp) => return resp,
            };
            match engine.dismiss(incident_id) {
                Ok(incident) => ToolResponse::with_details(
                    format!(
                        "Dismissed incident {} until {}",
                        &incident.id[..8],
                        incident
                            .dismiss_until
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_default()
                    ),
                    json!({"incident_id": incident.id}),
                ),
                Err(err) => err.into(),
            }
        }
        other => ToolResponse::with_details(
            format!("Unknown heal action '{}'", other),
            json!({"error": "validation_error"}),
        ),
    }
}

fn record_fix(cortex: &Cortex, args: &Value) -> ToolResponse {
    let description = match require_str(args, "description") {
        Ok(description) => description,
        Err(resp) => return resp,
    };
    let new = NewMemory::new(format!("manual fix: {}", description))
        .with_categories(vec!["process".to_string(), "gotchas".to_string()])
        .with_source(MemorySource::User);
    match cortex.store.lock().expect("store mutex poisoned").add_memory(new) {
        Ok(memory) => {
            cortex.sync_index();
            ToolResponse::with_details(
                format!("Recorded fix as memory {}", &memory.id[..8]),
                json!({"memory_id": memory.id}),
            )
        }
        Err(err) => err.into(),
    }
}
