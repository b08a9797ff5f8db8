// Runtime layer: hook dispatch, gating, sessions, self-healing, trust.
// Background engines run as named threads with channel fan-out; pure
// decision logic lives in cortex-engine.

pub(crate) mod capture;
pub(crate) mod config;
pub(crate) mod gate;
pub(crate) mod healing;
pub(crate) mod polling;
pub(crate) mod runtime;
pub(crate) mod session;
pub(crate) mod telemetry;
pub(crate) mod tools;
pub(crate) mod trust;

mod error;

pub use config::{
    CortexConfig, PreActionConfig, SelfHealingConfig, SessionPersistenceConfig, TrustConfig,
    resolve_workspace_path,
};
pub use error::{Error, Result};
pub use gate::{GateOutcome, PreActionGate};
pub use healing::{
    BrainDbProbe, DiskProbe, EscalationRouter, GatewayProbe, LogBloatProbe, MemoryProbe,
    ProcessProbe, RunbookRegistry, SelfHealingEngine, SignalCliSender, SignalSender, StepRunner,
    SubprocessRunner, classify_reading, tier_for_severity,
};
pub use polling::{DataSourceAdapter, MockAdapter, PollingEngine};
pub use runtime::{Cortex, HealingHandles};
pub use session::{RestoredContext, SessionManager, score_session};
pub use telemetry::{Telemetry, init_tracing};
pub use tools::{ContentBlock, ToolResponse};
pub use trust::{
    Classification, TrustEvaluation, TrustGate, classify_action, detect_correction, ewma_update,
    gate_decision, params_hash, params_summary, redact,
};
