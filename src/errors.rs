use std::fmt;

/// Typed failures of reconciliation and orchestration.
///
/// Carried inside `anyhow::Error` and recovered with `downcast_ref` where a
/// caller needs to tell them apart (HTTP status mapping, per-device reports).
#[derive(Debug, Clone, PartialEq)]
pub enum FabricError {
    /// An observed or requested value lies outside the configured pool
    RangeViolation { device: String, message: String },
    /// The ledger disagrees with what a link or device claims
    ConflictViolation { device: String, message: String },
    /// Advisory topology problem
    TopologyAnomaly(String),
    /// Login or transport failure towards a device
    DeviceSession { host: String, message: String },
    /// A configuration push rejected by the device
    StageApply { host: String, stage: String, message: String },
    SpeedIncompatibility(String),
    ModelIncompatibility(String),
    /// A request that can never succeed as submitted
    InvalidRequest(String),
    /// The engine lost track of a run's outcome
    Orchestration(String),
}

impl FabricError {
    pub fn range(device: &str, message: impl Into<String>) -> Self {
        FabricError::RangeViolation { device: device.to_string(), message: message.into() }
    }

    pub fn conflict(device: &str, message: impl Into<String>) -> Self {
        FabricError::ConflictViolation { device: device.to_string(), message: message.into() }
    }

    pub fn session(host: &str, message: impl Into<String>) -> Self {
        FabricError::DeviceSession { host: host.to_string(), message: message.into() }
    }

    /// Errors caused by the request or the device state rather than by the service
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FabricError::RangeViolation { .. }
                | FabricError::ConflictViolation { .. }
                | FabricError::InvalidRequest(_)
        )
    }
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FabricError::RangeViolation { message, .. } => write!(f, "{}", message),
            FabricError::ConflictViolation { message, .. } => write!(f, "{}", message),
            FabricError::TopologyAnomaly(message) => write!(f, "{}", message),
            FabricError::DeviceSession { host, message } => {
                write!(f, "session to {} failed: {}", host, message)
            }
            FabricError::StageApply { host, stage, message } => {
                write!(f, "{} on {} failed: {}", stage, host, message)
            }
            FabricError::SpeedIncompatibility(message) => write!(f, "{}", message),
            FabricError::ModelIncompatibility(message) => write!(f, "{}", message),
            FabricError::InvalidRequest(message) => write!(f, "{}", message),
            FabricError::Orchestration(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for FabricError {}
