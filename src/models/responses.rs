use serde::{Deserialize, Serialize};
use std::fmt;

use super::RackPair;

/// OperationError records one failed operation against one host.
/// Once emitted it is only ever appended to a result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub operation: String,
    pub error: String,
    pub host: String,
}

impl OperationError {
    pub fn new(operation: impl Into<String>, error: impl fmt::Display, host: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            error: error.to_string(),
            host: host.into(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Host={},Operation={},Error={}}}", self.host, self.operation, self.error)
    }
}

/// Per-device outcome of AddDevices/AddRacks/DeleteDevices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddDeviceResponse {
    pub fabric_name: String,
    pub fabric_id: i64,
    pub ip_address: String,
    pub role: String,
    pub errors: Vec<String>,
}

impl AddDeviceResponse {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Advisory topology validation report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    pub fabric_name: String,
    pub fabric_id: i64,
    pub no_spines: bool,
    pub no_leaves: bool,
    pub missing_links: Vec<String>,
    pub spine_spine_links: Vec<String>,
    pub leaf_leaf_links: Vec<String>,
}

impl TopologyReport {
    pub fn is_clean(&self) -> bool {
        !self.no_spines
            && !self.no_leaves
            && self.missing_links.is_empty()
            && self.spine_spine_links.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigureFabricResponse {
    pub fabric_name: String,
    pub fabric_id: i64,
    pub errors: Vec<OperationError>,
}

/// AddDevicesRequest registers spines and leaves into a CLOS fabric
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddDevicesRequest {
    #[serde(default)]
    pub leaves: Vec<String>,
    #[serde(default)]
    pub spines: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub force: bool,
}

/// AddRacksRequest registers rack pairs into a non-CLOS fabric
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddRacksRequest {
    pub racks: Vec<RackPair>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteDevicesRequest {
    pub devices: Vec<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub device_cleanup: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigureFabricRequest {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequestQuery {
    #[serde(default)]
    pub force: bool,
}
