use crate::utils::model_type;

/// Switch platform families, keyed by the type prefix of the model string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Avalanche,
    Cedar,
    Freedom,
    Orca,
    OrcaT,
}

impl Platform {
    pub fn from_model(model: &str) -> Option<Self> {
        match model_type(model) {
            "4000" => Some(Platform::Avalanche),
            "3000" => Some(Platform::Cedar),
            "3001" => Some(Platform::Freedom),
            "3006" => Some(Platform::Orca),
            "3007" => Some(Platform::OrcaT),
            _ => None,
        }
    }

    /// Routing platforms use the routing MCT port-channel
    pub fn is_routing(&self) -> bool {
        matches!(self, Platform::Avalanche | Platform::Orca | Platform::OrcaT)
    }
}

pub fn is_routing_device(model: &str) -> bool {
    Platform::from_model(model).map(|p| p.is_routing()).unwrap_or(false)
}

/// Whether two models can form an MCT cluster.
/// Avalanche, Freedom and Cedar pair only with the same type; Orca and
/// Orca-T pair with each other.
pub fn mct_compatible(model_a: &str, model_b: &str) -> bool {
    match (Platform::from_model(model_a), Platform::from_model(model_b)) {
        (Some(Platform::Orca | Platform::OrcaT), Some(Platform::Orca | Platform::OrcaT)) => true,
        (Some(a @ (Platform::Avalanche | Platform::Freedom | Platform::Cedar)), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mct_compatibility_table() {
        assert!(mct_compatible("3001_20.2.3", "3001_20.1.1"));
        assert!(!mct_compatible("3001_20.2.3", "3000_20.2.3"));
        assert!(mct_compatible("3006_20.1", "3007_20.1"));
        assert!(!mct_compatible("4000_20.1", "3006_20.1"));
        assert!(!mct_compatible("2000_20.1", "2000_20.1"));
        assert!(!mct_compatible("", ""));
    }

    #[test]
    fn test_routing_platforms() {
        assert!(is_routing_device("4000_20.1"));
        assert!(is_routing_device("3007_20.1"));
        assert!(!is_routing_device("3001_20.1"));
        assert!(!is_routing_device("unknown"));
    }
}
