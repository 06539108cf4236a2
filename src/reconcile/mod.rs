//! Reconciliation classifier.
//!
//! Every configurable entity is tagged by comparing three values: what the
//! device reports now, what was last persisted for it, and what the fabric
//! wants it to be.

pub mod compare;
pub mod intent;

use crate::models::ConfigType;

pub use compare::{compare, tag_delta, Delta, Tagged};

/// Tag an entity from its observed, persisted and desired values.
///
/// * nothing persisted: None when the device already shows the desired
///   value (it is adopted), otherwise Create
/// * persisted equals desired: None when observed matches, Create when the
///   device shows nothing (lost configuration is re-pushed), Update when
///   the device shows something else
/// * persisted differs from desired: Update
pub fn classify(observed: &str, persisted: Option<&str>, desired: &str) -> ConfigType {
    let observed = observed.trim();
    match persisted.filter(|p| !p.is_empty()) {
        None if observed == desired => ConfigType::None,
        None => ConfigType::Create,
        Some(p) if p == desired => {
            if observed == desired {
                ConfigType::None
            } else if observed.is_empty() {
                ConfigType::Create
            } else {
                ConfigType::Update
            }
        }
        Some(_) => ConfigType::Update,
    }
}

/// Tag an entity that has no observed counterpart on the device.
/// Pending tags survive until a successful push is confirmed.
pub fn carry_tag(previous: Option<ConfigType>, changed: bool) -> ConfigType {
    match previous {
        None | Some(ConfigType::Delete) => ConfigType::Create,
        Some(ConfigType::Create) => ConfigType::Create,
        Some(ConfigType::Update) => ConfigType::Update,
        Some(ConfigType::None) if changed => ConfigType::Update,
        Some(ConfigType::None) => ConfigType::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_first_discovery() {
        assert_eq!(classify("", None, "65000"), ConfigType::Create);
        assert_eq!(classify("65000", None, "65000"), ConfigType::None);
        assert_eq!(classify("65001", None, "65000"), ConfigType::Create);
    }

    #[test]
    fn test_classify_with_history() {
        assert_eq!(classify("65000", Some("65000"), "65000"), ConfigType::None);
        assert_eq!(classify("", Some("172.31.254.1"), "172.31.254.1"), ConfigType::Create);
        assert_eq!(classify("65003", Some("65000"), "65000"), ConfigType::Update);
        assert_eq!(classify("65003", Some("65000"), "65003"), ConfigType::Update);
        assert_eq!(classify("", Some(""), "65000"), ConfigType::Create);
    }

    #[test]
    fn test_carry_tag() {
        assert_eq!(carry_tag(None, false), ConfigType::Create);
        assert_eq!(carry_tag(Some(ConfigType::None), false), ConfigType::None);
        assert_eq!(carry_tag(Some(ConfigType::None), true), ConfigType::Update);
        assert_eq!(carry_tag(Some(ConfigType::Create), true), ConfigType::Create);
        assert_eq!(carry_tag(Some(ConfigType::Delete), false), ConfigType::Create);
    }
}
