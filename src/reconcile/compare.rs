use std::collections::HashMap;
use std::hash::Hash;

use crate::models::*;

/// Outcome of comparing a persisted entity list against a freshly derived one.
/// `updated` and `unchanged` carry (old, new) so callers can keep row ids.
#[derive(Debug)]
pub struct Delta<T> {
    pub created: Vec<T>,
    pub deleted: Vec<T>,
    pub updated: Vec<(T, T)>,
    pub unchanged: Vec<(T, T)>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            deleted: Vec::new(),
            updated: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

/// Match `new` against `old` by `key` and split into created, deleted,
/// updated and unchanged. Output order follows `new`, deletions follow `old`.
pub fn compare<T, K, F, E>(old: Vec<T>, new: Vec<T>, key: F, same: E) -> Delta<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
    E: Fn(&T, &T) -> bool,
{
    let mut delta = Delta::default();
    let mut previous: HashMap<K, T> = HashMap::new();
    let mut order = Vec::new();
    for item in old {
        let k = key(&item);
        order.push(key(&item));
        previous.insert(k, item);
    }

    for item in new {
        match previous.remove(&key(&item)) {
            None => delta.created.push(item),
            Some(prev) if same(&prev, &item) => delta.unchanged.push((prev, item)),
            Some(prev) => delta.updated.push((prev, item)),
        }
    }

    for k in order {
        if let Some(prev) = previous.remove(&k) {
            delta.deleted.push(prev);
        }
    }
    delta
}

/// Row types carrying a persisted id and a ConfigType tag
pub trait Tagged {
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn config_type(&self) -> ConfigType;
    fn set_config_type(&mut self, config_type: ConfigType);
}

macro_rules! impl_tagged {
    ($($ty:ty),*) => {
        $(impl Tagged for $ty {
            fn id(&self) -> i64 { self.id }
            fn set_id(&mut self, id: i64) { self.id = id; }
            fn config_type(&self) -> ConfigType { self.config_type }
            fn set_config_type(&mut self, config_type: ConfigType) { self.config_type = config_type; }
        })*
    };
}

impl_tagged!(InterfaceConfig, BgpNeighborConfig, MctMemberPort, LldpNeighbor);

/// Flatten a delta into rows ready to persist, tagging each one with
/// `super::carry_tag` and deleted rows with Delete.
pub fn tag_delta<T: Tagged>(delta: Delta<T>) -> Vec<T> {
    let mut out = Vec::new();
    for mut item in delta.created {
        item.set_config_type(ConfigType::Create);
        out.push(item);
    }
    for (prev, mut item) in delta.updated {
        item.set_id(prev.id());
        item.set_config_type(super::carry_tag(Some(prev.config_type()), true));
        out.push(item);
    }
    for (prev, mut item) in delta.unchanged {
        item.set_id(prev.id());
        item.set_config_type(super::carry_tag(Some(prev.config_type()), false));
        out.push(item);
    }
    for mut item in delta.deleted {
        item.set_config_type(ConfigType::Delete);
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(ip: &str, asn: &str, tag: ConfigType) -> BgpNeighborConfig {
        BgpNeighborConfig {
            remote_ip: ip.into(),
            remote_as: asn.into(),
            neighbor_class: neighbor_class::FABRIC.into(),
            config_type: tag,
            ..Default::default()
        }
    }

    #[test]
    fn test_compare_partitions() {
        let old = vec![
            neighbor("10.10.10.1", "64512", ConfigType::None),
            neighbor("10.10.10.3", "64512", ConfigType::None),
            neighbor("10.10.10.5", "64512", ConfigType::None),
        ];
        let new = vec![
            neighbor("10.10.10.1", "64512", ConfigType::None),
            neighbor("10.10.10.3", "64513", ConfigType::None),
            neighbor("10.10.10.7", "64512", ConfigType::None),
        ];
        let delta = compare(old, new, |n| n.remote_ip.clone(), |a, b| a.remote_as == b.remote_as);
        assert_eq!(delta.created.len(), 1);
        assert_eq!(delta.created[0].remote_ip, "10.10.10.7");
        assert_eq!(delta.deleted.len(), 1);
        assert_eq!(delta.deleted[0].remote_ip, "10.10.10.5");
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.unchanged.len(), 1);
    }

    #[test]
    fn test_tag_delta_carries_pending_tags() {
        let old = vec![
            neighbor("10.10.10.1", "64512", ConfigType::Create),
            neighbor("10.10.10.3", "64512", ConfigType::None),
            neighbor("10.10.10.5", "64512", ConfigType::None),
        ];
        let new = vec![
            neighbor("10.10.10.1", "64512", ConfigType::None),
            neighbor("10.10.10.3", "64512", ConfigType::None),
        ];
        let rows = tag_delta(compare(old, new, |n| n.remote_ip.clone(), |a, b| a.remote_as == b.remote_as));
        let tag_of = |ip: &str| rows.iter().find(|r| r.remote_ip == ip).map(|r| r.config_type);
        assert_eq!(tag_of("10.10.10.1"), Some(ConfigType::Create));
        assert_eq!(tag_of("10.10.10.3"), Some(ConfigType::None));
        assert_eq!(tag_of("10.10.10.5"), Some(ConfigType::Delete));
    }
}
