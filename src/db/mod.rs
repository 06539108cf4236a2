mod clusters;
mod configs;
mod devices;
mod fabrics;
mod interfaces;
mod ledger;
pub(crate) mod row_helpers;

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use crate::models::*;

pub use clusters::ClusterRepo;
pub use configs::{BgpNeighborRepo, InterfaceConfigRepo, SwitchConfigRepo};
pub use devices::{DeviceRepo, RackRepo};
pub use fabrics::FabricRepo;
pub use interfaces::{InterfaceRepo, LldpRepo};
pub use ledger::{AsnEntry, IpEntry, LedgerRepo};

/// Typed error for "resource not found" so the API error handler can
/// downcast instead of matching on strings.
#[derive(Debug)]
pub struct NotFoundError {
    pub resource: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not found: {}", self.resource, self.id)
    }
}

impl std::error::Error for NotFoundError {}

/// Tables whose rows carry a single config_type tag
const TAGGED_TABLES: &[&str] = &[
    "interface_configs",
    "bgp_neighbors",
    "lldp_neighbors",
    "mct_member_ports",
    "mct_clusters",
];

/// Store handles all database operations, delegating to per-entity repo modules.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Create a new database store with a specific pool size
    pub async fn with_pool_size(db_path: &str, max_connections: u32) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database; a single connection keeps every caller on the same schema
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    // ========== Fabric Operations ==========

    pub async fn list_fabrics(&self) -> Result<Vec<Fabric>> {
        FabricRepo::list(&self.pool).await
    }

    pub async fn get_fabric_by_name(&self, name: &str) -> Result<Option<Fabric>> {
        FabricRepo::get_by_name(&self.pool, name).await
    }

    pub async fn get_fabric_settings(&self, fabric_id: i64) -> Result<FabricSettings> {
        FabricRepo::get_settings(&self.pool, fabric_id).await
    }

    pub async fn create_fabric(&self, name: &str, fabric_type: &str, settings: &FabricSettings) -> Result<Fabric> {
        FabricRepo::create(&self.pool, name, fabric_type, settings).await
    }

    pub async fn update_fabric_settings(&self, fabric_id: i64, settings: &FabricSettings) -> Result<()> {
        FabricRepo::update_settings(&self.pool, fabric_id, settings).await
    }

    pub async fn delete_fabric(&self, fabric_id: i64) -> Result<()> {
        FabricRepo::delete(&self.pool, fabric_id).await
    }

    // ========== Device Operations ==========

    pub async fn list_devices(&self, fabric_id: i64) -> Result<Vec<Device>> {
        DeviceRepo::list(&self.pool, fabric_id).await
    }

    pub async fn get_device(&self, id: i64) -> Result<Option<Device>> {
        DeviceRepo::get(&self.pool, id).await
    }

    pub async fn get_device_by_ip(&self, ip: &str) -> Result<Option<Device>> {
        DeviceRepo::get_by_ip(&self.pool, ip).await
    }

    pub async fn upsert_device(
        &self,
        fabric_id: i64,
        ip: &str,
        user_name: &str,
        password: &str,
        role: &str,
    ) -> Result<Device> {
        DeviceRepo::upsert(&self.pool, fabric_id, ip, user_name, password, role).await
    }

    pub async fn update_device_detail(&self, id: i64, detail: &DeviceDetail) -> Result<()> {
        DeviceRepo::update_detail(&self.pool, id, detail).await
    }

    pub async fn delete_device(&self, id: i64) -> Result<()> {
        DeviceRepo::delete(&self.pool, id).await
    }

    pub async fn list_racks(&self, fabric_id: i64) -> Result<Vec<Rack>> {
        RackRepo::list(&self.pool, fabric_id).await
    }

    pub async fn create_rack(&self, fabric_id: i64, one: &Device, two: &Device) -> Result<Rack> {
        RackRepo::create(&self.pool, fabric_id, one, two).await
    }

    // ========== Discovery Snapshot Operations ==========

    pub async fn list_interfaces(&self, fabric_id: i64) -> Result<Vec<Interface>> {
        InterfaceRepo::list(&self.pool, fabric_id).await
    }

    pub async fn list_device_interfaces(&self, device_id: i64) -> Result<Vec<Interface>> {
        InterfaceRepo::list_by_device(&self.pool, device_id).await
    }

    pub async fn sync_interfaces(
        &self,
        fabric_id: i64,
        device_id: i64,
        discovered: &[DiscoveredInterface],
    ) -> Result<Vec<Interface>> {
        InterfaceRepo::sync(&self.pool, fabric_id, device_id, discovered).await
    }

    pub async fn list_lldp_records(&self, fabric_id: i64) -> Result<Vec<(i64, AdjacencyRecord)>> {
        LldpRepo::list_records(&self.pool, fabric_id).await
    }

    pub async fn replace_lldp_records(&self, fabric_id: i64, device_id: i64, records: &[AdjacencyRecord]) -> Result<()> {
        LldpRepo::replace_records(&self.pool, fabric_id, device_id, records).await
    }

    pub async fn list_lldp_neighbors(&self, fabric_id: i64) -> Result<Vec<LldpNeighbor>> {
        LldpRepo::list_neighbors(&self.pool, fabric_id).await
    }

    pub async fn upsert_lldp_neighbor(&self, link: &LldpNeighbor) -> Result<()> {
        LldpRepo::upsert_neighbor(&self.pool, link).await
    }

    // ========== Config Operations ==========

    pub async fn list_switch_configs(&self, fabric_id: i64) -> Result<Vec<SwitchConfig>> {
        SwitchConfigRepo::list(&self.pool, fabric_id).await
    }

    pub async fn get_switch_config(&self, device_id: i64) -> Result<Option<SwitchConfig>> {
        SwitchConfigRepo::get(&self.pool, device_id).await
    }

    pub async fn upsert_switch_config(&self, cfg: &SwitchConfig) -> Result<()> {
        SwitchConfigRepo::upsert(&self.pool, cfg).await
    }

    pub async fn list_interface_configs(&self, fabric_id: i64) -> Result<Vec<InterfaceConfig>> {
        InterfaceConfigRepo::list(&self.pool, fabric_id).await
    }

    pub async fn list_device_interface_configs(&self, device_id: i64) -> Result<Vec<InterfaceConfig>> {
        InterfaceConfigRepo::list_by_device(&self.pool, device_id).await
    }

    pub async fn upsert_interface_config(&self, cfg: &InterfaceConfig) -> Result<()> {
        InterfaceConfigRepo::upsert(&self.pool, cfg).await
    }

    pub async fn set_interface_config_type(&self, id: i64, config_type: ConfigType) -> Result<()> {
        InterfaceConfigRepo::set_config_type(&self.pool, id, config_type).await
    }

    pub async fn list_bgp_neighbors(&self, fabric_id: i64) -> Result<Vec<BgpNeighborConfig>> {
        BgpNeighborRepo::list(&self.pool, fabric_id).await
    }

    pub async fn list_device_bgp_neighbors(&self, device_id: i64) -> Result<Vec<BgpNeighborConfig>> {
        BgpNeighborRepo::list_by_device(&self.pool, device_id).await
    }

    pub async fn upsert_bgp_neighbor(&self, cfg: &BgpNeighborConfig) -> Result<()> {
        BgpNeighborRepo::upsert(&self.pool, cfg).await
    }

    pub async fn set_bgp_neighbor_config_type(&self, id: i64, config_type: ConfigType) -> Result<()> {
        BgpNeighborRepo::set_config_type(&self.pool, id, config_type).await
    }

    // ========== Ledger Operations ==========

    pub async fn list_used_asns(&self, fabric_id: i64) -> Result<Vec<AsnEntry>> {
        LedgerRepo::list_asns(&self.pool, fabric_id).await
    }

    pub async fn get_used_asn(&self, device_id: i64) -> Result<Option<u64>> {
        LedgerRepo::get_asn(&self.pool, device_id).await
    }

    pub async fn set_used_asn(&self, fabric_id: i64, device_id: i64, role: &str, asn: u64) -> Result<()> {
        LedgerRepo::set_asn(&self.pool, fabric_id, device_id, role, asn).await
    }

    pub async fn release_used_asn(&self, device_id: i64) -> Result<()> {
        LedgerRepo::release_asn(&self.pool, device_id).await
    }

    pub async fn list_used_ips(&self, fabric_id: i64) -> Result<Vec<IpEntry>> {
        LedgerRepo::list_ips(&self.pool, fabric_id).await
    }

    pub async fn get_used_ip(&self, device_id: i64, ip_type: &str) -> Result<Option<String>> {
        LedgerRepo::get_ip(&self.pool, device_id, ip_type).await
    }

    pub async fn set_used_ip(&self, fabric_id: i64, device_id: i64, ip_type: &str, ip: &str) -> Result<()> {
        LedgerRepo::set_ip(&self.pool, fabric_id, device_id, ip_type, ip).await
    }

    pub async fn release_used_ip(&self, device_id: i64, ip_type: &str) -> Result<()> {
        LedgerRepo::release_ip(&self.pool, device_id, ip_type).await
    }

    pub async fn list_used_ip_pairs(&self, fabric_id: i64, ip_type: &str) -> Result<Vec<UsedIpPair>> {
        LedgerRepo::list_pairs(&self.pool, fabric_id, ip_type).await
    }

    pub async fn insert_used_ip_pair(&self, pair: &UsedIpPair) -> Result<i64> {
        LedgerRepo::insert_pair(&self.pool, pair).await
    }

    pub async fn delete_used_ip_pair(&self, id: i64) -> Result<()> {
        LedgerRepo::delete_pair(&self.pool, id).await
    }

    pub async fn release_device_ledger(&self, device_id: i64) -> Result<()> {
        LedgerRepo::release_device(&self.pool, device_id).await
    }

    // ========== Cluster Operations ==========

    pub async fn list_clusters(&self, fabric_id: i64) -> Result<Vec<MctCluster>> {
        ClusterRepo::list(&self.pool, fabric_id).await
    }

    pub async fn next_cluster_id(&self, fabric_id: i64) -> Result<i64> {
        ClusterRepo::next_cluster_id(&self.pool, fabric_id).await
    }

    pub async fn create_cluster(&self, cluster: &MctCluster) -> Result<MctCluster> {
        ClusterRepo::create(&self.pool, cluster).await
    }

    pub async fn update_cluster(&self, cluster: &MctCluster) -> Result<()> {
        ClusterRepo::update(&self.pool, cluster).await
    }

    pub async fn delete_cluster(&self, id: i64) -> Result<()> {
        ClusterRepo::delete(&self.pool, id).await
    }

    pub async fn list_member_ports(&self, fabric_id: i64) -> Result<Vec<MctMemberPort>> {
        ClusterRepo::list_member_ports(&self.pool, fabric_id).await
    }

    pub async fn upsert_member_port(&self, port: &MctMemberPort) -> Result<()> {
        ClusterRepo::upsert_member_port(&self.pool, port).await
    }

    /// Forget everything derived for a device so the next run starts over.
    /// The device row, its interfaces and adjacency records are kept.
    pub async fn flush_device_state(&self, device_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (table, filter) in [
            ("switch_configs", "device_id = ?1"),
            ("interface_configs", "device_id = ?1"),
            ("bgp_neighbors", "device_id = ?1 OR remote_device_id = ?1"),
            ("lldp_neighbors", "device_one_id = ?1 OR device_two_id = ?1"),
            ("mct_member_ports", "device_id = ?1 OR remote_device_id = ?1"),
            ("mct_clusters", "device_one_id = ?1 OR device_two_id = ?1"),
            ("used_asns", "device_id = ?1"),
            ("used_ips", "device_id = ?1"),
            ("used_ip_pairs", "device_one_id = ?1 OR device_two_id = ?1"),
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE {}", table, filter))
                .bind(device_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.context("Failed to commit device flush")?;
        Ok(())
    }

    // ========== Post-configure Cleanup ==========

    /// Confirm a successful push: pending tags become None, rows tagged
    /// Delete are dropped and cluster bitmaps reset. The ledger is untouched.
    pub async fn cleanup_fabric(&self, fabric_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for column in ["as_config_type", "loopback_config_type", "vtep_loopback_config_type"] {
            sqlx::query(&format!(
                "UPDATE switch_configs SET {col} = 'none' WHERE fabric_id = ? AND {col} IN ('create', 'update')",
                col = column
            ))
            .bind(fabric_id)
            .execute(&mut *tx)
            .await?;
        }

        for table in TAGGED_TABLES {
            sqlx::query(&format!("DELETE FROM {} WHERE fabric_id = ? AND config_type = 'delete'", table))
                .bind(fabric_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!(
                "UPDATE {} SET config_type = 'none' WHERE fabric_id = ? AND config_type IN ('create', 'update')",
                table
            ))
            .bind(fabric_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE mct_clusters SET operation_bitmap = 0 WHERE fabric_id = ?")
            .bind(fabric_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.context("Failed to commit cleanup")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (Store, Fabric, Device) {
        let store = Store::in_memory().await.unwrap();
        let fabric = store
            .create_fabric("default", fabric_type::CLOS, &FabricSettings::default())
            .await
            .unwrap();
        let device = store
            .upsert_device(fabric.id, "10.24.39.224", "admin", "password", device_role::LEAF)
            .await
            .unwrap();
        (store, fabric, device)
    }

    #[tokio::test]
    async fn test_fabric_settings_round_trip() {
        let (store, fabric, _) = seeded().await;
        let mut settings = store.get_fabric_settings(fabric.id).await.unwrap();
        assert_eq!(settings, FabricSettings::default());

        settings.leaf_asn_block = "65100-65200".to_string();
        store.update_fabric_settings(fabric.id, &settings).await.unwrap();
        let loaded = store.get_fabric_settings(fabric.id).await.unwrap();
        assert_eq!(loaded.leaf_asn_block, "65100-65200");
    }

    #[tokio::test]
    async fn test_missing_fabric_is_not_found() {
        let store = Store::in_memory().await.unwrap();
        let err = store.get_fabric_settings(42).await.unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_interface_sync_keeps_ids() {
        let (store, fabric, device) = seeded().await;
        let first = store
            .sync_interfaces(fabric.id, device.id, &[
                DiscoveredInterface { int_type: "ethernet".into(), int_name: "0/1".into(), mac: "AA:BB:CC:00:00:01".into(), speed: 10_000_000_000, ..Default::default() },
                DiscoveredInterface { int_type: "ethernet".into(), int_name: "0/2".into(), mac: "aa:bb:cc:00:00:02".into(), speed: 10_000_000_000, ..Default::default() },
            ])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].mac, "aa:bb:cc:00:00:01");

        let second = store
            .sync_interfaces(fabric.id, device.id, &[
                DiscoveredInterface { int_type: "ethernet".into(), int_name: "0/1".into(), mac: "aa:bb:cc:00:00:01".into(), ip_address: "10.10.10.2/31".into(), speed: 10_000_000_000 },
            ])
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].ip_address, "10.10.10.2/31");
    }

    #[tokio::test]
    async fn test_cleanup_confirms_pending_rows() {
        let (store, fabric, device) = seeded().await;
        store
            .upsert_switch_config(&SwitchConfig {
                fabric_id: fabric.id,
                device_id: device.id,
                role: device_role::LEAF.into(),
                local_as: "65000".into(),
                as_config_type: ConfigType::Create,
                loopback_ip: "172.31.254.1".into(),
                loopback_config_type: ConfigType::Update,
                ..Default::default()
            })
            .await
            .unwrap();
        for (ip, tag) in [("10.10.10.3", ConfigType::Create), ("10.10.10.5", ConfigType::Delete)] {
            store
                .upsert_bgp_neighbor(&BgpNeighborConfig {
                    fabric_id: fabric.id,
                    device_id: device.id,
                    remote_ip: ip.into(),
                    remote_as: "64512".into(),
                    neighbor_class: neighbor_class::FABRIC.into(),
                    config_type: tag,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        store.cleanup_fabric(fabric.id).await.unwrap();

        let cfg = store.get_switch_config(device.id).await.unwrap().unwrap();
        assert_eq!(cfg.as_config_type, ConfigType::None);
        assert_eq!(cfg.loopback_config_type, ConfigType::None);
        let neighbors = store.list_device_bgp_neighbors(device.id).await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].remote_ip, "10.10.10.3");
        assert_eq!(neighbors[0].config_type, ConfigType::None);
    }

    #[tokio::test]
    async fn test_flush_device_state_keeps_device() {
        let (store, fabric, device) = seeded().await;
        store
            .upsert_switch_config(&SwitchConfig {
                fabric_id: fabric.id,
                device_id: device.id,
                role: device_role::LEAF.into(),
                local_as: "65000".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store.set_used_asn(fabric.id, device.id, device_role::LEAF, 65000).await.unwrap();

        store.flush_device_state(device.id).await.unwrap();

        assert!(store.get_switch_config(device.id).await.unwrap().is_none());
        assert!(store.get_used_asn(device.id).await.unwrap().is_none());
        assert!(store.get_device(device.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_device_delete_cascades_ledger() {
        let (store, fabric, device) = seeded().await;
        store.set_used_asn(fabric.id, device.id, device_role::LEAF, 65000).await.unwrap();
        store.set_used_ip(fabric.id, device.id, ip_type::LOOPBACK, "172.31.254.1").await.unwrap();
        store.delete_device(device.id).await.unwrap();
        assert!(store.list_used_asns(fabric.id).await.unwrap().is_empty());
        assert!(store.list_used_ips(fabric.id).await.unwrap().is_empty());
    }
}
