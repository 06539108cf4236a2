use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::Arc;
use tera::{Context, Tera};

use super::{
    AdapterFactory, ClusterStatus, DeviceAdapter, DeviceTarget, Platform, StageOp, StageRequest, OK_RESPONSE,
};
use crate::errors::FabricError;
use crate::models::*;
use crate::utils::{ssh_connect, ssh_exec, ssh_push_config};

const SYSTEM_PROPERTIES: &str = r#"
{% if teardown %}
{% if host.loopback_ip %}no interface Loopback {{ host.loopback_port_number }}{% endif %}
{% if edge and host.vtep_loopback_ip %}no interface Loopback {{ host.vtep_loopback_port_number }}{% endif %}
{% else %}
ip anycast-gateway-mac {{ settings.any_cast_mac }}
ipv6 anycast-gateway-mac {{ settings.ipv6_any_cast_mac }}
mac-address-table aging-time {{ settings.mac_aging_timeout }}
mac-address-table aging-time conversational {{ settings.mac_aging_conversational_timeout }}
mac-address-table mac-move limit {{ settings.mac_move_limit }}
ip arp aging-timeout {{ settings.arp_aging_timeout }}
{% if host.loopback_config_type != "none" %}
interface Loopback {{ host.loopback_port_number }}
 ip address {{ host.loopback_ip }}/32
 no shutdown
{% endif %}
{% if edge and host.vtep_loopback_config_type != "none" %}
interface Loopback {{ host.vtep_loopback_port_number }}
 ip address {{ host.vtep_loopback_ip }}/32
 no shutdown
{% endif %}
{% endif %}
"#;

const INTERFACES: &str = r#"
{% for i in host.interfaces %}
{% if teardown or i.config_type == "delete" %}
interface {{ i.int_type }} {{ i.int_name }}
{% if i.donor_type | default(value="") != "" %} no ip unnumbered {{ i.donor_type }} {{ i.donor_name }}{% else %} no ip address {{ i.ip_address }}{% endif %}
 no description
{% elif i.config_type != "none" %}
interface {{ i.int_type }} {{ i.int_name }}
 no switchport
 description {{ i.description }}
 mtu {{ settings.mtu }}
 ip mtu {{ settings.ip_mtu }}
{% if i.donor_type | default(value="") != "" %} ip unnumbered {{ i.donor_type }} {{ i.donor_name }}{% else %} ip address {{ i.ip_address }}{% endif %}
 no shutdown
{% endif %}
{% endfor %}
"#;

const MCT_NEIGHBORS: &str = r#"
{% set confirmed = host.mct_neighbors | filter(attribute="config_type", value="none") | length %}
{% if teardown or host.mct_neighbors | length > confirmed %}
router bgp
{% for n in host.mct_neighbors %}
{% if teardown or n.config_type == "delete" %}
 no neighbor {{ n.remote_ip }}
{% elif n.config_type != "none" %}
 neighbor {{ n.remote_ip }} remote-as {{ n.remote_as }}
 neighbor {{ n.remote_ip }} next-hop-self
 address-family l2vpn evpn
  neighbor {{ n.remote_ip }} encapsulation {{ n.encap_type }}
  neighbor {{ n.remote_ip }} activate
 exit-address-family
{% endif %}
{% endfor %}
{% endif %}
"#;

const BGP: &str = r#"
{% if teardown %}
no router bgp
{% else %}
router bgp
{% if host.as_config_type != "none" %}
 local-as {{ host.local_as }}
 capability as4-enable
 fast-external-fallover
{% endif %}
{% for n in host.bgp_neighbors %}
{% if n.config_type == "delete" %}
 no neighbor {{ n.remote_ip }}
{% elif n.config_type != "none" %}
 neighbor {{ n.remote_ip }} remote-as {{ n.remote_as }}
{% if settings.bfd_enable %} neighbor {{ n.remote_ip }} bfd{% endif %}
{% if n.neighbor_class == "evpn" %} neighbor {{ n.remote_ip }} ebgp-multihop {{ settings.bgp_multihop }}{% endif %}
{% endif %}
{% endfor %}
 address-family ipv4 unicast
  maximum-paths {{ settings.max_paths }}
{% if host.loopback_config_type != "none" %}  network {{ host.loopback_ip }}/32{% endif %}
{% if edge and host.vtep_loopback_config_type != "none" %}  network {{ host.vtep_loopback_ip }}/32{% endif %}
 exit-address-family
 address-family l2vpn evpn
{% for n in host.bgp_neighbors %}{% if n.encap_type and n.config_type != "none" and n.config_type != "delete" %}
  neighbor {{ n.remote_ip }} encapsulation {{ n.encap_type }}
  neighbor {{ n.remote_ip }} activate
{% if settings.allow_as_in != "0" %}  neighbor {{ n.remote_ip }} allowas-in {{ settings.allow_as_in }}{% endif %}
{% endif %}{% endfor %}
 exit-address-family
{% endif %}
"#;

const EVPN: &str = r#"
{% if teardown %}
no evpn
{% else %}
evpn
 route-target both auto ignore-as
 rd auto
 duplicate-mac-timer {{ settings.duplicate_mac_timer }} max-count {{ settings.duplicate_mac_timer_max_count }}
{% endif %}
"#;

const OVERLAY_GATEWAY: &str = r#"
{% if teardown %}
no overlay-gateway {{ fabric_name }}
{% elif host.configure_overlay_gateway %}
overlay-gateway {{ fabric_name }}
 type layer2-extension
 ip interface Loopback {{ host.vtep_loopback_port_number }}
{% if settings.vni_auto_map %} map vni auto{% endif %}
 activate
{% endif %}
"#;

const CLUSTER: &str = r#"
{% if op == "deconfigure" %}
no cluster {{ cluster.cluster_name }} {{ cluster.cluster_id }}
no interface Port-channel {{ node.peer_interface_name }}
no interface Ve {{ cluster.control_ve }}
no vlan {{ cluster.control_vlan }}
{% else %}
{% if op == "configure" or "control-ve" in bits %}
vlan {{ cluster.control_vlan }}
 router-interface Ve {{ cluster.control_ve }}
{% endif %}
{% if op == "configure" or "control-ve" in bits or "peer-ip" in bits %}
interface Ve {{ cluster.control_ve }}
 ip address {{ node.local_peer_ip }}
 no shutdown
{% endif %}
{% if op == "configure" or "peer-interface" in bits or "peer-speed" in bits %}
interface Port-channel {{ node.peer_interface_name }}
 speed {{ node.peer_interface_speed }}
 no shutdown
{% endif %}
{% for p in node.member_ports %}
{% if p.config_type == "delete" %}
interface {{ p.int_type }} {{ p.int_name }}
 no channel-group
{% elif op == "configure" or p.config_type != "none" %}
interface {{ p.int_type }} {{ p.int_name }}
 channel-group {{ node.peer_interface_name }} mode active type standard
 no shutdown
{% endif %}
{% endfor %}
{% if op == "configure" or "principal-priority" in bits %}
management cluster node-id {{ node.node_id }} principal-priority {{ node.principal_priority }}
{% endif %}
cluster {{ cluster.cluster_name }} {{ cluster.cluster_id }}
 peer-interface {{ node.peer_interface_type }} {{ node.peer_interface_name }}
 peer {{ node.peer_ip }}
{% if node.peer_loopback_ip %} source-ip {{ node.peer_loopback_ip }}{% endif %}
 deploy
{% endif %}
"#;

fn templates() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("system_properties", SYSTEM_PROPERTIES),
        ("interfaces", INTERFACES),
        ("mct_neighbors", MCT_NEIGHBORS),
        ("bgp", BGP),
        ("evpn", EVPN),
        ("overlay_gateway", OVERLAY_GATEWAY),
        ("cluster", CLUSTER),
    ])
    .map_err(|e| anyhow!("Invalid adapter template: {}", e))?;
    Ok(tera)
}

/// Drop the blank lines the template control blocks leave behind
fn compact(rendered: &str) -> String {
    rendered
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Map CLI output to a wire response: the ok marker, or the first error line
pub(crate) fn cli_response(output: &str) -> String {
    match output
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("% Error") || l.starts_with("% Invalid") || l.starts_with("syntax error"))
    {
        Some(err) => format!("<rpc-error>{}</rpc-error>", err),
        None => OK_RESPONSE.to_string(),
    }
}

pub(crate) fn parse_detail(version: &str, hostname: &str) -> DeviceDetail {
    let capture = |re: &str, text: &str| {
        Regex::new(re)
            .ok()
            .and_then(|r| r.captures(text).and_then(|c| c.get(1).map(|m| m.as_str().to_string())))
            .unwrap_or_default()
    };
    let firmware = capture(r"(?m)^Firmware name:\s*(\S+)", version);
    let switch_type = capture(r"(?m)^Switch Type\s*:\s*(\d+)", version);
    DeviceDetail {
        model: if switch_type.is_empty() { String::new() } else { format!("{}_{}", switch_type, firmware) },
        firmware,
        hostname: capture(r"host-name\s+(\S+)", hostname),
    }
}

/// Parse `show interface` output into interfaces with MAC and speed
/// and `show ip interface brief` into their addresses.
pub(crate) fn parse_interfaces(detail: &str, brief: &str) -> Vec<DiscoveredInterface> {
    let (Ok(header), Ok(mac), Ok(speed), Ok(ip_line)) = (
        Regex::new(r"^(Ethernet|Loopback|Ve|Port-channel)\s+(\S+)\s+is\s"),
        Regex::new(r"address is ([0-9a-fA-F]{4}\.[0-9a-fA-F]{4}\.[0-9a-fA-F]{4})"),
        Regex::new(r"LineSpeed Actual\s*:\s*(\d+)\s*Mbit"),
        Regex::new(r"^(Ethernet|Loopback|Ve|Port-channel)\s+(\S+)\s+(\d+\.\d+\.\d+\.\d+(?:/\d+)?)"),
    ) else {
        return Vec::new();
    };

    let mut out: Vec<DiscoveredInterface> = Vec::new();
    for line in detail.lines().map(str::trim) {
        if let Some(c) = header.captures(line) {
            out.push(DiscoveredInterface {
                int_type: c[1].to_lowercase(),
                int_name: c[2].to_string(),
                ..Default::default()
            });
        } else if let Some(current) = out.last_mut() {
            if let Some(c) = mac.captures(line) {
                current.mac = c[1].to_string();
            } else if let Some(c) = speed.captures(line) {
                current.speed = c[1].parse::<i64>().unwrap_or(0) * 1_000_000;
            }
        }
    }
    for line in brief.lines().map(str::trim) {
        if let Some(c) = ip_line.captures(line) {
            let (kind, name) = (c[1].to_lowercase(), &c[2]);
            if let Some(intf) = out.iter_mut().find(|i| i.int_type == kind && i.int_name == name) {
                intf.ip_address = c[3].to_string();
            }
        }
    }
    out
}

pub(crate) fn parse_lldp(output: &str) -> Vec<AdjacencyRecord> {
    let (Ok(local), Ok(remote), Ok(system)) = (
        Regex::new(r"Local Interface:\s*Eth\s+(\S+)\s*\(Local Interface MAC:\s*([0-9a-fA-F.:]+)\)"),
        Regex::new(r"Remote Interface:\s*(?:Eth\s+)?(\S+)\s*\(Remote Interface MAC:\s*([0-9a-fA-F.:]+)\)"),
        Regex::new(r"System Name:\s*(\S+)"),
    ) else {
        return Vec::new();
    };

    let mut out: Vec<AdjacencyRecord> = Vec::new();
    for line in output.lines().map(str::trim) {
        if let Some(c) = local.captures(line) {
            out.push(AdjacencyRecord {
                local_int_type: interface_type::ETHERNET.to_string(),
                local_int_name: c[1].to_string(),
                local_mac: c[2].to_string(),
                ..Default::default()
            });
        } else if let Some(current) = out.last_mut() {
            if let Some(c) = remote.captures(line) {
                current.remote_int_name = c[1].to_string();
                current.remote_mac = c[2].to_string();
            } else if let Some(c) = system.captures(line) {
                current.remote_system = c[1].to_string();
            }
        }
    }
    out.retain(|r| !r.remote_mac.is_empty());
    out
}

pub(crate) fn parse_asn(running_bgp: &str) -> String {
    Regex::new(r"local-as\s+(\d+)")
        .ok()
        .and_then(|r| r.captures(running_bgp).map(|c| c[1].to_string()))
        .unwrap_or_default()
}

pub(crate) fn parse_cluster_members(output: &str) -> usize {
    Regex::new(r"(?m)^\s*Total Number of Nodes\s*:\s*(\d+)")
        .ok()
        .and_then(|r| r.captures(output).and_then(|c| c[1].parse().ok()))
        .unwrap_or(0)
}

/// SSH CLI adapter. Every call opens its own session on a blocking thread.
pub struct CliAdapter {
    target: DeviceTarget,
    platform: Option<Platform>,
    timeout_secs: u64,
    templates: Arc<Tera>,
}

impl CliAdapter {
    async fn exec(&self, command: &str) -> Result<String> {
        let (host, user, pass) = (self.target.host.clone(), self.target.user_name.clone(), self.target.password.clone());
        let command = command.to_string();
        let timeout = self.timeout_secs;
        tokio::task::spawn_blocking(move || {
            let session = ssh_connect(&host, &user, &pass, timeout)?;
            ssh_exec(&session, &command)
        })
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
        .map_err(|e| FabricError::session(&self.target.host, e).into())
    }

    async fn push(&self, lines: String) -> Result<String> {
        if lines.trim().is_empty() {
            return Ok(OK_RESPONSE.to_string());
        }
        tracing::debug!("Pushing {} lines to {}", lines.lines().count(), self.target.host);
        let (host, user, pass) = (self.target.host.clone(), self.target.user_name.clone(), self.target.password.clone());
        let timeout = self.timeout_secs;
        let output = tokio::task::spawn_blocking(move || {
            let session = ssh_connect(&host, &user, &pass, timeout)?;
            ssh_push_config(&session, &lines)
        })
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
        .map_err(|e| FabricError::session(&self.target.host, e))?;
        Ok(cli_response(&output))
    }

    fn render_stage(&self, name: &str, req: &StageRequest) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("fabric_name", &req.fabric_name);
        ctx.insert("settings", req.settings.as_ref());
        ctx.insert("host", req.host.as_ref());
        ctx.insert("edge", &req.host.is_edge());
        ctx.insert("teardown", &(req.op == StageOp::Teardown));
        let rendered = self
            .templates
            .render(name, &ctx)
            .with_context(|| format!("Rendering {} for {}", name, self.target.host))?;
        Ok(compact(&rendered))
    }

    fn render_cluster(&self, cluster: &ClusterConfig, node: &ClusterMemberNode, op: ClusterOperation) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("cluster", cluster);
        ctx.insert("node", node);
        ctx.insert("op", op.as_str());
        ctx.insert("bits", &mct_bit::names(cluster.operation_bitmap));
        let rendered = self
            .templates
            .render("cluster", &ctx)
            .with_context(|| format!("Rendering cluster {} for {}", cluster.cluster_name, self.target.host))?;
        Ok(compact(&rendered))
    }

    async fn stage(&self, name: &str, req: &StageRequest) -> Result<String> {
        let lines = self.render_stage(name, req)?;
        self.push(lines).await
    }
}

#[async_trait]
impl DeviceAdapter for CliAdapter {
    async fn login(&self) -> Result<()> {
        let (host, user, pass) = (self.target.host.clone(), self.target.user_name.clone(), self.target.password.clone());
        let timeout = self.timeout_secs;
        tokio::task::spawn_blocking(move || ssh_connect(&host, &user, &pass, timeout).map(|_| ()))
            .await
            .map_err(|e| anyhow!("Task join error: {}", e))?
            .map_err(|e| FabricError::session(&self.target.host, e).into())
    }

    async fn close(&self) {
        tracing::debug!("Closing adapter for {} ({:?})", self.target.host, self.platform);
    }

    async fn get_device_detail(&self) -> Result<DeviceDetail> {
        let version = self.exec("show version").await?;
        let hostname = self.exec("show running-config switch-attributes host-name").await?;
        Ok(parse_detail(&version, &hostname))
    }

    async fn get_interfaces(&self) -> Result<Vec<DiscoveredInterface>> {
        let detail = self.exec("show interface").await?;
        let brief = self.exec("show ip interface brief").await?;
        Ok(parse_interfaces(&detail, &brief))
    }

    async fn get_lldps(&self) -> Result<Vec<AdjacencyRecord>> {
        let output = self.exec("show lldp neighbors detail").await?;
        Ok(parse_lldp(&output))
    }

    async fn get_asn(&self) -> Result<String> {
        let output = self.exec("show running-config router bgp").await?;
        Ok(parse_asn(&output))
    }

    async fn system_properties(&self, req: &StageRequest) -> Result<String> {
        self.stage("system_properties", req).await
    }

    async fn interfaces(&self, req: &StageRequest) -> Result<String> {
        self.stage("interfaces", req).await
    }

    async fn mct_neighbors(&self, req: &StageRequest) -> Result<String> {
        self.stage("mct_neighbors", req).await
    }

    async fn bgp(&self, req: &StageRequest) -> Result<String> {
        self.stage("bgp", req).await
    }

    async fn evpn(&self, req: &StageRequest) -> Result<String> {
        self.stage("evpn", req).await
    }

    async fn overlay_gateway(&self, req: &StageRequest) -> Result<String> {
        self.stage("overlay_gateway", req).await
    }

    async fn persist(&self) -> Result<String> {
        let output = self.exec("copy running-config startup-config").await?;
        Ok(cli_response(&output))
    }

    async fn cluster(&self, cluster: &ClusterConfig, node: &ClusterMemberNode, op: ClusterOperation) -> Result<String> {
        let lines = self.render_cluster(cluster, node, op)?;
        self.push(lines).await
    }

    async fn cluster_status(&self, cluster: &ClusterConfig) -> Result<ClusterStatus> {
        let output = self.exec("show cluster management").await?;
        let member_count = parse_cluster_members(&output);
        tracing::debug!("Cluster {} on {} reports {} members", cluster.cluster_name, self.target.host, member_count);
        Ok(ClusterStatus { member_count })
    }
}

/// Builds SSH CLI adapters. Unknown models still get an adapter, logged.
pub struct CliAdapterFactory {
    timeout_secs: u64,
    templates: Arc<Tera>,
}

impl CliAdapterFactory {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self { timeout_secs, templates: Arc::new(templates()?) })
    }
}

impl AdapterFactory for CliAdapterFactory {
    fn adapter(&self, target: &DeviceTarget) -> Result<Arc<dyn DeviceAdapter>> {
        let platform = Platform::from_model(&target.model);
        if platform.is_none() && !target.model.is_empty() {
            tracing::warn!("No platform profile for model {} on {}", target.model, target.host);
        }
        Ok(Arc::new(CliAdapter {
            target: target.clone(),
            platform,
            timeout_secs: self.timeout_secs,
            templates: self.templates.clone(),
        }))
    }
}
