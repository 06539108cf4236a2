use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::time::Duration;

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Normalize MAC address to lowercase with colons.
/// Accepts colon, dash and dotted (xxxx.xxxx.xxxx) notation.
pub fn normalize_mac(mac: &str) -> String {
    let clean: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();

    if clean.len() != 12 {
        return mac.to_lowercase();
    }

    clean
        .chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
        .to_lowercase()
}

/// Validate an IPv4 address (e.g., "192.168.1.1").
/// Returns true if the string is a valid dotted-decimal IPv4 address.
pub fn is_valid_ipv4(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| p.parse::<u8>().is_ok())
}

/// Drop a "/len" suffix if present
pub fn strip_prefix(ip: &str) -> &str {
    ip.split('/').next().unwrap_or(ip).trim()
}

pub fn ip_to_u32(ip: &str) -> Option<u32> {
    strip_prefix(ip).parse::<Ipv4Addr>().ok().map(u32::from)
}

pub fn u32_to_ip(value: u32) -> String {
    Ipv4Addr::from(value).to_string()
}

/// Parse "a.b.c.d/len" into (network, broadcast, len)
pub fn parse_cidr(cidr: &str) -> Option<(u32, u32, u8)> {
    let (addr, len) = cidr.trim().split_once('/')?;
    let len: u8 = len.parse().ok()?;
    if len > 32 {
        return None;
    }
    let addr = addr.parse::<Ipv4Addr>().ok().map(u32::from)?;
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    let network = addr & mask;
    let broadcast = network | !mask;
    Some((network, broadcast, len))
}

/// True when the address (prefix ignored) falls inside the CIDR
pub fn cidr_contains(cidr: &str, ip: &str) -> bool {
    match (parse_cidr(cidr), ip_to_u32(ip)) {
        (Some((network, broadcast, _)), Some(addr)) => addr >= network && addr <= broadcast,
        _ => false,
    }
}

/// True when both addresses share the same /len network
pub fn same_subnet(a: &str, b: &str, len: u8) -> bool {
    match (ip_to_u32(a), ip_to_u32(b)) {
        (Some(a), Some(b)) => {
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            a & mask == b & mask
        }
        _ => false,
    }
}

/// The other address of the /31 holding `ip`
pub fn pair_peer(ip: &str) -> Option<String> {
    ip_to_u32(ip).map(|addr| u32_to_ip(addr ^ 1))
}

/// Parse an ASN block: a single value ("64512") or a range ("65000-65534")
pub fn parse_asn_block(block: &str) -> Option<(u64, u64)> {
    let block = block.trim();
    let (lo, hi) = match block.split_once('-') {
        Some((lo, hi)) => (lo.trim().parse::<u64>().ok()?, hi.trim().parse::<u64>().ok()?),
        None => {
            let v = block.parse::<u64>().ok()?;
            (v, v)
        }
    };
    if lo == 0 || lo > hi || hi > u32::MAX as u64 {
        return None;
    }
    Some((lo, hi))
}

/// Platform type of a "<type>_<firmware>" model string
pub fn model_type(model: &str) -> &str {
    model.split('_').next().unwrap_or(model)
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// Returns the authenticated Session. Uses the ssh2 crate (libssh2).
/// This is blocking, so call from a spawn_blocking context.
pub fn ssh_connect(host: &str, user: &str, pass: &str, timeout_secs: u64) -> Result<ssh2::Session, String> {
    let addr = format!("{}:22", host);
    let tcp = TcpStream::connect_timeout(
        &addr.parse().map_err(|e| format!("Invalid address {}: {}", addr, e))?,
        Duration::from_secs(timeout_secs),
    )
    .map_err(|e| format!("TCP connection failed: {}", e))?;

    tcp.set_read_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();
    tcp.set_write_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| format!("Failed to create SSH session: {}", e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_secs as u32 * 1000);
    session.handshake()
        .map_err(|e| format!("SSH handshake failed: {}", e))?;

    match session.userauth_password(user, pass) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    let mut prompter = PasswordPrompt { password: pass.to_string() };
    let _ = session.userauth_keyboard_interactive(user, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err("SSH authentication failed: all methods exhausted".to_string())
    }
}

/// Run one exec-mode command on an authenticated session.
/// Blocking; call from spawn_blocking.
pub fn ssh_exec(session: &ssh2::Session, command: &str) -> Result<String, String> {
    let mut channel = session.channel_session()
        .map_err(|e| format!("Failed to open channel: {}", e))?;

    channel.exec(command)
        .map_err(|e| format!("Failed to execute command: {}", e))?;

    let mut output = String::new();
    channel.read_to_string(&mut output)
        .map_err(|e| format!("Failed to read output: {}", e))?;

    channel.wait_close()
        .map_err(|e| format!("Failed to close channel: {}", e))?;

    Ok(output)
}

/// Feed a block of configuration lines through an interactive shell.
/// Blocking; call from spawn_blocking.
pub fn ssh_push_config(session: &ssh2::Session, lines: &str) -> Result<String, String> {
    let mut channel = session.channel_session()
        .map_err(|e| format!("Failed to open channel: {}", e))?;
    channel.request_pty("vt100", None, None)
        .map_err(|e| format!("Failed to request PTY: {}", e))?;
    channel.shell()
        .map_err(|e| format!("Failed to start shell: {}", e))?;

    let script = format!("configure terminal\n{}\nend\nexit\n", lines.trim_end());
    channel.write_all(script.as_bytes())
        .map_err(|e| format!("Failed to write config: {}", e))?;
    channel.send_eof().ok();

    let mut output = String::new();
    channel.read_to_string(&mut output)
        .map_err(|e| format!("Failed to read output: {}", e))?;
    let _ = channel.wait_close();

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE:FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("609c.9f5d.4c6e"), "60:9c:9f:5d:4c:6e");
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff"), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_is_valid_ipv4() {
        assert!(is_valid_ipv4("192.168.1.1"));
        assert!(is_valid_ipv4("255.255.255.255"));
        assert!(!is_valid_ipv4(""));
        assert!(!is_valid_ipv4("256.1.1.1"));
        assert!(!is_valid_ipv4("1.2.3"));
    }

    #[test]
    fn test_parse_cidr() {
        let (net, bcast, len) = parse_cidr("10.10.10.0/23").unwrap();
        assert_eq!(u32_to_ip(net), "10.10.10.0");
        assert_eq!(u32_to_ip(bcast), "10.10.11.255");
        assert_eq!(len, 23);
        assert!(parse_cidr("10.10.10.0").is_none());
        assert!(parse_cidr("10.10.10.0/33").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        assert!(cidr_contains("172.31.254.0/24", "172.31.254.1"));
        assert!(cidr_contains("172.31.254.0/24", "172.31.254.9/32"));
        assert!(!cidr_contains("172.31.254.0/24", "172.31.253.1"));
        assert!(!cidr_contains("garbage", "172.31.254.1"));
    }

    #[test]
    fn test_pair_helpers() {
        assert_eq!(pair_peer("10.10.10.2/31").as_deref(), Some("10.10.10.3"));
        assert_eq!(pair_peer("10.10.10.3").as_deref(), Some("10.10.10.2"));
        assert!(same_subnet("10.10.10.2/31", "10.10.10.3/31", 31));
        assert!(!same_subnet("10.10.10.3", "10.10.10.4", 31));
    }

    #[test]
    fn test_parse_asn_block() {
        assert_eq!(parse_asn_block("65000-65534"), Some((65000, 65534)));
        assert_eq!(parse_asn_block("64512"), Some((64512, 64512)));
        assert_eq!(parse_asn_block("4200000000-4200065534"), Some((4200000000, 4200065534)));
        assert_eq!(parse_asn_block("65534-65000"), None);
        assert_eq!(parse_asn_block("abc"), None);
    }

    #[test]
    fn test_model_type() {
        assert_eq!(model_type("3000_18s.1.02a"), "3000");
        assert_eq!(model_type("4000"), "4000");
    }
}
