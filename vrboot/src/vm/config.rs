//! Virtual machine configuration.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::console::Credentials;

/// Transport protocol of a forwarded port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Name used in QEMU `hostfwd` rules.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A port of the management interface reachable from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HostForward {
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,

    /// Port opened on the host.
    pub host_port: u16,

    /// Port of the guest management address it forwards to.
    pub guest_port: u16,
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

impl HostForward {
    /// Create a TCP forward.
    pub fn tcp(host_port: u16, guest_port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            host_port,
            guest_port,
        }
    }

    /// Create a UDP forward.
    pub fn udp(host_port: u16, guest_port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            host_port,
            guest_port,
        }
    }

    /// SSH, SNMP, NETCONF and gNMI of an IOS XR router.
    pub fn iosxr_defaults() -> Vec<Self> {
        vec![
            Self::tcp(2022, 22),
            Self::udp(2161, 161),
            Self::tcp(2830, 830),
            Self::tcp(17400, 57400),
        ]
    }
}

/// Configuration of one emulated router.
///
/// Every field has a default, so a partial file deserializes:
///
/// ```rust
/// let config: vrboot::vm::VmConfig =
///     serde_json::from_str(r#"{ "disk_image": "/images/xrv9k.qcow2", "ram": 16384 }"#).unwrap();
/// assert_eq!(config.vcpus, 2);
/// ```
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Path of the boot disk.
    pub disk_image: PathBuf,

    /// Number of virtual CPUs.
    pub vcpus: u32,

    /// Memory in MB.
    pub ram: u32,

    /// Hostname configured on the router.
    pub hostname: String,

    /// Account created on the router.
    pub username: String,

    /// Password of that account.
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,

    /// Management address of the guest, on the user-mode network.
    pub mgmt_address: Ipv4Addr,

    /// Prefix length of the management network.
    pub mgmt_prefix_len: u8,

    /// Ports of the management interface exposed on the host.
    pub forwarded_ports: Vec<HostForward>,

    /// Telnet port of the QEMU monitor.
    pub monitor_port: u16,

    /// Telnet port of the first serial console; console `i` is on
    /// `serial_base_port + i`.
    pub serial_base_port: u16,

    /// Number of serial consoles.
    pub serial_console_count: usize,

    /// Connection attempts before giving up on a console.
    pub connect_attempts: u32,

    /// Pause between two connection attempts, in seconds.
    #[serde(deserialize_with = "deserialize_secs")]
    pub connect_retry_delay: Duration,

    /// How long the router may take to boot and apply its day-0
    /// configuration, in seconds. Absent or zero waits forever.
    #[serde(deserialize_with = "deserialize_optional_secs")]
    pub boot_timeout: Option<Duration>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            disk_image: PathBuf::new(),
            vcpus: 2,
            ram: 4096,
            hostname: "router".to_string(),
            username: "admin".to_string(),
            password: SecretString::from("admin".to_string()),
            mgmt_address: Ipv4Addr::new(10, 0, 0, 15),
            mgmt_prefix_len: 24,
            forwarded_ports: HostForward::iosxr_defaults(),
            monitor_port: 4000,
            serial_base_port: 5000,
            serial_console_count: 1,
            connect_attempts: 5,
            connect_retry_delay: Duration::from_secs(1),
            boot_timeout: Some(Duration::from_secs(20 * 60)),
        }
    }
}

impl VmConfig {
    /// Console credentials of the configured account.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.username.clone(),
            SecretString::from(self.password.expose_secret().to_string()),
        )
    }

    /// The management network in CIDR notation, e.g. `10.0.0.0/24`.
    pub fn mgmt_network(&self) -> String {
        let prefix_len = u32::from(self.mgmt_prefix_len.min(32));
        let mask = u32::MAX.checked_shl(32 - prefix_len).unwrap_or(0);
        let network = Ipv4Addr::from(u32::from(self.mgmt_address) & mask);
        format!("{}/{}", network, prefix_len)
    }

    /// The management address in CIDR notation, e.g. `10.0.0.15/24`.
    pub fn mgmt_cidr(&self) -> String {
        format!("{}/{}", self.mgmt_address, self.mgmt_prefix_len)
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

fn deserialize_optional_secs<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}
