use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

const MAX_PREFIX_LEN: u8 = 32;

/// An IPv4 network in CIDR notation, e.g. `192.168.10.0/24`.
///
/// Serialized as its string form so the config file reads the same way an
/// operator would type it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > MAX_PREFIX_LEN {
            return Err(Error::InvalidConfig(format!(
                "prefix length {} exceeds {}",
                prefix_len, MAX_PREFIX_LEN
            )));
        }

        let subnet = Self {
            network,
            prefix_len,
        };
        if u32::from(network) & !u32::from(subnet.mask()) != 0 {
            return Err(Error::InvalidConfig(format!(
                "{}/{} has host bits set",
                network, prefix_len
            )));
        }

        Ok(subnet)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The dotted-quad netmask sent to clients as option 1.
    pub fn mask(&self) -> Ipv4Addr {
        let bits = match self.prefix_len {
            0 => 0,
            len => u32::MAX << (MAX_PREFIX_LEN - len),
        };
        Ipv4Addr::from(bits)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask());
        u32::from(ip) & mask == u32::from(self.network)
    }
}

impl FromStr for Subnet {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (address, prefix) = value.trim().split_once('/').ok_or_else(|| {
            Error::InvalidConfig(format!("subnet '{}' is not in CIDR notation", value))
        })?;

        let network = address
            .parse::<Ipv4Addr>()
            .map_err(|error| Error::InvalidConfig(format!("subnet '{}': {}", value, error)))?;
        let prefix_len = prefix
            .parse::<u8>()
            .map_err(|error| Error::InvalidConfig(format!("subnet '{}': {}", value, error)))?;

        Self::new(network, prefix_len)
    }
}

impl TryFrom<String> for Subnet {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address already configured on the bridge; sent as router and server identifier.
    pub server_ip: Ipv4Addr,
    pub subnet: Subnet,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub lease_time_seconds: u32,
    pub offer_time_seconds: u32,
    pub sweep_interval_seconds: u64,
    /// Validate REQUESTs against the pool instead of ACKing any named address.
    pub strict_requests: bool,
    pub bind_address: Ipv4Addr,
    pub server_port: u16,
    pub client_port: u16,
    pub reply_address: Ipv4Addr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 10, 1),
            subnet: Subnet {
                network: Ipv4Addr::new(192, 168, 10, 0),
                prefix_len: 24,
            },
            range_start: Ipv4Addr::new(192, 168, 10, 100),
            range_end: Ipv4Addr::new(192, 168, 10, 200),
            dns_server: Ipv4Addr::new(8, 8, 8, 8),
            lease_time_seconds: 3600,
            offer_time_seconds: 60,
            sweep_interval_seconds: 30,
            strict_requests: false,
            bind_address: Ipv4Addr::UNSPECIFIED,
            server_port: 67,
            client_port: 68,
            reply_address: Ipv4Addr::BROADCAST,
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let start = u32::from(self.range_start);
        let end = u32::from(self.range_end);

        if start > end {
            return Err(Error::InvalidConfig(
                "range_start must be less than or equal to range_end".to_string(),
            ));
        }

        if !self.subnet.contains(self.range_start) || !self.subnet.contains(self.range_end) {
            return Err(Error::InvalidConfig(format!(
                "range {} - {} is not inside subnet {}",
                self.range_start, self.range_end, self.subnet
            )));
        }

        if !self.subnet.contains(self.server_ip) {
            return Err(Error::InvalidConfig(format!(
                "server_ip {} is not inside subnet {}",
                self.server_ip, self.subnet
            )));
        }

        if self.ip_in_range(self.server_ip) {
            return Err(Error::InvalidConfig(
                "server_ip must not be within the address range".to_string(),
            ));
        }

        if self.lease_time_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_time_seconds must be greater than 0".to_string(),
            ));
        }

        if self.offer_time_seconds == 0 {
            return Err(Error::InvalidConfig(
                "offer_time_seconds must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn ip_in_range(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        addr >= u32::from(self.range_start) && addr <= u32::from(self.range_end)
    }

    /// Zero when the range is inverted.
    pub fn range_size(&self) -> u32 {
        u32::from(self.range_end)
            .checked_sub(u32::from(self.range_start))
            .map_or(0, |span| span.saturating_add(1))
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.subnet.mask()
    }
}
