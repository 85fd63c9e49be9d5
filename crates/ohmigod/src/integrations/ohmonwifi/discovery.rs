use serde::Deserialize;
use serde::Serialize;

/// TXT record fields advertised by a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryTxt {
    #[serde(default)]
    pub devicename: String,

    #[serde(default)]
    pub devicetype: String,

    #[serde(default)]
    pub deviceid: String,

    #[serde(default)]
    pub firmware: String,
}

/// One device seen on the network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Stable identity, the same value pairing stores as the device id
    pub id: String,

    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub txt: DiscoveryTxt,
}

impl DiscoveryResult {
    /// Address including the port, when one was advertised
    pub fn host(&self) -> String {
        match self.port {
            Some(port) if port != 80 => format!("{}:{}", self.address, port),
            _ => self.address.clone(),
        }
    }
}

/// Change in what discovery knows about a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// Device appeared
    Found(DiscoveryResult),

    /// Device answered from a new address
    AddressChanged(DiscoveryResult),

    /// Device stopped answering
    Lost(DiscoveryResult),
}

impl DiscoveryEvent {
    pub fn result(&self) -> &DiscoveryResult {
        match self {
            DiscoveryEvent::Found(result)
            | DiscoveryEvent::AddressChanged(result)
            | DiscoveryEvent::Lost(result) => result,
        }
    }
}
