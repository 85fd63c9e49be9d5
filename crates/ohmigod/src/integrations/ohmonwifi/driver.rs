//! Pairing: turning discovery results or a typed-in address into devices.

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use super::client::DeviceApi;
use super::discovery::DiscoveryResult;
use super::error::Error;
use super::error::Result;
use super::settings::DeviceSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingData {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingSettings {
    pub address: String,

    #[serde(default)]
    pub serial: String,

    #[serde(default)]
    pub firmware: String,
}

/// A device that can be added
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingCandidate {
    pub name: String,
    pub data: PairingData,
    pub settings: PairingSettings,
}

impl PairingCandidate {
    /// Initial settings of the device once it is added
    pub fn device_settings(&self, interval: u64) -> DeviceSettings {
        DeviceSettings {
            firmware: self.settings.firmware.clone(),
            serial: self.settings.serial.clone(),
            ..DeviceSettings::new(self.settings.address.clone(), interval)
        }
    }
}

/// Candidates for every device discovery currently knows about
pub fn list_devices<'a>(results: impl IntoIterator<Item = &'a DiscoveryResult>) -> Vec<PairingCandidate> {
    results.into_iter().map(candidate_from_discovery).collect()
}

fn candidate_from_discovery(result: &DiscoveryResult) -> PairingCandidate {
    let txt = &result.txt;
    let name = if txt.devicename == txt.devicetype {
        // Factory name; tell identical units apart by the id suffix
        let chars: Vec<char> = txt.deviceid.chars().collect();
        let suffix: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("{} {}", txt.devicename, suffix)
    } else {
        txt.devicename.clone()
    };

    PairingCandidate {
        name,
        data: PairingData {
            id: result.id.clone(),
        },
        settings: PairingSettings {
            address: result.host(),
            serial: txt.deviceid.clone(),
            firmware: txt.firmware.clone(),
        },
    }
}

/// Identify the device answering at the client's host
pub async fn manual_pairing<C: DeviceApi>(client: &C) -> Result<PairingCandidate> {
    info!("Manual pairing with {}", client.host());
    let info = client.get_info().await?.validate()?;

    let id = info
        .device_id
        .clone()
        .ok_or_else(|| Error::MalformedResponse("device did not report deviceID".to_string()))?;

    Ok(PairingCandidate {
        name: info.device_name.clone().unwrap_or_else(|| id.clone()),
        data: PairingData { id: id.clone() },
        settings: PairingSettings {
            address: info
                .device_ip
                .clone()
                .unwrap_or_else(|| client.host().to_string()),
            serial: id,
            firmware: info.firmware.clone().unwrap_or_default(),
        },
    })
}
