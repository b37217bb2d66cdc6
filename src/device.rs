use std::fmt;

/// State of a device as reported in a device-list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// Fully operational device.
    Device,
    /// Device is offline.
    Offline,
    /// Device requires USB debugging authorization.
    Unauthorized,
    /// Device is in the process of being authorized.
    Authorizing,
    /// Insufficient permissions to communicate with device.
    NoPermissions,
    /// Unknown state string.
    Unknown(String),
}

impl DeviceState {
    pub fn parse(s: &str) -> Self {
        match s {
            "device" => DeviceState::Device,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            "authorizing" => DeviceState::Authorizing,
            "no permissions" => DeviceState::NoPermissions,
            other => DeviceState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Device => write!(f, "device"),
            DeviceState::Offline => write!(f, "offline"),
            DeviceState::Unauthorized => write!(f, "unauthorized"),
            DeviceState::Authorizing => write!(f, "authorizing"),
            DeviceState::NoPermissions => write!(f, "no permissions"),
            DeviceState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// One row of a device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device serial number (e.g., "emulator-5554", "192.168.1.5:5555").
    pub serial: String,
    /// Current device state.
    pub state: DeviceState,
    /// Extended `k:v` columns from the long listing (`product:...`,
    /// `model:...`, `transport_id:...`); empty for the short form.
    pub properties: Vec<(String, String)>,
}

impl DeviceInfo {
    /// Parse the `serial\tstate[\tk:v]*` rows of a device listing.
    ///
    /// Example input: `"emulator-5554\tdevice\tproduct:sdk_gphone\n"`
    pub fn parse_device_list(data: &str) -> Vec<DeviceInfo> {
        data.lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let serial = parts.next()?.to_string();
                let state_str = parts.next()?;
                let properties = parts
                    .filter_map(|col| {
                        let (k, v) = col.split_once(':')?;
                        Some((k.to_string(), v.to_string()))
                    })
                    .collect();
                Some(DeviceInfo {
                    serial,
                    state: DeviceState::parse(state_str),
                    properties,
                })
            })
            .collect()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.serial, self.state)?;
        for (k, v) in &self.properties {
            write!(f, "\t{}:{}", k, v)?;
        }
        Ok(())
    }
}
