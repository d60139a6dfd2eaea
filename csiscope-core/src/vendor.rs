//! Hardware family definitions

use serde::{Deserialize, Serialize, Serializer};

/// Supported CSI hardware families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub enum Vendor {
    /// Intel IWL5300 with the Linux 802.11n CSI Tool
    Intel,
    /// Atheros AR9xxx with the Atheros CSI Tool
    Atheros,
    /// Broadcom chips patched with nexmon_csi
    Nexmon,
    /// ESP32-family embedded radios
    Esp32,
}

impl Vendor {
    /// Get the vendor name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Intel => "Intel",
            Vendor::Atheros => "Atheros",
            Vendor::Nexmon => "Nexmon",
            Vendor::Esp32 => "ESP32",
        }
    }

    /// Whether this family's captures arrive inside a packet-capture container
    pub fn is_container_framed(&self) -> bool {
        matches!(self, Vendor::Nexmon)
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Vendor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl TryFrom<&str> for Vendor {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_lowercase().as_str() {
            "intel" | "iwl" | "iwl5300" => Ok(Vendor::Intel),
            "atheros" | "ath" => Ok(Vendor::Atheros),
            "nexmon" | "broadcom" | "bcm" => Ok(Vendor::Nexmon),
            "esp32" | "esp" => Ok(Vendor::Esp32),
            _ => Err(format!("Unknown vendor: {}", s)),
        }
    }
}
