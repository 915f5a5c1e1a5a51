use std::fmt;

use serde::{Deserialize, Serialize};

/// Compute device an oracle was loaded onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    #[serde(rename = "GPU")]
    Gpu,
    #[serde(rename = "CPU")]
    Cpu,
}

impl Device {
    pub const fn is_accelerated(self) -> bool {
        matches!(self, Self::Gpu)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_matches_acceleration() {
        for device in [Device::Gpu, Device::Cpu] {
            assert_eq!(device.label() == "GPU", device.is_accelerated());
        }
    }

    #[test]
    fn test_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Device::Cpu).unwrap(), "\"CPU\"");
        assert_eq!(serde_json::to_string(&Device::Gpu).unwrap(), "\"GPU\"");
    }
}
