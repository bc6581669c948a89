//! Negotiated link-speed classification.

use std::fmt;

/// USB link speed as reported for an enumerated device.
///
/// Every raw signal the host stack can produce maps onto one of these five
/// labels; unrecognized values become [`LinkSpeed::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkSpeed {
    /// USB 1.0 Low Speed - 1.5 Mbps
    Low,
    /// USB 1.1 Full Speed - 12 Mbps
    Full,
    /// USB 2.0 High Speed - 480 Mbps
    High,
    /// USB 3.x SuperSpeed (any generation) - 5 Gbps and up
    Super,
    #[default]
    Unknown,
}

impl LinkSpeed {
    /// Classify the sysfs 'speed' attribute (value in Mbps, e.g. "1.5", "480").
    pub fn from_mbps(raw: &str) -> Self {
        match raw.trim() {
            "1.5" => Self::Low,
            "12" => Self::Full,
            "480" => Self::High,
            // SuperSpeed, SuperSpeed+ and SuperSpeed+ 2x2 share one label.
            "5000" | "10000" | "20000" => Self::Super,
            _ => Self::Unknown,
        }
    }

    /// Decode a fixed-layout speed code (0=Low, 1=Full, 2=High, 3=Super).
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Low,
            1 => Self::Full,
            2 => Self::High,
            3 => Self::Super,
            _ => Self::Unknown,
        }
    }

    /// Fixed-layout speed code; -1 for unknown.
    pub fn code(&self) -> i32 {
        match self {
            Self::Low => 0,
            Self::Full => 1,
            Self::High => 2,
            Self::Super => 3,
            Self::Unknown => -1,
        }
    }

    /// Short display name for TUI.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Low => "1.5M",
            Self::Full => "12M",
            Self::High => "480M",
            Self::Super => "5G+",
            Self::Unknown => "?",
        }
    }
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "Low Speed (1.5 Mbps)",
            Self::Full => "Full Speed (12 Mbps)",
            Self::High => "High Speed (480 Mbps)",
            Self::Super => "Super Speed (5 Gbps)",
            Self::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [LinkSpeed; 5] = [
        LinkSpeed::Low,
        LinkSpeed::Full,
        LinkSpeed::High,
        LinkSpeed::Super,
        LinkSpeed::Unknown,
    ];

    #[test]
    fn test_from_mbps() {
        assert_eq!(LinkSpeed::from_mbps("1.5"), LinkSpeed::Low);
        assert_eq!(LinkSpeed::from_mbps("12\n"), LinkSpeed::Full);
        assert_eq!(LinkSpeed::from_mbps("480"), LinkSpeed::High);
        assert_eq!(LinkSpeed::from_mbps("5000"), LinkSpeed::Super);
        assert_eq!(LinkSpeed::from_mbps("10000"), LinkSpeed::Super);
        assert_eq!(LinkSpeed::from_mbps("999"), LinkSpeed::Unknown);
        assert_eq!(LinkSpeed::from_mbps(""), LinkSpeed::Unknown);
    }

    #[test]
    fn test_code_roundtrip() {
        for speed in ALL {
            assert_eq!(LinkSpeed::from_code(speed.code()), speed);
        }
        assert_eq!(LinkSpeed::from_code(7), LinkSpeed::Unknown);
        assert_eq!(LinkSpeed::from_code(i32::MIN), LinkSpeed::Unknown);
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(LinkSpeed::Full.to_string(), "Full Speed (12 Mbps)");
        assert_eq!(LinkSpeed::Super.to_string(), "Super Speed (5 Gbps)");
        assert_eq!(LinkSpeed::Unknown.to_string(), "Unknown");
    }

    proptest! {
        #[test]
        fn classification_is_total_for_codes(code in any::<i32>()) {
            let speed = LinkSpeed::from_code(code);
            prop_assert!(ALL.contains(&speed));
            prop_assert!((-1..=3).contains(&speed.code()));
        }

        #[test]
        fn classification_is_total_for_text(raw in ".*") {
            let speed = LinkSpeed::from_mbps(&raw);
            prop_assert!(ALL.contains(&speed));
            let label = speed.to_string();
            prop_assert!(ALL.iter().any(|s| s.to_string() == label));
        }
    }
}
