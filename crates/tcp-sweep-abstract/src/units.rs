use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const KILO: u64 = 1_000;
const MEGA: u64 = 1_000_000;
const GIGA: u64 = 1_000_000_000;

/// A link or application data rate, stored in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate {
    bits_per_sec: u64,
}

impl DataRate {
    pub const fn from_bps(bits_per_sec: u64) -> Self {
        Self { bits_per_sec }
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        Self::from_bps(kbps * KILO)
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self::from_bps(mbps * MEGA)
    }

    pub const fn from_gbps(gbps: u64) -> Self {
        Self::from_bps(gbps * GIGA)
    }

    pub const fn bits_per_sec(&self) -> u64 {
        self.bits_per_sec
    }

    /// Time needed to clock `bytes` onto a wire running at this rate.
    pub fn transmission_time(&self, bytes: u32) -> Duration {
        if self.bits_per_sec == 0 {
            return Duration::MAX;
        }
        let nanos = (bytes as u128 * 8 * 1_000_000_000) / self.bits_per_sec as u128;
        Duration::from_nanos(nanos as u64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.bits_per_sec;
        if bps != 0 && bps % GIGA == 0 {
            write!(f, "{}Gbps", bps / GIGA)
        } else if bps != 0 && bps % MEGA == 0 {
            write!(f, "{}Mbps", bps / MEGA)
        } else if bps != 0 && bps % KILO == 0 {
            write!(f, "{}Kbps", bps / KILO)
        } else {
            write!(f, "{bps}bps")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid data rate '{0}', expected e.g. '10Mbps'")]
pub struct ParseDataRateError(String);

impl FromStr for DataRate {
    type Err = ParseDataRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| ParseDataRateError(s.to_string()))?;
        let (value, unit) = trimmed.split_at(split);
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| ParseDataRateError(s.to_string()))?;
        let scale = match unit.to_ascii_lowercase().as_str() {
            "bps" => 1,
            "kbps" => KILO,
            "mbps" => MEGA,
            "gbps" => GIGA,
            _ => return Err(ParseDataRateError(s.to_string())),
        };
        if !value.is_finite() || value < 0.0 {
            return Err(ParseDataRateError(s.to_string()));
        }
        Ok(Self::from_bps((value * scale as f64).round() as u64))
    }
}

impl Serialize for DataRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter rendering a `Duration` as whole milliseconds, e.g. `"10ms"`.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", value.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .strip_suffix("ms")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid delay '{raw}'")))
    }
}

/// Serde adapter rendering a `Duration` as fractional seconds.
pub mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::DataRate;
    use std::time::Duration;

    #[test]
    fn displays_in_largest_whole_unit() {
        assert_eq!(DataRate::from_mbps(2).to_string(), "2Mbps");
        assert_eq!(DataRate::from_mbps(100).to_string(), "100Mbps");
        assert_eq!(DataRate::from_kbps(1500).to_string(), "1500Kbps");
        assert_eq!(DataRate::from_gbps(1).to_string(), "1Gbps");
        assert_eq!(DataRate::from_bps(0).to_string(), "0bps");
    }

    #[test]
    fn parses_rate_strings() {
        assert_eq!("10Mbps".parse::<DataRate>(), Ok(DataRate::from_mbps(10)));
        assert_eq!("1.5Mbps".parse::<DataRate>(), Ok(DataRate::from_kbps(1500)));
        assert_eq!("64kbps".parse::<DataRate>(), Ok(DataRate::from_kbps(64)));
        assert!("fast".parse::<DataRate>().is_err());
        assert!("10furlongs".parse::<DataRate>().is_err());
    }

    #[test]
    fn transmission_time_matches_rate() {
        let rate = DataRate::from_mbps(8);
        assert_eq!(rate.transmission_time(1000), Duration::from_millis(1));
        assert_eq!(DataRate::from_mbps(100).transmission_time(1500), Duration::from_micros(120));
    }
}
