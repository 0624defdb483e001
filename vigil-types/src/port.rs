use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// One element of a port specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

/// A validated port specification such as `22,80,8000-8100`.
///
/// The canonical string form is handed to the external scanner verbatim, so
/// parsing is strict: no zero ports, no reversed ranges, digits only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRange {
    specs: Vec<PortSpec>,
}

impl PortRange {
    /// Parse a port string like "80,443,1000-2000".
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let mut specs = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some((start, end)) = part.split_once('-') {
                let start = parse_port(start)?;
                let end = parse_port(end)?;
                if start > end {
                    return Err(TypeError::InvalidRange(start, end));
                }
                specs.push(PortSpec::Range(start, end));
            } else {
                specs.push(PortSpec::Single(parse_port(part)?));
            }
        }
        if specs.is_empty() {
            return Err(TypeError::EmptyPorts);
        }
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[PortSpec] {
        &self.specs
    }

    /// Number of distinct ports covered.
    pub fn port_count(&self) -> usize {
        let mut set = BTreeSet::new();
        for spec in &self.specs {
            match *spec {
                PortSpec::Single(p) => {
                    set.insert(p);
                }
                PortSpec::Range(start, end) => set.extend(start..=end),
            }
        }
        set.len()
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            specs: vec![PortSpec::Range(1, 1000)],
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, TypeError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TypeError::InvalidPort(raw.to_string()));
    }
    match raw.parse::<u16>() {
        Ok(0) => Err(TypeError::InvalidPort("0 (ports must be 1-65535)".into())),
        Ok(p) => Ok(p),
        Err(_) => Err(TypeError::InvalidPort(raw.to_string())),
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.specs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match spec {
                PortSpec::Single(p) => write!(f, "{p}")?,
                PortSpec::Range(start, end) => write!(f, "{start}-{end}")?,
            }
        }
        Ok(())
    }
}

impl Serialize for PortRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PortRange::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_port() {
        let range = PortRange::parse("80").unwrap();
        assert_eq!(range.specs(), &[PortSpec::Single(80)]);
        assert_eq!(range.port_count(), 1);
    }

    #[test]
    fn parse_mixed_and_display() {
        let range = PortRange::parse("22, 80,100-102,443").unwrap();
        assert_eq!(range.to_string(), "22,80,100-102,443");
        assert_eq!(range.port_count(), 6);
    }

    #[test]
    fn parse_counts_overlaps_once() {
        let range = PortRange::parse("1-10,5-15").unwrap();
        assert_eq!(range.port_count(), 15);
    }

    #[test]
    fn parse_rejects_zero_and_garbage() {
        assert!(PortRange::parse("0").is_err());
        assert!(PortRange::parse("abc").is_err());
        assert!(PortRange::parse("+80").is_err());
        assert!(PortRange::parse("70000").is_err());
    }

    #[test]
    fn parse_invalid_range() {
        assert_eq!(
            PortRange::parse("100-50").unwrap_err(),
            TypeError::InvalidRange(100, 50)
        );
    }

    #[test]
    fn parse_empty() {
        assert_eq!(PortRange::parse("").unwrap_err(), TypeError::EmptyPorts);
        assert_eq!(PortRange::parse(" , ").unwrap_err(), TypeError::EmptyPorts);
    }

    #[test]
    fn serde_uses_string_form() {
        let range: PortRange = serde_json::from_str("\"1-1024\"").unwrap();
        assert_eq!(serde_json::to_string(&range).unwrap(), "\"1-1024\"");
        assert!(serde_json::from_str::<PortRange>("\"1024-1\"").is_err());
    }

    #[test]
    fn default_is_first_thousand() {
        assert_eq!(PortRange::default().to_string(), "1-1000");
    }
}
