use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the two independent poll editions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Cn,
    Jp,
}

impl Region {
    pub const ALL: [Region; 2] = [Region::Cn, Region::Jp];

    /// Short code used in session keys and output file names.
    pub fn code(self) -> &'static str {
        match self {
            Self::Cn => "cn",
            Self::Jp => "jp",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Cn => "CN",
            Self::Jp => "JP",
        }
    }

    /// Whether source names in this region may be native (Japanese) names
    /// that need the translation-table fallback.
    pub fn uses_native_names(self) -> bool {
        matches!(self, Self::Jp)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cn" | "china" => Ok(Self::Cn),
            "jp" | "japan" => Ok(Self::Jp),
            other => Err(format!("unknown region '{other}' (expected cn or jp)")),
        }
    }
}

/// Identifies one session of one region. Serialized as `"<number>_<region>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub region: Region,
    pub number: u32,
}

impl SessionKey {
    pub fn new(region: Region, number: u32) -> Self {
        Self { region, number }
    }

    /// Parse `"12_cn"`. Returns None for anything else.
    pub fn parse(key: &str) -> Option<Self> {
        let (num, code) = key.split_once('_')?;
        let number = num.parse().ok()?;
        let region = code.parse().ok()?;
        Some(Self { region, number })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("{}_{}", self.number, self.region.code()))
    }
}

impl Serialize for SessionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SessionKey::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid session key '{raw}'")))
    }
}
