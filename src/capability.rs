//! Capability Catalogue - identifiers and negotiated metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 16-bit protocol capability identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(pub u16);

pub const CAP_XFERCOUNT: CapabilityId = CapabilityId(0x0001);
pub const ICAP_COMPRESSION: CapabilityId = CapabilityId(0x0100);
pub const ICAP_PIXELTYPE: CapabilityId = CapabilityId(0x0101);
pub const ICAP_UNITS: CapabilityId = CapabilityId(0x0102);
pub const ICAP_XFERMECH: CapabilityId = CapabilityId(0x0103);
pub const CAP_FEEDERENABLED: CapabilityId = CapabilityId(0x1002);
pub const CAP_SUPPORTEDCAPS: CapabilityId = CapabilityId(0x1005);
pub const CAP_DUPLEX: CapabilityId = CapabilityId(0x1012);
pub const CAP_DUPLEXENABLED: CapabilityId = CapabilityId(0x1013);
pub const ICAP_XRESOLUTION: CapabilityId = CapabilityId(0x1118);
pub const ICAP_YRESOLUTION: CapabilityId = CapabilityId(0x1119);
pub const ICAP_BITDEPTH: CapabilityId = CapabilityId(0x112B);

const CATALOGUE: &[(CapabilityId, &str)] = &[
    (CAP_XFERCOUNT, "CAP_XFERCOUNT"),
    (ICAP_COMPRESSION, "ICAP_COMPRESSION"),
    (ICAP_PIXELTYPE, "ICAP_PIXELTYPE"),
    (ICAP_UNITS, "ICAP_UNITS"),
    (ICAP_XFERMECH, "ICAP_XFERMECH"),
    (CAP_FEEDERENABLED, "CAP_FEEDERENABLED"),
    (CAP_SUPPORTEDCAPS, "CAP_SUPPORTEDCAPS"),
    (CAP_DUPLEX, "CAP_DUPLEX"),
    (CAP_DUPLEXENABLED, "CAP_DUPLEXENABLED"),
    (ICAP_XRESOLUTION, "ICAP_XRESOLUTION"),
    (ICAP_YRESOLUTION, "ICAP_YRESOLUTION"),
    (ICAP_BITDEPTH, "ICAP_BITDEPTH"),
];

impl CapabilityId {
    /// Well-known name, if the id is in the catalogue
    pub fn name(&self) -> Option<&'static str> {
        CATALOGUE.iter().find(|(id, _)| id == self).map(|(_, name)| *name)
    }

    /// Look up a catalogue entry by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        CATALOGUE
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<u16> for CapabilityId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Accepts `0x0150`, `336`, or a catalogue name such as `ICAP_BITDEPTH`.
impl FromStr for CapabilityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u16::from_str_radix(hex, 16)
                .map(Self)
                .map_err(|e| format!("invalid capability id '{}': {}", s, e));
        }
        if let Ok(n) = s.parse::<u16>() {
            return Ok(Self(n));
        }
        Self::from_name(s).ok_or_else(|| format!("unknown capability '{}'", s))
    }
}

/// Item type reported by the driver for a capability's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Bool,
    Fix32,
    Frame,
    Str32,
    Str64,
    Str128,
    Str255,
}

/// Container semantics used when negotiating the capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    OneValue,
    Enumeration,
    Range,
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Detail returned by the driver when a capability is described
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDetails {
    #[serde(default)]
    pub item_type: Option<ItemType>,
    #[serde(default)]
    pub container: Option<ContainerKind>,
    #[serde(default)]
    pub current: Option<CapValue>,
    #[serde(default)]
    pub default: Option<CapValue>,
}

/// Cached metadata for a capability known to be supported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub id: CapabilityId,
    pub item_type: Option<ItemType>,
    pub container: Option<ContainerKind>,
    pub current: Option<CapValue>,
    pub default: Option<CapValue>,
    pub details_gathered: bool,
    pub resolved_at: DateTime<Utc>,
}

impl CapabilityInfo {
    /// Supported, but nothing beyond the verdict is known yet
    pub fn bare(id: CapabilityId) -> Self {
        Self {
            id,
            item_type: None,
            container: None,
            current: None,
            default: None,
            details_gathered: false,
            resolved_at: Utc::now(),
        }
    }

    pub fn with_details(id: CapabilityId, details: CapabilityDetails) -> Self {
        let mut info = Self::bare(id);
        info.apply_details(details);
        info
    }

    pub fn apply_details(&mut self, details: CapabilityDetails) {
        self.item_type = details.item_type;
        self.container = details.container;
        self.current = details.current;
        self.default = details.default;
        self.details_gathered = true;
    }
}

pub type CapabilityInfoMap = HashMap<CapabilityId, CapabilityInfo>;
