use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Geographic partition an account belongs to.
///
/// Every notification about an account or one of its agents carries the
/// account's region as a routing-key segment, so downstream services can bind
/// to a single region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Emea,
    Nam,
    Apac,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Emea, Region::Nam, Region::Apac];

    /// Routing-key segment for this region.
    pub fn code(&self) -> &'static str {
        match self {
            Region::Emea => "emea",
            Region::Nam => "nam",
            Region::Apac => "apac",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown region: {0}")]
pub struct UnknownRegion(pub String);

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emea" => Ok(Region::Emea),
            "nam" => Ok(Region::Nam),
            "apac" => Ok(Region::Apac),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}
