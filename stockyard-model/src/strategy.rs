use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Placement policy the controller uses when stocking from the conveyor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageStrategy {
    #[default]
    NearestEmpty,
    Fixed,
    AiOptimized,
}

impl StorageStrategy {
    /// Accepts the canonical names plus the short aliases the controller
    /// firmware reports.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEAREST" | "NEAREST_EMPTY" => Some(StorageStrategy::NearestEmpty),
            "FIXED" => Some(StorageStrategy::Fixed),
            "AI" | "AI_OPTIMIZED" => Some(StorageStrategy::AiOptimized),
            _ => None,
        }
    }

    /// Token used in the `STRATEGY <token>` device command.
    pub fn device_token(&self) -> &'static str {
        match self {
            StorageStrategy::NearestEmpty => "NEAREST",
            StorageStrategy::Fixed => "FIXED",
            StorageStrategy::AiOptimized => "AI",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStrategy::NearestEmpty => "NEAREST_EMPTY",
            StorageStrategy::Fixed => "FIXED",
            StorageStrategy::AiOptimized => "AI_OPTIMIZED",
        }
    }
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageStrategy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s).ok_or_else(|| ModelError::InvalidStrategy(s.to_string()))
    }
}
