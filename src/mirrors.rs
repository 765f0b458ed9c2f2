use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::BeatmapsetId;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mirror {
    Chimu,
    SayoBot,
    Nerinyan,
}

impl Mirror {
    pub const ALL: [Mirror; 3] = [Mirror::Chimu, Mirror::SayoBot, Mirror::Nerinyan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mirror::Chimu => "Chimu",
            Mirror::SayoBot => "SayoBot",
            Mirror::Nerinyan => "Nerinyan",
        }
    }

    pub fn from_index(idx: i32) -> Result<Self, ValidationError> {
        match idx {
            0 => Ok(Mirror::Chimu),
            1 => Ok(Mirror::SayoBot),
            2 => Ok(Mirror::Nerinyan),
            other => Err(ValidationError::UnknownMirror(other.to_string())),
        }
    }

    pub fn to_index(&self) -> i32 {
        match self {
            Mirror::Chimu => 0,
            Mirror::SayoBot => 1,
            Mirror::Nerinyan => 2,
        }
    }

    /// Download URL of `set_id` on this mirror.
    pub fn resolve(&self, set_id: BeatmapsetId) -> String {
        match self {
            Mirror::Chimu => format!("https://api.chimu.moe/v1/download/{set_id}?n=1"),
            Mirror::SayoBot => format!("https://dl.sayobot.cn/beatmaps/download/full/{set_id}"),
            Mirror::Nerinyan => format!("https://api.nerinyan.moe/d/{set_id}"),
        }
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts a mirror name (any case) or its index in the selection list.
impl FromStr for Mirror {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(idx) = trimmed.parse::<i32>() {
            return Mirror::from_index(idx);
        }
        Mirror::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ValidationError::UnknownMirror(trimmed.to_string()))
    }
}

/// Resolves every id against `mirror`, keeping the input order.
pub fn resolve_all(ids: &[BeatmapsetId], mirror: Mirror) -> Vec<(BeatmapsetId, String)> {
    ids.iter().map(|id| (*id, mirror.resolve(*id))).collect()
}
