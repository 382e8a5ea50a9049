//! Sentinel alert records.
//!
//! Alerts are advisory data, never errors. Once produced they are appended
//! to the alert log and never modified.

use serde::{Deserialize, Serialize};
use std::fmt;

use ebb_core::types::ParticipantId;

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Concentration,
    VelocityAnomaly,
    SybilPattern,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concentration => "concentration",
            Self::VelocityAnomaly => "velocity_anomaly",
            Self::SybilPattern => "sybil_pattern",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Earner {
    pub participant_id: ParticipantId,
    pub reward: u64,
}

/// Numbers behind an alert.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    Concentration {
        gini_bps: u64,
        top_earners: Vec<Earner>,
        /// Share of participant rewards held by `top_earners`.
        top_share_bps: u64,
        participants: usize,
    },
    Velocity {
        reward: u64,
        /// Mean reward over the participant's trailing window.
        average: u64,
        epochs_observed: usize,
    },
    Sybil {
        /// Reward rounded to the sentinel precision.
        rounded_reward: u64,
        group_size: usize,
    },
}

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct SentinelAlert {
    pub epoch_number: u64,
    pub alert_type: AlertType,
    /// Severity in basis points (`0..=10_000`).
    pub severity_bps: u64,
    pub participant_ids: Vec<ParticipantId>,
    pub evidence: Evidence,
    pub recommended_action: String,
}

impl SentinelAlert {
    /// Severity as a fraction in `[0, 1]`, for display.
    pub fn severity(&self) -> f64 {
        self.severity_bps as f64 / 10_000.0
    }
}
