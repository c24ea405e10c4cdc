//! Engine events published on the shared [`EventBus`]
//!
//! Observers (notification delivery, dashboards, tests) subscribe to the
//! bus. Publishing never fails and never affects a decision.

use crate::types::Decision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subacq_common::events::EventBus;

/// Event bus carrying [`AcquisitionEvent`]s
pub type AcquisitionEventBus = EventBus<AcquisitionEvent>;

/// Default bus capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AcquisitionEvent {
    /// An acquisition attempt reached its terminal decision
    DecisionMade { decision: Box<Decision> },

    /// A source's circuit tripped
    CircuitOpened {
        source: String,
        consecutive_failures: u32,
        cooldown_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// A half-open probe succeeded
    CircuitClosed {
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// Cached candidate lists were invalidated
    CacheCleared {
        /// `None` when the whole cache was cleared
        source: Option<String>,
        removed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl AcquisitionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AcquisitionEvent::DecisionMade { .. } => "DecisionMade",
            AcquisitionEvent::CircuitOpened { .. } => "CircuitOpened",
            AcquisitionEvent::CircuitClosed { .. } => "CircuitClosed",
            AcquisitionEvent::CacheCleared { .. } => "CacheCleared",
        }
    }
}
