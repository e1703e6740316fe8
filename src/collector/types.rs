//! Input event types consumed by the input-activity collectors.
//!
//! These types carry timing and an event class only: never key codes,
//! characters, or cursor coordinates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A keyboard event capturing only timing information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyboardEvent {
    /// Timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
    /// Whether this is a key press (true) or release (false)
    pub is_key_down: bool,
}

impl KeyboardEvent {
    pub fn new(is_key_down: bool) -> Self {
        Self::at(Utc::now(), is_key_down)
    }

    pub fn at(timestamp: DateTime<Utc>, is_key_down: bool) -> Self {
        Self {
            timestamp,
            is_key_down,
        }
    }
}

/// Mouse event type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseEventType {
    Move,
    Click,
    Scroll,
}

/// A mouse event; no positions or deltas are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseEvent {
    /// Timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
    /// Type of mouse event
    pub event_type: MouseEventType,
}

impl MouseEvent {
    pub fn new(event_type: MouseEventType) -> Self {
        Self::at(Utc::now(), event_type)
    }

    pub fn at(timestamp: DateTime<Utc>, event_type: MouseEventType) -> Self {
        Self {
            timestamp,
            event_type,
        }
    }
}

/// Unified event type delivered by an input source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SensorEvent {
    Keyboard(KeyboardEvent),
    Mouse(MouseEvent),
}

impl SensorEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SensorEvent::Keyboard(e) => e.timestamp,
            SensorEvent::Mouse(e) => e.timestamp,
        }
    }
}
