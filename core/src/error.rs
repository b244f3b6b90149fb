use crate::types::{DeviceId, LocationId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device {device_id} does not exist")]
    UnknownDevice { device_id: DeviceId },

    #[error("Location {location_id} does not exist")]
    UnknownLocation { location_id: LocationId },

    #[error("Rule set '{name}' unusable: {reason}")]
    Configuration { name: String, reason: String },

    #[error("State inconsistency: {detail}")]
    StateInconsistency { detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    pub fn configuration(name: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Referenced device or location missing.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownDevice { .. } | Self::UnknownLocation { .. })
    }

    /// Validation and configuration failures abort only the triggering
    /// operation; everything else stops the driving loop.
    pub fn is_event_local(&self) -> bool {
        self.is_validation() || matches!(self, Self::Configuration { .. })
    }
}

pub type SimResult<T> = Result<T, SimError>;
