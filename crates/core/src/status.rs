//! Responder status derived from a single measurement.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health of a responder as seen from one location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderStatus {
    /// Reachable and answered OCSP.
    Good,
    /// Answered OCSP but did not respond to the reachability probe.
    Questionable,
    /// No valid OCSP answer.
    Bad,
}

impl ResponderStatus {
    pub fn from_measurement(ping: bool, ocsp: bool) -> Self {
        match (ocsp, ping) {
            (false, _) => Self::Bad,
            (true, true) => Self::Good,
            (true, false) => Self::Questionable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Questionable => "questionable",
            Self::Bad => "bad",
        }
    }
}

impl fmt::Display for ResponderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
