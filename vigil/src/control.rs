//! Host-facing control commands

use crate::error::ControlError;
use std::fmt;
use std::str::FromStr;

/// Lifecycle command received from the host shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Initialize,
    Start,
    Stop,
}

impl ControlCommand {
    /// Resolve a host method name
    pub fn from_method(method: &str) -> Result<Self, ControlError> {
        match method {
            "initialize" => Ok(ControlCommand::Initialize),
            "startDetection" | "start" => Ok(ControlCommand::Start),
            "stopDetection" | "stop" => Ok(ControlCommand::Stop),
            other => Err(ControlError::not_implemented(other)),
        }
    }

    /// Canonical host method name
    pub fn method(&self) -> &'static str {
        match self {
            ControlCommand::Initialize => "initialize",
            ControlCommand::Start => "startDetection",
            ControlCommand::Stop => "stopDetection",
        }
    }
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_method(s.trim())
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}
