//! Processing actions assigned to original files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// What happens to an original file during processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Convert,
    Extract,
    Manual,
    Ignore,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Convert => "convert",
            Action::Extract => "extract",
            Action::Manual => "manual",
            Action::Ignore => "ignore",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "convert" => Ok(Action::Convert),
            "extract" => Ok(Action::Extract),
            "manual" => Ok(Action::Manual),
            "ignore" => Ok(Action::Ignore),
            other => Err(Error::invalid_value("action", format!("unknown action '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertAction {
    pub tool: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractAction {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAction {
    pub reason: String,
    pub process: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreAction {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-action payloads. Each action keeps its own slot so switching actions
/// back and forth does not lose the other settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert: Option<ConvertAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<ManualAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<IgnoreAction>,
}

impl ActionData {
    pub fn is_empty(&self) -> bool {
        self == &ActionData::default()
    }
}

/// An action together with its payload, as assigned by an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    Convert(ConvertAction),
    Extract(ExtractAction),
    Manual(ManualAction),
    Ignore(IgnoreAction),
}

impl ActionPayload {
    pub fn manual(reason: impl Into<String>, process: impl Into<String>) -> Self {
        ActionPayload::Manual(ManualAction {
            reason: reason.into(),
            process: process.into(),
        })
    }

    pub fn ignore(template: impl Into<String>, reason: Option<String>) -> Self {
        ActionPayload::Ignore(IgnoreAction {
            template: template.into(),
            reason,
        })
    }

    pub fn action(&self) -> Action {
        match self {
            ActionPayload::Convert(_) => Action::Convert,
            ActionPayload::Extract(_) => Action::Extract,
            ActionPayload::Manual(_) => Action::Manual,
            ActionPayload::Ignore(_) => Action::Ignore,
        }
    }

    /// `data` with this payload's slot replaced.
    pub fn merged_into(&self, data: &ActionData) -> ActionData {
        let mut merged = data.clone();
        match self {
            ActionPayload::Convert(payload) => merged.convert = Some(payload.clone()),
            ActionPayload::Extract(payload) => merged.extract = Some(payload.clone()),
            ActionPayload::Manual(payload) => merged.manual = Some(payload.clone()),
            ActionPayload::Ignore(payload) => merged.ignore = Some(payload.clone()),
        }
        merged
    }
}
