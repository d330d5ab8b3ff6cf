//! Business context: the immutable input of one generation call.

use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::program::MAX_MONTH;

/// Size of the business the program is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Smb,
    MidMarket,
    Enterprise,
}

impl Scale {
    /// Multiplier applied to baseline workstream durations.
    pub fn duration_factor(self) -> f64 {
        match self {
            Self::Smb => 1.0,
            Self::MidMarket => 1.25,
            Self::Enterprise => 1.5,
        }
    }

    /// Multiplier applied to baseline cost figures.
    pub fn cost_factor(self) -> f64 {
        match self {
            Self::Smb => 1.0,
            Self::MidMarket => 2.0,
            Self::Enterprise => 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Urgency {
    /// Multiplier applied to baseline durations; urgent programs compress.
    pub fn duration_factor(self) -> f64 {
        match self {
            Self::Low => 1.2,
            Self::Normal => 1.0,
            Self::High => 0.85,
            Self::Critical => 0.7,
        }
    }
}

/// Declared budget bounds in currency units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    pub max: f64,
}

/// Declared timeline bounds in months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_headcount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_contractors: Option<u32>,
}

/// Optional user-declared constraints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_range: Option<BudgetRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_range: Option<TimelineRange>,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regulations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
}

/// The normalized venture description a program is generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessContext {
    pub name: String,
    #[serde(rename = "type")]
    pub business_type: String,
    pub scale: Scale,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

/// Reasons a [`BusinessContext`] is rejected before generation starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("required field {0:?} is empty")]
    MissingField(&'static str),

    #[error("timeline range must satisfy 0 < min <= max, got min={min} max={max}")]
    InvalidTimelineRange { min: u32, max: u32 },

    #[error("timeline maximum {0} exceeds the {MAX_MONTH}-month limit")]
    TimelineTooLong(u32),

    #[error("budget range must satisfy 0 <= min <= max and max > 0, got min={min:?} max={max}")]
    InvalidBudgetRange { min: Option<f64>, max: f64 },
}

impl BusinessContext {
    /// Check the required fields and the shape of any declared constraints.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.name.trim().is_empty() {
            return Err(ContextError::MissingField("name"));
        }
        if self.business_type.trim().is_empty() {
            return Err(ContextError::MissingField("type"));
        }
        if self.description.trim().is_empty() {
            return Err(ContextError::MissingField("description"));
        }

        let Some(constraints) = &self.constraints else {
            return Ok(());
        };

        if let Some(range) = constraints.timeline_range {
            if range.min == 0 || range.min > range.max {
                return Err(ContextError::InvalidTimelineRange {
                    min: range.min,
                    max: range.max,
                });
            }
            if range.max > MAX_MONTH {
                return Err(ContextError::TimelineTooLong(range.max));
            }
        }

        if let Some(range) = constraints.budget_range {
            let min_ok = range.min.is_none_or(|min| min >= 0.0 && min <= range.max);
            if !range.max.is_finite() || range.max <= 0.0 || !min_ok {
                return Err(ContextError::InvalidBudgetRange {
                    min: range.min,
                    max: range.max,
                });
            }
        }

        Ok(())
    }

    pub fn timeline_range(&self) -> Option<TimelineRange> {
        self.constraints.as_ref().and_then(|c| c.timeline_range)
    }

    pub fn budget_range(&self) -> Option<BudgetRange> {
        self.constraints.as_ref().and_then(|c| c.budget_range)
    }

    pub fn urgency(&self) -> Urgency {
        self.constraints
            .as_ref()
            .map(|c| c.urgency)
            .unwrap_or_default()
    }

    pub fn regulations(&self) -> &[String] {
        self.constraints
            .as_ref()
            .map(|c| c.regulations.as_slice())
            .unwrap_or_default()
    }

    pub fn max_headcount(&self) -> Option<f64> {
        self.constraints
            .as_ref()
            .and_then(|c| c.resource_limits)
            .and_then(|l| l.max_headcount)
    }
}

/// A prior-framework insight supplied by an upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkInsight {
    pub framework: String,
    pub summary: String,
    pub confidence: f64,
}

/// Read-only insights consumed by round-1 agents and the scheduler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamInsights {
    #[serde(default)]
    pub frameworks: Vec<FrameworkInsight>,
    /// Names for the scheduler's work phases, used in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_labels: Vec<String>,
}

impl UpstreamInsights {
    /// Mean confidence across all framework insights, if any.
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.frameworks.is_empty() {
            return None;
        }
        let sum: f64 = self.frameworks.iter().map(|f| f.confidence).sum();
        Some(sum / self.frameworks.len() as f64)
    }
}

/// Input file for `generate`: a context plus optional insights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    pub context: BusinessContext,
    #[serde(default)]
    pub insights: UpstreamInsights,
}

/// Load a [`ContextFile`] from a `.toml` or `.json` file.
pub fn load_context_file(path: &Path) -> Result<ContextFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read context file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML context {}", path.display()))
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse JSON context {}", path.display()))
    }
}
