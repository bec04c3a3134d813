//! Bottleneck report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::task::TaskId;
use crate::core::topology::TopologyId;
use crate::core::worker::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    AgentOverload,
    StalledTask,
    ResourceConstraint,
    DependencyChain,
    NetworkLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// What a bottleneck entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Subject {
    Worker(WorkerId),
    Task(TaskId),
    Host,
    Network,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub kind: BottleneckKind,
    pub severity: Severity,
    pub subject: Subject,
    pub metric: String,
    pub current_value: f64,
    pub threshold: f64,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckReport {
    pub topology_id: Option<TopologyId>,
    pub entries: Vec<Bottleneck>,
    pub overall_severity: Severity,
    /// Deduplicated, in first-seen order.
    pub recommendations: Vec<String>,
    /// Set when any entry is critical.
    pub urgent: bool,
    /// 0..=100
    pub health_score: u8,
    pub generated_at: DateTime<Utc>,
}

impl BottleneckReport {
    /// Assemble a report from raw entries.
    pub fn from_entries(
        topology_id: Option<TopologyId>,
        entries: Vec<Bottleneck>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let overall_severity = overall_severity(&entries);
        let urgent = entries.iter().any(|e| e.severity == Severity::Critical);
        let mut recommendations: Vec<String> = Vec::new();
        for entry in &entries {
            if !recommendations.contains(&entry.recommendation) {
                recommendations.push(entry.recommendation.clone());
            }
        }
        if urgent {
            recommendations.insert(0, "URGENT: critical bottlenecks need immediate attention".to_string());
        }
        let health_score = health_score(&entries);
        Self {
            topology_id,
            entries,
            overall_severity,
            recommendations,
            urgent,
            health_score,
            generated_at,
        }
    }

    pub fn count_of(&self, kind: BottleneckKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

/// Critical if any entry is critical; high if more than two are high;
/// medium if more than three entries overall; low otherwise.
pub fn overall_severity(entries: &[Bottleneck]) -> Severity {
    if entries.iter().any(|e| e.severity == Severity::Critical) {
        return Severity::Critical;
    }
    let high = entries.iter().filter(|e| e.severity == Severity::High).count();
    if high > 2 {
        Severity::High
    } else if entries.len() > 3 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// 100 minus a per-entry penalty weighted by severity, floored at zero.
pub fn health_score(entries: &[Bottleneck]) -> u8 {
    let penalty: u32 = entries
        .iter()
        .map(|e| match e.severity {
            Severity::Critical => 25,
            Severity::High => 15,
            Severity::Medium => 8,
            Severity::Low => 3,
        })
        .sum();
    100u32.saturating_sub(penalty) as u8
}
