//! Severity scoring and grading
//!
//! Aggregates the classifier's per-resource findings and the raw latency
//! average into one [0, 1] score and a letter grade. A quick-mode run (or a
//! run with no usable high-QPS window) gets an explicit insufficient-depth
//! outcome, never an approximated grade.

use serde::{Deserialize, Serialize};

use crate::classifier::{BottleneckKind, ResourceFinding};
use crate::config::{AnalysisConfig, BenchmarkMode};

/// Multiplier applied when a finding exceeds its threshold by the margin
const BOOSTED_MULTIPLIER: f32 = 1.5;
/// RPC latency contribution per tripped latency band
const RPC_STEP: f32 = 0.15;

/// Letter grade derived from the total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    /// Band mapping: < 0.2 A, < 0.4 B, < 0.7 C, else D
    pub fn from_total(total: f32) -> Self {
        if total < 0.2 {
            Grade::A
        } else if total < 0.4 {
            Grade::B
        } else if total < 0.7 {
            Grade::C
        } else {
            Grade::D
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Grade::A => "Excellent",
            Grade::B => "Good",
            Grade::C => "Acceptable",
            Grade::D => "Needs-Improvement",
        }
    }
}

/// Numeric severity result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityScore {
    pub resource_component: f32,
    pub rpc_component: f32,
    /// clamp(resource + rpc, 0, 1)
    pub total: f32,
    pub grade: Grade,
    pub reason: String,
}

/// Terminal severity output: a score, or an explicit refusal to grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SeverityOutcome {
    Scored(SeverityScore),
    InsufficientDepth { evaluation_basis: String },
}

/// Weighted severity scorer
#[derive(Debug, Clone)]
pub struct SeverityScorer {
    config: AnalysisConfig,
}

impl SeverityScorer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn weight(&self, kind: BottleneckKind) -> f32 {
        let w = &self.config.severity_weights;
        match kind {
            BottleneckKind::Cpu => w.cpu,
            BottleneckKind::Memory => w.memory,
            BottleneckKind::Ebs => w.ebs,
            BottleneckKind::NetworkIo => w.network,
            BottleneckKind::RpcProcessing => w.rpc,
            BottleneckKind::Balanced | BottleneckKind::Unknown => 0.0,
        }
    }

    /// Score a run from its findings and raw window latency average
    ///
    /// `window_available` is false when the batch produced no high-QPS
    /// window; severity only aggregates over successfully computed inputs.
    pub fn score(
        &self,
        findings: &[ResourceFinding],
        avg_latency_ms: Option<f32>,
        window_available: bool,
    ) -> SeverityOutcome {
        if self.config.benchmark_mode == BenchmarkMode::Quick {
            return SeverityOutcome::InsufficientDepth {
                evaluation_basis: "insufficient_benchmark_depth".to_string(),
            };
        }
        if !window_available {
            return SeverityOutcome::InsufficientDepth {
                evaluation_basis: "no_high_qps_window".to_string(),
            };
        }

        // Each category counts once; the first finding of a kind wins
        let mut seen: Vec<BottleneckKind> = Vec::new();
        let mut resource_component = 0.0f32;
        for finding in findings {
            if seen.contains(&finding.kind) {
                continue;
            }
            seen.push(finding.kind);
            let multiplier = if finding.exceeds_margin {
                BOOSTED_MULTIPLIER
            } else {
                1.0
            };
            resource_component += self.weight(finding.kind) * multiplier;
        }

        let mut rpc_component = 0.0f32;
        if let Some(latency) = avg_latency_ms {
            if latency > self.config.rpc_latency_threshold_ms {
                rpc_component += RPC_STEP;
            }
            if latency > 2.0 * self.config.rpc_latency_threshold_ms {
                rpc_component += RPC_STEP;
            }
        }

        let total = (resource_component + rpc_component).clamp(0.0, 1.0);
        let grade = Grade::from_total(total);

        let reason = format!(
            "resource component {:.2} from {} detected categor{}, rpc component {:.2}; grade {:?} ({})",
            resource_component,
            seen.len(),
            if seen.len() == 1 { "y" } else { "ies" },
            rpc_component,
            grade,
            grade.label()
        );

        SeverityOutcome::Scored(SeverityScore {
            resource_component,
            rpc_component,
            total,
            grade,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: BottleneckKind, exceeds_margin: bool) -> ResourceFinding {
        ResourceFinding {
            kind,
            metric: "x".to_string(),
            value: 0.0,
            threshold: 0.0,
            exceeds_margin,
        }
    }

    fn scorer() -> SeverityScorer {
        SeverityScorer::new(&AnalysisConfig::default())
    }

    fn scored(outcome: SeverityOutcome) -> SeverityScore {
        match outcome {
            SeverityOutcome::Scored(score) => score,
            SeverityOutcome::InsufficientDepth { evaluation_basis } => {
                panic!("expected a score, got insufficient depth: {evaluation_basis}")
            }
        }
    }

    #[test]
    fn test_clean_run_grades_a() {
        let score = scored(scorer().score(&[], Some(20.0), true));
        assert_eq!(score.total, 0.0);
        assert_eq!(score.grade, Grade::A);
    }

    #[test]
    fn test_single_cpu_finding_within_margin() {
        let score = scored(scorer().score(&[finding(BottleneckKind::Cpu, false)], Some(20.0), true));
        assert!((score.resource_component - 0.25).abs() < 1e-6);
        assert_eq!(score.grade, Grade::B);
    }

    #[test]
    fn test_boosted_finding_multiplies() {
        let score = scored(scorer().score(&[finding(BottleneckKind::Cpu, true)], Some(20.0), true));
        assert!((score.resource_component - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_kind_counts_once() {
        let findings = vec![
            finding(BottleneckKind::Ebs, false),
            finding(BottleneckKind::Ebs, true), // second data device, ignored
        ];
        let score = scored(scorer().score(&findings, Some(20.0), true));
        assert!((score.resource_component - 0.30).abs() < 1e-6);
    }

    #[test]
    fn test_rpc_component_is_cumulative() {
        let score = scored(scorer().score(&[], Some(1500.0), true));
        assert!((score.rpc_component - 0.15).abs() < 1e-6);

        let score = scored(scorer().score(&[], Some(2500.0), true));
        assert!((score.rpc_component - 0.30).abs() < 1e-6);
    }

    #[test]
    fn test_total_clamped_to_one() {
        let findings = vec![
            finding(BottleneckKind::Cpu, true),
            finding(BottleneckKind::Memory, true),
            finding(BottleneckKind::Ebs, true),
            finding(BottleneckKind::NetworkIo, true),
            finding(BottleneckKind::RpcProcessing, true),
        ];
        let score = scored(scorer().score(&findings, Some(5000.0), true));
        assert_eq!(score.total, 1.0);
        assert_eq!(score.grade, Grade::D);
    }

    #[test]
    fn test_grade_bands_are_half_open() {
        assert_eq!(Grade::from_total(0.0), Grade::A);
        assert_eq!(Grade::from_total(0.19), Grade::A);
        assert_eq!(Grade::from_total(0.2), Grade::B);
        assert_eq!(Grade::from_total(0.39), Grade::B);
        assert_eq!(Grade::from_total(0.4), Grade::C);
        assert_eq!(Grade::from_total(0.69), Grade::C);
        assert_eq!(Grade::from_total(0.7), Grade::D);
        assert_eq!(Grade::from_total(1.0), Grade::D);
    }

    #[test]
    fn test_quick_mode_refuses_to_grade() {
        let config = AnalysisConfig {
            benchmark_mode: BenchmarkMode::Quick,
            ..AnalysisConfig::default()
        };
        let outcome = SeverityScorer::new(&config).score(
            &[finding(BottleneckKind::Cpu, true)],
            Some(5000.0),
            true,
        );
        assert_eq!(
            outcome,
            SeverityOutcome::InsufficientDepth {
                evaluation_basis: "insufficient_benchmark_depth".to_string()
            }
        );
    }

    #[test]
    fn test_missing_window_refuses_to_grade() {
        let outcome = scorer().score(&[], None, false);
        assert!(matches!(
            outcome,
            SeverityOutcome::InsufficientDepth { .. }
        ));
    }
}
