//! Full analysis pipeline
//!
//! Validates the configuration once at construction, then runs the pure
//! component chain over a batch: device probe, level aggregation, latency
//! outlier screen, correlation scan, latency regression, cliff detection,
//! classification, severity. The report is a plain serializable record for
//! downstream reporting collaborators.

use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate_by_qps, QpsLevelAggregate};
use crate::classifier::{BottleneckClassifier, BottleneckVerdict, WindowStats};
use crate::cliff::{CliffDetector, CliffEvent};
use crate::config::AnalysisConfig;
use crate::correlation::{CorrelationAnalyzer, CorrelationScan, RegressionFit};
use crate::error::Result;
use crate::outlier::{MethodComparison, OutlierDetector, OutlierReport};
use crate::sample::{DeviceField, DeviceRegistry, Metric, SampleBatch};
use crate::severity::{SeverityOutcome, SeverityScorer};
use crate::stats;

/// Everything one batch analysis produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Per-QPS-level aggregates, ascending
    pub levels: Vec<QpsLevelAggregate>,
    /// One-sided latency tail screen; absent without latency data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_outliers: Option<OutlierReport>,
    /// IQR-vs-sigma comparison; absent without latency data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_methods: Option<MethodComparison>,
    pub correlations: CorrelationScan,
    /// OLS of latency on load, CPU, and memory; absent when not computable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_model: Option<RegressionFit>,
    pub cliffs: Vec<CliffEvent>,
    pub verdict: BottleneckVerdict,
    pub severity: SeverityOutcome,
}

/// The assembled engine; components share one validated configuration
#[derive(Debug, Clone)]
pub struct AnalysisEngine {
    config: AnalysisConfig,
    outliers: OutlierDetector,
    correlations: CorrelationAnalyzer,
    cliffs: CliffDetector,
    classifier: BottleneckClassifier,
    scorer: SeverityScorer,
}

impl AnalysisEngine {
    /// Build an engine, failing fast on an invalid configuration
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            outliers: OutlierDetector::new(&config),
            correlations: CorrelationAnalyzer::new(&config),
            cliffs: CliffDetector::new(&config),
            classifier: BottleneckClassifier::new(&config),
            scorer: SeverityScorer::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Metric pairs to correlate: the fixed load/resource pairs plus the
    /// device pairs for each configured priority prefix
    fn correlation_pairs(&self) -> Vec<(Metric, Metric)> {
        let mut pairs = vec![
            (Metric::Qps, Metric::Cpu),
            (Metric::Qps, Metric::Mem),
            (Metric::Qps, Metric::RpcLatency),
            (Metric::Cpu, Metric::RpcLatency),
        ];
        for prefix in &self.config.device_priority {
            pairs.push((Metric::Qps, Metric::device(prefix, DeviceField::Util)));
            pairs.push((Metric::Qps, Metric::device(prefix, DeviceField::TotalIops)));
            pairs.push((
                Metric::device(prefix, DeviceField::AvgAwait),
                Metric::RpcLatency,
            ));
        }
        pairs
    }

    /// Run the full pipeline over one batch
    pub fn analyze(&self, batch: &SampleBatch) -> AnalysisReport {
        let registry = DeviceRegistry::probe(batch);
        let levels = aggregate_by_qps(batch);

        let latency_series = batch.series(&Metric::RpcLatency);
        let has_latency = !stats::finite(&latency_series).is_empty();
        let (latency_outliers, outlier_methods) = if has_latency {
            (
                Some(
                    self.outliers
                        .detect_latency_tail("rpc_latency_ms", &latency_series),
                ),
                Some(self.outliers.compare("rpc_latency_ms", &latency_series)),
            )
        } else {
            tracing::debug!("batch carries no latency data, outlier screen skipped");
            (None, None)
        };

        let correlations =
            self.correlations
                .scan(batch, &registry, &self.correlation_pairs());

        let latency_model = if has_latency {
            let predictors = vec![
                (Metric::Qps.name(), batch.series(&Metric::Qps)),
                (Metric::Cpu.name(), batch.series(&Metric::Cpu)),
                (Metric::Mem.name(), batch.series(&Metric::Mem)),
            ];
            match self
                .correlations
                .multiple_regression("rpc_latency_ms", &predictors, &latency_series)
            {
                Ok(fit) => Some(fit),
                Err(e) => {
                    tracing::debug!("latency model not computable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let cliffs = self.cliffs.detect(batch, &registry, &levels);
        let verdict = self.classifier.classify(batch, &registry, &cliffs);

        let window = WindowStats::compute(batch, &self.config);
        let severity = self.scorer.score(
            &verdict.detected,
            window.as_ref().and_then(|w| w.avg_latency),
            window.is_some(),
        );

        AnalysisReport {
            levels,
            latency_outliers,
            outlier_methods,
            correlations,
            latency_model,
            cliffs,
            verdict,
            severity,
        }
    }
}
