//! Sample table, device-column probing, and metric selectors
//!
//! The engine consumes an immutable [`SampleBatch`] produced by an external
//! SampleSource. Device columns are open-ended (`{prefix}_{metric}` in the
//! source schema) and are probed exactly once per batch into a
//! [`DeviceRegistry`]; analyses query the registry instead of re-scanning
//! column names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-device I/O gauges for one sample
///
/// Every field is optional: a collector that does not export a column leaves
/// it `None`. Absent columns are skipped by analyses, never treated as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    /// Device utilization percentage (`{prefix}_util`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub util_pct: Option<f32>,
    /// Average queue depth (`{prefix}_aqu_sz`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<f32>,
    /// Average I/O wait in ms (`{prefix}_avg_await`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_await_ms: Option<f32>,
    /// Read wait in ms (`{prefix}_r_await`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_await_ms: Option<f32>,
    /// Write wait in ms (`{prefix}_w_await`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_await_ms: Option<f32>,
    /// Read IOPS (`{prefix}_r_s`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_iops: Option<f32>,
    /// Write IOPS (`{prefix}_w_s`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_iops: Option<f32>,
    /// Combined IOPS (`{prefix}_total_iops`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_iops: Option<f32>,
    /// Throughput in MiB/s (`{prefix}_throughput_mibs`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_mibs: Option<f32>,
}

impl DeviceMetrics {
    /// Value of one gauge, if the column resolved for this sample
    pub fn get(&self, field: DeviceField) -> Option<f32> {
        match field {
            DeviceField::Util => self.util_pct,
            DeviceField::QueueDepth => self.queue_depth,
            DeviceField::AvgAwait => self.avg_await_ms,
            DeviceField::ReadAwait => self.r_await_ms,
            DeviceField::WriteAwait => self.w_await_ms,
            DeviceField::ReadIops => self.r_iops,
            DeviceField::WriteIops => self.w_iops,
            DeviceField::TotalIops => self.total_iops,
            DeviceField::Throughput => self.throughput_mibs,
        }
    }
}

/// One telemetry sample taken at a controlled load step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Collection timestamp, milliseconds since the epoch
    pub timestamp_ms: u64,
    /// Controlled load level at collection time (`current_qps`)
    pub qps: u32,
    /// Host CPU usage, 0-100
    pub cpu_usage: f32,
    /// Host memory usage, 0-100
    pub mem_usage: f32,
    /// RPC latency in ms; `None` means the collector had no data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_latency_ms: Option<f32>,
    /// Per-device gauges keyed by logical device prefix (`data`, `accounts`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub devices: BTreeMap<String, DeviceMetrics>,
}

/// The nine recognized device gauge columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceField {
    Util,
    QueueDepth,
    AvgAwait,
    ReadAwait,
    WriteAwait,
    ReadIops,
    WriteIops,
    TotalIops,
    Throughput,
}

impl DeviceField {
    /// Column suffix in the source schema (`{prefix}_{suffix}`)
    pub fn column_suffix(self) -> &'static str {
        match self {
            DeviceField::Util => "util",
            DeviceField::QueueDepth => "aqu_sz",
            DeviceField::AvgAwait => "avg_await",
            DeviceField::ReadAwait => "r_await",
            DeviceField::WriteAwait => "w_await",
            DeviceField::ReadIops => "r_s",
            DeviceField::WriteIops => "w_s",
            DeviceField::TotalIops => "total_iops",
            DeviceField::Throughput => "throughput_mibs",
        }
    }

    /// All nine fields, in schema order
    pub fn all() -> [DeviceField; 9] {
        [
            DeviceField::Util,
            DeviceField::QueueDepth,
            DeviceField::AvgAwait,
            DeviceField::ReadAwait,
            DeviceField::WriteAwait,
            DeviceField::ReadIops,
            DeviceField::WriteIops,
            DeviceField::TotalIops,
            DeviceField::Throughput,
        ]
    }
}

/// Addresses a single numeric column of the sample table
///
/// This is the static replacement for string-prefix column scanning: every
/// analysis names the series it reads through a `Metric`, and device metrics
/// resolve through the [`DeviceRegistry`] before any series is extracted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    /// Controlled load level
    Qps,
    /// Host CPU usage
    Cpu,
    /// Host memory usage
    Mem,
    /// RPC latency
    RpcLatency,
    /// A device gauge, e.g. `data_util`
    Device { prefix: String, field: DeviceField },
}

impl Metric {
    /// Stable column name matching the source schema
    pub fn name(&self) -> String {
        match self {
            Metric::Qps => "current_qps".to_string(),
            Metric::Cpu => "cpu_usage".to_string(),
            Metric::Mem => "mem_usage".to_string(),
            Metric::RpcLatency => "rpc_latency_ms".to_string(),
            Metric::Device { prefix, field } => {
                format!("{}_{}", prefix, field.column_suffix())
            }
        }
    }

    /// Value of this metric in one sample, if present
    pub fn value(&self, sample: &Sample) -> Option<f32> {
        match self {
            Metric::Qps => Some(sample.qps as f32),
            Metric::Cpu => Some(sample.cpu_usage),
            Metric::Mem => Some(sample.mem_usage),
            Metric::RpcLatency => sample.rpc_latency_ms,
            Metric::Device { prefix, field } => {
                sample.devices.get(prefix).and_then(|d| d.get(*field))
            }
        }
    }

    /// Shorthand for a device metric selector
    pub fn device(prefix: &str, field: DeviceField) -> Self {
        Metric::Device {
            prefix: prefix.to_string(),
            field,
        }
    }
}

/// Immutable, ordered table of samples
///
/// Samples keep their source order (ascending collection time); level
/// aggregation and cliff factor analysis rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    samples: Vec<Sample>,
}

impl SampleBatch {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Per-sample series for a metric, index-aligned with the batch
    ///
    /// Missing values become NaN so callers can keep positional flags;
    /// analyses drop non-finite entries before doing arithmetic.
    pub fn series(&self, metric: &Metric) -> Vec<f32> {
        self.samples
            .iter()
            .map(|s| metric.value(s).unwrap_or(f32::NAN))
            .collect()
    }
}

/// Which of the nine gauge columns resolved for a logical device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceColumns {
    resolved: Vec<DeviceField>,
}

impl DeviceColumns {
    pub fn has(&self, field: DeviceField) -> bool {
        self.resolved.contains(&field)
    }

    /// Resolved fields in schema order
    pub fn fields(&self) -> &[DeviceField] {
        &self.resolved
    }
}

/// Device-column registry, built once per batch
///
/// Maps each logical device prefix seen in the batch to the set of gauge
/// columns that resolved (a column resolves if any sample carries a value
/// for it). Queried by analyses instead of re-scanning column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, DeviceColumns>,
}

impl DeviceRegistry {
    /// Probe every device prefix present in the batch
    pub fn probe(batch: &SampleBatch) -> Self {
        let mut devices: BTreeMap<String, DeviceColumns> = BTreeMap::new();
        for sample in batch.samples() {
            for (prefix, metrics) in &sample.devices {
                let entry = devices.entry(prefix.clone()).or_default();
                for field in DeviceField::all() {
                    if metrics.get(field).is_some() && !entry.resolved.contains(&field) {
                        entry.resolved.push(field);
                    }
                }
            }
        }
        for columns in devices.values_mut() {
            columns.resolved.sort();
        }
        Self { devices }
    }

    /// Column set for one logical device, if the batch carries it at all
    pub fn resolve(&self, prefix: &str) -> Option<&DeviceColumns> {
        self.devices.get(prefix)
    }

    pub fn has_column(&self, prefix: &str, field: DeviceField) -> bool {
        self.resolve(prefix).is_some_and(|c| c.has(field))
    }

    /// First prefix carrying `field`, trying `priority` in order and then
    /// the remaining registered devices in name order
    pub fn first_with(&self, priority: &[String], field: DeviceField) -> Option<String> {
        for prefix in priority {
            if self.has_column(prefix, field) {
                return Some(prefix.clone());
            }
        }
        self.devices
            .iter()
            .find(|(prefix, columns)| !priority.iter().any(|p| p == *prefix) && columns.has(field))
            .map(|(prefix, _)| prefix.clone())
    }

    /// Registered device prefixes in name order
    pub fn device_names(&self) -> impl Iterator<Item = &String> {
        self.devices.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_with_device(qps: u32, prefix: &str, util: Option<f32>) -> Sample {
        let mut devices = BTreeMap::new();
        devices.insert(
            prefix.to_string(),
            DeviceMetrics {
                util_pct: util,
                total_iops: Some(1200.0),
                ..DeviceMetrics::default()
            },
        );
        Sample {
            timestamp_ms: 1_000 * qps as u64,
            qps,
            cpu_usage: 40.0,
            mem_usage: 55.0,
            rpc_latency_ms: Some(12.0),
            devices,
        }
    }

    #[test]
    fn test_metric_names_match_source_schema() {
        assert_eq!(Metric::Qps.name(), "current_qps");
        assert_eq!(Metric::Cpu.name(), "cpu_usage");
        assert_eq!(
            Metric::device("data", DeviceField::QueueDepth).name(),
            "data_aqu_sz"
        );
        assert_eq!(
            Metric::device("accounts", DeviceField::ReadIops).name(),
            "accounts_r_s"
        );
    }

    #[test]
    fn test_series_marks_missing_values_as_nan() {
        let mut s = sample_with_device(1000, "data", Some(35.0));
        s.rpc_latency_ms = None;
        let batch = SampleBatch::new(vec![s, sample_with_device(2000, "data", Some(60.0))]);

        let latency = batch.series(&Metric::RpcLatency);
        assert!(latency[0].is_nan());
        assert_eq!(latency[1], 12.0);
    }

    #[test]
    fn test_registry_probes_resolved_columns_only() {
        let batch = SampleBatch::new(vec![sample_with_device(1000, "data", Some(35.0))]);
        let registry = DeviceRegistry::probe(&batch);

        assert!(registry.has_column("data", DeviceField::Util));
        assert!(registry.has_column("data", DeviceField::TotalIops));
        assert!(!registry.has_column("data", DeviceField::AvgAwait));
        assert!(registry.resolve("accounts").is_none());
    }

    #[test]
    fn test_registry_resolves_column_present_in_any_sample() {
        // util missing in the first sample, present in the second
        let batch = SampleBatch::new(vec![
            sample_with_device(1000, "data", None),
            sample_with_device(2000, "data", Some(70.0)),
        ]);
        let registry = DeviceRegistry::probe(&batch);
        assert!(registry.has_column("data", DeviceField::Util));
    }

    #[test]
    fn test_first_with_honors_priority_order() {
        let batch = SampleBatch::new(vec![
            sample_with_device(1000, "accounts", Some(10.0)),
            sample_with_device(1000, "data", Some(20.0)),
        ]);
        let registry = DeviceRegistry::probe(&batch);

        let priority = vec!["data".to_string(), "accounts".to_string()];
        assert_eq!(
            registry.first_with(&priority, DeviceField::Util),
            Some("data".to_string())
        );

        // A prefix outside the priority list is still found, after it
        let priority = vec!["journal".to_string()];
        assert_eq!(
            registry.first_with(&priority, DeviceField::Util),
            Some("accounts".to_string())
        );
    }

    #[test]
    fn test_absent_device_yields_none_not_zero() {
        let batch = SampleBatch::new(vec![sample_with_device(1000, "data", Some(35.0))]);
        let metric = Metric::device("accounts", DeviceField::Util);
        assert_eq!(metric.value(&batch.samples()[0]), None);
    }
}
