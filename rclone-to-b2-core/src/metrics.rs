//! Maps run statistics onto the fixed Prometheus schema of the job.
//!
//! [`RunStatsCollector`] plays both registry phases: `desc` declares the
//! thirteen gauges and `collect` emits one sample each. The statistics are
//! read when the collector is built, so a missing or mistyped value stops the
//! run before anything reaches the registry.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::Registry;
use tracing::debug;

use crate::error::MetricsError;
use crate::stats::RunStatistics;

pub const NAMESPACE: &str = "rclone";
pub const INSTANCE_LABEL: &str = "instance";
pub const LAST_SUCCESS_METRIC: &str = "job_last_success_unixtime";

#[derive(Debug, Clone, Copy, PartialEq)]
enum StatKind {
    Counter,
    /// Floating point value multiplied by the factor.
    Rate(f64),
}

#[derive(Debug, Clone, Copy)]
struct StatMetric {
    name: &'static str,
    help: &'static str,
    stat: &'static str,
    kind: StatKind,
}

const STAT_METRICS: [StatMetric; 12] = [
    StatMetric {
        name: "error_count",
        help: "Number of errors encountered by rclone",
        stat: "errors",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "check_count",
        help: "Number of checks performed by rclone",
        stat: "checks",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "check_total_count",
        help: "Total number of checks to be performed by rclone",
        stat: "totalChecks",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "transfers_count",
        help: "Number of transfers performed by rclone",
        stat: "transfers",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "transfers_total_count",
        help: "Total number of transfers to be performed by rclone",
        stat: "totalTransfers",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "deleted_dirs",
        help: "Number of directories deleted by rclone",
        stat: "deletedDirs",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "deleted_files",
        help: "Number of files deleted by rclone",
        stat: "deletes",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "renamed_files",
        help: "Number of files renamed by rclone",
        stat: "renames",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "elapsed_time",
        help: "Elapsed time that rclone has run, in milliseconds",
        stat: "elapsedTime",
        kind: StatKind::Rate(1000.0),
    },
    StatMetric {
        name: "transfer_speed",
        help: "Transfer speed for rclone, in bytes/second",
        stat: "speed",
        kind: StatKind::Rate(1.0),
    },
    StatMetric {
        name: "transfer_bytes",
        help: "Number of bytes transferred by rclone",
        stat: "bytes",
        kind: StatKind::Counter,
    },
    StatMetric {
        name: "transfer_total_bytes",
        help: "Total number of bytes to be transferred by rclone",
        stat: "totalBytes",
        kind: StatKind::Counter,
    },
];

/// One exported value with its instance label.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub instance: String,
    pub value: f64,
}

fn descriptors() -> Result<Vec<Desc>, prometheus::Error> {
    let last_success = Desc::new(
        LAST_SUCCESS_METRIC.to_string(),
        "Last time a batch job successfully finished".to_string(),
        vec![INSTANCE_LABEL.to_string()],
        HashMap::new(),
    )?;
    std::iter::once(Ok(last_success))
        .chain(STAT_METRICS.iter().map(|m| {
            Desc::new(
                format!("{NAMESPACE}_{}", m.name),
                m.help.to_string(),
                vec![INSTANCE_LABEL.to_string()],
                HashMap::new(),
            )
        }))
        .collect()
}

/// Reads every statistic and converts it into a sample labeled with `instance`.
///
/// The first sample is the last-success timestamp taken from `now`.
pub fn collect_samples(
    stats: &RunStatistics,
    instance: &str,
    now: SystemTime,
) -> Result<Vec<MetricSample>, MetricsError> {
    let unix_time = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let mut samples = Vec::with_capacity(STAT_METRICS.len() + 1);
    samples.push(MetricSample {
        name: LAST_SUCCESS_METRIC.to_string(),
        instance: instance.to_string(),
        value: unix_time,
    });

    for metric in &STAT_METRICS {
        let value = match metric.kind {
            StatKind::Counter => stats.counter(metric.stat)? as f64,
            StatKind::Rate(scale) => stats.rate(metric.stat)? * scale,
        };
        samples.push(MetricSample {
            name: format!("{NAMESPACE}_{}", metric.name),
            instance: instance.to_string(),
            value,
        });
    }
    debug!(samples = samples.len(), instance, "Collected run statistics");
    Ok(samples)
}

/// Registry collector exposing the samples of one finished run.
#[derive(Debug)]
pub struct RunStatsCollector {
    descs: Vec<Desc>,
    samples: Vec<MetricSample>,
}

impl RunStatsCollector {
    pub fn new(instance: &str, stats: &RunStatistics) -> Result<Self, MetricsError> {
        Self::at(instance, stats, SystemTime::now())
    }

    /// Like [`RunStatsCollector::new`] with an explicit last-success time.
    pub fn at(instance: &str, stats: &RunStatistics, now: SystemTime) -> Result<Self, MetricsError> {
        let samples = collect_samples(stats, instance, now)?;
        Ok(Self {
            descs: descriptors()?,
            samples,
        })
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Registers the collector in a fresh registry.
    pub fn into_registry(self) -> Result<Registry, MetricsError> {
        let registry = Registry::new();
        registry.register(Box::new(self))?;
        Ok(registry)
    }
}

fn gauge_family(desc: &Desc, sample: &MetricSample) -> MetricFamily {
    let mut label = LabelPair::default();
    label.set_name(INSTANCE_LABEL.to_string());
    label.set_value(sample.instance.clone());

    let mut gauge = Gauge::default();
    gauge.set_value(sample.value);

    let mut metric = Metric::default();
    metric.set_label(vec![label].into());
    metric.set_gauge(gauge);

    let mut family = MetricFamily::default();
    family.set_name(desc.fq_name.clone());
    family.set_help(desc.help.clone());
    family.set_field_type(MetricType::GAUGE);
    family.set_metric(vec![metric].into());
    family
}

impl Collector for RunStatsCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.descs
            .iter()
            .zip(&self.samples)
            .map(|(desc, sample)| gauge_family(desc, sample))
            .collect()
    }
}
