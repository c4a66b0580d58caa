//! Metrics definitions for parent config generation.

use shared::metrics_defs::{MetricDef, MetricType};

pub const PARENT_CONFIG_GENERATED: MetricDef = MetricDef {
    name: "parent_config.generated",
    metric_type: MetricType::Counter,
    description: "Number of parent.config files generated",
};

pub const PARENT_CONFIG_FAILED: MetricDef = MetricDef {
    name: "parent_config.failed",
    metric_type: MetricType::Counter,
    description: "Number of parent.config requests that failed, tagged by reason",
};

pub const GENERATION_DURATION: MetricDef = MetricDef {
    name: "parent_config.generation.duration",
    metric_type: MetricType::Histogram,
    description: "Time to generate one parent.config in seconds",
};

pub const TOPOLOGY_LOAD_DURATION: MetricDef = MetricDef {
    name: "topology.load.duration",
    metric_type: MetricType::Histogram,
    description: "Time to load a topology snapshot from its source in seconds",
};

pub const DATA_QUALITY_WARNINGS: MetricDef = MetricDef {
    name: "topology.data_quality.warnings",
    metric_type: MetricType::Counter,
    description: "Number of topology records skipped or defaulted, tagged by kind",
};

pub const ALL_METRICS: &[MetricDef] = &[
    PARENT_CONFIG_GENERATED,
    PARENT_CONFIG_FAILED,
    GENERATION_DURATION,
    TOPOLOGY_LOAD_DURATION,
    DATA_QUALITY_WARNINGS,
];
