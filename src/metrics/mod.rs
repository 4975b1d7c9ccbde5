mod exposition;
mod registry;
mod snapshot;

pub use exposition::CONTENT_TYPE;
pub use registry::MetricRegistry;
pub use snapshot::{MetricSample, Snapshot};

#[cfg(test)]
pub use snapshot::{Gauge, InsightGroup};
