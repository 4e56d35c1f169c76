// Utils

pub mod prometheus_metrics;
pub mod utils;

pub use utils::{init_tracing, setup_prometheus_metrics};
