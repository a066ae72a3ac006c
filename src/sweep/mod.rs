pub mod service;

pub use service::{SweepConfig, SweepError, SweepService, SweepSummary};
