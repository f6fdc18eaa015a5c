pub mod collector;
pub mod state;

pub use collector::ViewTelemetryCollector;
pub use state::{
    ReportKind, TelemetryReport, Thresholds, WatchSession, WatchSnapshot, WatchStatus,
};
