pub mod config;
pub mod correlate;
pub mod detection;
pub mod ingest;
pub mod models;
pub mod report;
pub mod scoring;

// Re-export commonly used types
pub use config::{Config, CorrelationConfig, DetectionConfig};
pub use correlate::correlate_cases;
pub use detection::run_all_detectors;
pub use ingest::parse_jsonl;
pub use models::{Alert, AuthEvent, AuthResult, Case, Detector, Severity};
