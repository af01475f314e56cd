pub mod control_service;
pub mod health_service;
pub mod ingest_service;

pub use control_service::ControlService;
pub use health_service::{HealthService, HealthSignals};
pub use ingest_service::{IngestError, IngestService};
