pub mod audit_repository;
pub mod call_ledger_repository;
pub mod credentials_repository;
pub mod error;
pub mod location_repository;
pub mod models;
pub mod observation_repository;
pub mod tracking_repository;

pub use audit_repository::AuditRepository;
pub use call_ledger_repository::{CallLedgerRepository, OutcomeCounts};
pub use credentials_repository::CredentialsRepository;
pub use error::DbError;
pub use location_repository::LocationRepository;
pub use models::*;
pub use observation_repository::ObservationRepository;
pub use tracking_repository::TrackingRepository;
