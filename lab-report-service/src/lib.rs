pub mod dashboard;
pub mod error;
pub mod extract;
pub mod known_signals;
pub mod models;
pub mod service;
pub mod store;

pub use error::{ExtractError, StoreError};
pub use extract::{CompletionBackend, EntryPoint, LlmClient, run_pipeline};
pub use models::*;
pub use service::{AppState, create_app};
pub use store::{InMemoryReportStore, PostgresReportStore, ReportStore};
