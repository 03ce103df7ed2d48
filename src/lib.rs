pub mod archive;
pub mod args;
pub mod backend;
pub mod catalog;
pub mod http;
pub mod logging;
pub mod params;
pub mod report;
pub mod runner;
pub mod utils;
pub mod validate;

pub use args::{Args, CatalogKind};
pub use backend::{AggregationBackend, AggregationQuery, BigQueryBackend, TokenProvider};
pub use catalog::{EventCatalog, EventTypeSource};
pub use logging::{setup_logging, Verbosity};
pub use params::{CommandParams, QueryParams, ResultRow};
pub use report::{OutputTarget, ReportFormatter};
pub use runner::{CommandRunner, Mode, RunOutcome};
pub use validate::{InputValidator, Limits, ValidationError};
