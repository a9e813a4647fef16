pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod historical;
pub mod matchers;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod quality;
pub mod store;

pub use config::PipelineConfig;
pub use detect::{detect, DetectOptions, Detection, SchemaKind};
pub use error::{IngestError, Result};
pub use fetch::{CenaceClient, DemandSource, FetchCache};
pub use historical::load_tidy;
pub use merge::merge;
pub use models::{FetchResult, NormalizedTable, Provenance, RawTable, Stamp, Zone, ZoneSeries};
pub use normalize::{normalize, read_raw};
pub use quality::{report, QualityReport};
pub use store::CleanStore;
