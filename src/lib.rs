pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod metadata;
mod metrics;
pub mod normalize;
pub mod preprocess;
pub mod query;
pub mod server;
pub mod utils;

pub use catalog::Catalog;
pub use config::Opts;
pub use error::{FaceSearchError, Result};
pub use extractor::{BoundingBox, FaceCrop, FaceExtractor};
pub use index::FlatIndex;
pub use metadata::MetadataStore;
pub use query::{QueryService, QuerySettings};
