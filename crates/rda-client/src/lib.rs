//! Client for the RDA (Raster Data Access) API.
//!
//! The pieces fit together like this: a [`Template`] handle wraps a template
//! id plus its query parameters; [`Template::metadata`] describes the image
//! the template evaluates to; [`Metadata::subset`] turns a pixel or projected
//! sub-window into an integer [`TileWindow`]; [`Template::realize`] downloads
//! every tile in that window concurrently; and [`Template::batch_materialize`]
//! plus [`fetch_batch_status`] drive server-side batch jobs instead.

pub mod batch;
pub mod catalog;
pub mod endpoints;
pub mod graph;
pub mod http;
pub mod metadata;
pub mod realize;
pub mod rpc;
pub mod template;

pub use batch::{fetch_batch_status, BatchFormat, BatchJob, BatchRequest, BatchStatus};
pub use catalog::{ImageParts, PartMetadata};
pub use endpoints::Endpoints;
pub use graph::TemplateGraph;
pub use http::{HttpClient, HttpConfig};
pub use metadata::{DataType, ImageMetadata, Metadata, PixelWindow, ProjectedWindow, TileWindow};
pub use realize::{ProgressFn, RealizeOutcome, TileInfo};
pub use rpc::RpcSidecar;
pub use template::Template;
