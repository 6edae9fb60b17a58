//! Virtual raster (VRT) composition.
//!
//! A VRT is a small XML document that presents many tile files as one
//! logical raster without copying pixels. [`compose`] assembles one from a
//! realized tile set; [`RpcSidecar`] supplies the optional RPC camera-model
//! metadata block.

pub mod dataset;
pub mod rpc;

pub use dataset::{
    compose, Rect, SimpleSource, SourceProperties, VrtDataset, VrtMetadata, VrtMetadataSource,
    VrtRasterBand,
};
pub use rpc::RpcSidecar;
