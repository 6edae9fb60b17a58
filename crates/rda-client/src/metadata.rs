//! The RDA metadata model: image dimensions, tile layout, georeferencing,
//! and the mapping from pixel/projected sub-windows to tile windows.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rda_common::{ImageGeoreferencing, RdaError, RdaResult, WktBox};
use serde::{Deserialize, Serialize};

/// Everything the RDA metadata endpoint reports for a (template, parameters)
/// pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub image_metadata: ImageMetadata,
    pub image_georeferencing: ImageGeoreferencing,
}

/// Metadata specific to the image itself, i.e. unrelated to the geo aspect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageMetadata {
    pub image_width: i64,
    pub image_height: i64,
    pub num_bands: i64,
    pub min_x: i64,
    pub min_y: i64,
    pub data_type: String,

    pub tile_x_size: i64,
    pub tile_y_size: i64,
    #[serde(flatten)]
    pub tile_window: TileWindow,

    pub acquisition_date: Option<DateTime<Utc>>,
    pub image_id: String,
    pub tile_bucket_name: String,
}

/// An integer rectangle of tile coordinates, along with the geo transform
/// appropriate for tile (rather than pixel) coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TileWindow {
    pub num_x_tiles: i64,
    pub num_y_tiles: i64,
    pub min_tile_x: i64,
    pub min_tile_y: i64,
    pub max_tile_x: i64,
    pub max_tile_y: i64,

    #[serde(skip)]
    pub(crate) tile_geo_transform: ImageGeoreferencing,
}

impl TileWindow {
    /// The geo transform mapping tile coordinates to geo coordinates.
    pub fn tile_georeferencing(&self) -> &ImageGeoreferencing {
        &self.tile_geo_transform
    }

    /// Number of tiles in the window.
    pub fn num_tiles(&self) -> i64 {
        self.num_x_tiles * self.num_y_tiles
    }

    /// WKT polygon covering the window in geo space, built from the
    /// tile-space transform so crops align to tile edges. A zero window has
    /// no WKT representation.
    pub fn wkt(&self) -> Option<WktBox> {
        if *self == TileWindow::default() {
            return None;
        }
        Some(WktBox::from_window(
            self.min_tile_x,
            self.min_tile_y,
            self.num_x_tiles,
            self.num_y_tiles,
            &self.tile_geo_transform,
        ))
    }
}

/// A pixel-space sub-window: offsets plus sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelWindow {
    pub x_off: i64,
    pub y_off: i64,
    pub x_size: i64,
    pub y_size: i64,
}

impl FromStr for PixelWindow {
    type Err = RdaError;

    /// Parse `xoff,yoff,xsize,ysize`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(RdaError::InvalidWindow(format!(
                "expected xoff,yoff,xsize,ysize, got {:?}",
                s
            )));
        }
        let mut vals = [0i64; 4];
        for (v, part) in vals.iter_mut().zip(&parts) {
            *v = part.trim().parse().map_err(|_| {
                RdaError::InvalidWindow(format!("{:?} is not an integer", part.trim()))
            })?;
        }
        Ok(PixelWindow {
            x_off: vals[0],
            y_off: vals[1],
            x_size: vals[2],
            y_size: vals[3],
        })
    }
}

/// A projected-space sub-window: upper-left and lower-right corners.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectedWindow {
    pub ulx: f64,
    pub uly: f64,
    pub lrx: f64,
    pub lry: f64,
}

impl FromStr for ProjectedWindow {
    type Err = RdaError;

    /// Parse `ulx,uly,lrx,lry`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(RdaError::InvalidWindow(format!(
                "expected ulx,uly,lrx,lry, got {:?}",
                s
            )));
        }
        let mut vals = [0f64; 4];
        for (v, part) in vals.iter_mut().zip(&parts) {
            *v = part.trim().parse().map_err(|_| {
                RdaError::InvalidWindow(format!("{:?} is not a number", part.trim()))
            })?;
        }
        Ok(ProjectedWindow {
            ulx: vals[0],
            uly: vals[1],
            lrx: vals[2],
            lry: vals[3],
        })
    }
}

impl Metadata {
    /// Decode a metadata payload and derive the cached tile geo transform.
    pub fn from_json(s: &str) -> RdaResult<Metadata> {
        let mut md: Metadata = serde_json::from_str(s)?;
        md.finalize();
        Ok(md)
    }

    /// Derive the tile-space geo transform from the pixel-space one. Must
    /// run after decoding; [`Metadata::from_json`] does it for you.
    pub(crate) fn finalize(&mut self) {
        // A missing georeferencing object never went through the custom
        // decoder, so apply the ungeoreferenced fallback here too.
        if self.image_georeferencing.is_zero() {
            self.image_georeferencing.scale_x = 1.0;
            self.image_georeferencing.scale_y = -1.0;
        }

        let mut tile_gt = self.image_georeferencing.clone();
        let xsize = self.image_metadata.tile_x_size as f64;
        let ysize = self.image_metadata.tile_y_size as f64;
        // Tile x advances tile_x_size pixels, tile y advances tile_y_size,
        // so the x-scale and y-shear pick up the x factor and vice versa.
        tile_gt.scale_x *= xsize;
        tile_gt.shear_x *= ysize;
        tile_gt.scale_y *= ysize;
        tile_gt.shear_y *= xsize;
        self.image_metadata.tile_window.tile_geo_transform = tile_gt;
    }

    /// The geo transform appropriate for tile coordinates.
    pub fn tile_georeferencing(&self) -> &ImageGeoreferencing {
        &self.image_metadata.tile_window.tile_geo_transform
    }

    /// Return the tile window holding the tiles that contain the pixel-space
    /// subset provided. If the inputs are all zero, the metadata's own tile
    /// window (the entire image) is returned.
    pub fn subset(
        &self,
        x_off: i64,
        y_off: i64,
        x_size: i64,
        y_size: i64,
    ) -> RdaResult<TileWindow> {
        let im = &self.image_metadata;
        if x_off == 0 && y_off == 0 && x_size == 0 && y_size == 0 {
            return Ok(im.tile_window.clone());
        }
        if x_size < 1 || y_size < 1 {
            return Err(RdaError::InvalidWindow(format!(
                "(x_size, y_size) = ({}, {}), but must be positive",
                x_size, y_size
            )));
        }
        if x_off + x_size <= 0 || y_off + y_size <= 0 || x_off >= im.image_width || y_off >= im.image_height
        {
            return Err(RdaError::OutOfImage(format!(
                "requested window ({},{}) - ({},{}) not contained in image window (0,0) - ({},{})",
                x_off,
                y_off,
                x_off + x_size,
                y_off + y_size,
                im.image_width,
                im.image_height
            )));
        }

        let inv_tile_gt = im.tile_window.tile_geo_transform.invert()?;

        let (x_geo_tl, y_geo_tl) = self.image_georeferencing.apply(x_off as f64, y_off as f64);
        let (x_geo_lr, y_geo_lr) = self
            .image_georeferencing
            .apply((x_off + x_size - 1) as f64, (y_off + y_size - 1) as f64);

        let (x_tile_tl, y_tile_tl) = inv_tile_gt.apply(x_geo_tl, y_geo_tl);
        let (x_tile_lr, y_tile_lr) = inv_tile_gt.apply(x_geo_lr, y_geo_lr);

        let mut tw = im.tile_window.clone();
        tw.min_tile_x = x_tile_tl.floor() as i64;
        tw.min_tile_y = y_tile_tl.floor() as i64;
        tw.max_tile_x = x_tile_lr.floor() as i64;
        tw.max_tile_y = y_tile_lr.floor() as i64;

        // Truncate to fit into the image's own tile extents.
        tw.min_tile_x = tw.min_tile_x.max(im.tile_window.min_tile_x);
        tw.max_tile_x = tw.max_tile_x.min(im.tile_window.max_tile_x);
        tw.min_tile_y = tw.min_tile_y.max(im.tile_window.min_tile_y);
        tw.max_tile_y = tw.max_tile_y.min(im.tile_window.max_tile_y);

        tw.num_x_tiles = tw.max_tile_x - tw.min_tile_x + 1;
        tw.num_y_tiles = tw.max_tile_y - tw.min_tile_y + 1;

        Ok(tw)
    }

    /// Like [`Metadata::subset`], but the window is given in projected
    /// coordinates and mapped through the inverse image geo transform first
    /// (flooring the upper-left corner, ceiling the sizes).
    pub fn subset_projected(&self, ulx: f64, uly: f64, lrx: f64, lry: f64) -> RdaResult<TileWindow> {
        let igt = self.image_georeferencing.invert()?;

        let (x_off_f, y_off_f) = igt.apply(ulx, uly);
        let (x_lr_f, y_lr_f) = igt.apply(lrx, lry);

        self.subset(
            x_off_f.floor() as i64,
            y_off_f.floor() as i64,
            (x_lr_f - x_off_f).ceil() as i64,
            (y_lr_f - y_off_f).ceil() as i64,
        )
    }

    /// Resolve an optional pixel window and an optional projected window to
    /// a tile window. Supplying both is ambiguous and refused.
    pub fn resolve_window(
        &self,
        pixel: Option<PixelWindow>,
        projected: Option<ProjectedWindow>,
    ) -> RdaResult<TileWindow> {
        match (pixel, projected) {
            (Some(_), Some(_)) => Err(RdaError::InvalidWindow(
                "a pixel window and a projected window cannot be set at the same time".to_string(),
            )),
            (Some(w), None) => self.subset(w.x_off, w.y_off, w.x_size, w.y_size),
            (None, Some(w)) => self.subset_projected(w.ulx, w.uly, w.lrx, w.lry),
            (None, None) => self.subset(0, 0, 0, 0),
        }
    }
}

/// The closed set of pixel data types RDA reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Byte,
    Short,
    UnsignedShort,
    Integer,
    UnsignedInteger,
    Float,
    Double,
}

impl DataType {
    /// Parse an RDA data type token (case-insensitive).
    pub fn from_rda(s: &str) -> RdaResult<DataType> {
        match s.to_lowercase().as_str() {
            "byte" => Ok(DataType::Byte),
            "short" => Ok(DataType::Short),
            "unsigned_short" => Ok(DataType::UnsignedShort),
            "integer" => Ok(DataType::Integer),
            "unsigned_integer" => Ok(DataType::UnsignedInteger),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            _ => Err(RdaError::UnknownDataType(s.to_string())),
        }
    }

    /// The GDAL name for this data type, as written into VRTs.
    pub fn gdal_name(self) -> &'static str {
        match self {
            DataType::Byte => "Byte",
            DataType::Short => "Int16",
            DataType::UnsignedShort => "UInt16",
            DataType::Integer => "Int32",
            DataType::UnsignedInteger => "UInt32",
            DataType::Float => "Float32",
            DataType::Double => "Float64",
        }
    }
}
