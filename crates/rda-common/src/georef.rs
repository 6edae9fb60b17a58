//! Affine georeferencing: the 6-parameter transform mapping pixel
//! coordinates to geographic coordinates, and its inverse.

use serde::{Deserialize, Serialize};

use crate::error::{RdaError, RdaResult};

/// Determinants smaller than this are treated as singular.
const DET_EPSILON: f64 = 1e-15;

/// A geo transform (an affine transform) plus its spatial reference code.
///
/// Maps pixel space to geo space via
/// `(x, y) -> (translate_x + scale_x*x + shear_x*y, translate_y + shear_y*x + scale_y*y)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGeoreferencing {
    #[serde(default)]
    pub spatial_reference_system_code: String,

    pub translate_x: f64,
    pub scale_x: f64,
    pub shear_x: f64,

    pub translate_y: f64,
    pub shear_y: f64,
    pub scale_y: f64,
}

impl ImageGeoreferencing {
    /// Apply the geo transform to a pixel coordinate, returning the
    /// corresponding geo coordinate (or a pixel coordinate, if this is an
    /// inverted transform).
    pub fn apply(&self, x_pix: f64, y_pix: f64) -> (f64, f64) {
        (
            self.translate_x + self.scale_x * x_pix + self.shear_x * y_pix,
            self.translate_y + self.shear_y * x_pix + self.scale_y * y_pix,
        )
    }

    /// Return an inverse geo referencing, i.e. one that maps geo coordinates
    /// back to pixel coordinates.
    pub fn invert(&self) -> RdaResult<ImageGeoreferencing> {
        // Same split as GDALInvGeoTransform: a simplified path for the
        // common no-shear case, the 2x2 determinant otherwise.
        if self.shear_x == 0.0 && self.shear_y == 0.0 && self.scale_x != 0.0 && self.scale_y != 0.0
        {
            return Ok(self.easy_invert());
        }
        self.hard_invert()
    }

    fn easy_invert(&self) -> ImageGeoreferencing {
        ImageGeoreferencing {
            spatial_reference_system_code: self.spatial_reference_system_code.clone(),
            translate_x: -self.translate_x / self.scale_x,
            scale_x: 1.0 / self.scale_x,
            shear_x: 0.0,
            translate_y: -self.translate_y / self.scale_y,
            shear_y: 0.0,
            scale_y: 1.0 / self.scale_y,
        }
    }

    fn hard_invert(&self) -> RdaResult<ImageGeoreferencing> {
        // General case; the third row of the affine matrix is assumed [0 0 1].
        let det = self.scale_x * self.scale_y - self.shear_x * self.shear_y;
        if det.abs() < DET_EPSILON {
            return Err(RdaError::NonInvertible(format!("{:?}", self)));
        }
        let inv_det = 1.0 / det;

        Ok(ImageGeoreferencing {
            spatial_reference_system_code: self.spatial_reference_system_code.clone(),

            scale_x: self.scale_y * inv_det,
            shear_y: -self.shear_y * inv_det,

            shear_x: -self.shear_x * inv_det,
            scale_y: self.scale_x * inv_det,

            translate_x: (self.shear_x * self.translate_y - self.translate_x * self.scale_y)
                * inv_det,
            translate_y: (-self.scale_x * self.translate_y + self.translate_x * self.shear_y)
                * inv_det,
        })
    }

    /// True when every numeric coefficient is zero.
    pub fn is_zero(&self) -> bool {
        self.translate_x == 0.0
            && self.scale_x == 0.0
            && self.shear_x == 0.0
            && self.translate_y == 0.0
            && self.shear_y == 0.0
            && self.scale_y == 0.0
    }
}

impl<'de> Deserialize<'de> for ImageGeoreferencing {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Default, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            #[serde(default)]
            spatial_reference_system_code: String,
            #[serde(default)]
            translate_x: f64,
            #[serde(default)]
            scale_x: f64,
            #[serde(default)]
            shear_x: f64,
            #[serde(default)]
            translate_y: f64,
            #[serde(default)]
            shear_y: f64,
            #[serde(default)]
            scale_y: f64,
        }

        // The server may hand back `null` for ungeoreferenced imagery.
        let w = Option::<Wire>::deserialize(deserializer)?.unwrap_or_default();
        let mut gt = ImageGeoreferencing {
            spatial_reference_system_code: w.spatial_reference_system_code,
            translate_x: w.translate_x,
            scale_x: w.scale_x,
            shear_x: w.shear_x,
            translate_y: w.translate_y,
            shear_y: w.shear_y,
            scale_y: w.scale_y,
        };

        // A null/zero geo transform still has to map pixels somewhere; use
        // the same pseudo-geo frame GDAL picks for ungeoreferenced images.
        if gt.is_zero() {
            gt.scale_x = 1.0;
            gt.scale_y = -1.0;
        }

        Ok(gt)
    }
}
