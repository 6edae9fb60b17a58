//! Well-Known Text serialization for bounding boxes.

use std::fmt;

use crate::georef::ImageGeoreferencing;

/// A bounding box that renders itself as a WKT polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WktBox {
    pub ulx: f64,
    pub uly: f64,
    pub lrx: f64,
    pub lry: f64,
}

impl WktBox {
    /// Build a WKT box from a source window and a geo referencing: the
    /// transform is applied to the window's upper-left and lower-right
    /// corners.
    pub fn from_window(
        x_off: i64,
        y_off: i64,
        x_size: i64,
        y_size: i64,
        gt: &ImageGeoreferencing,
    ) -> WktBox {
        let (ulx, uly) = gt.apply(x_off as f64, y_off as f64);
        let (lrx, lry) = gt.apply((x_off + x_size) as f64, (y_off + y_size) as f64);
        WktBox { ulx, uly, lrx, lry }
    }
}

impl fmt::Display for WktBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Five points, first == last, closing the ring.
        write!(
            f,
            "POLYGON (({:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}, {:.6} {:.6}))",
            self.ulx, self.uly, self.lrx, self.uly, self.lrx, self.lry, self.ulx, self.lry,
            self.ulx, self.uly
        )
    }
}
