//! The VRT document model and its composition from realized tiles.

use std::path::Path;

use rda_client::{DataType, Metadata, TileInfo};
use rda_common::RdaResult;
use tracing::debug;

/// The root of a VRT document.
#[derive(Debug, Clone, PartialEq)]
pub struct VrtDataset {
    pub raster_x_size: i64,
    pub raster_y_size: i64,
    pub srs: Option<String>,
    pub geo_transform: Option<[f64; 6]>,
    pub metadata: Option<VrtMetadata>,
    pub bands: Vec<VrtRasterBand>,
}

/// A `<Metadata domain="...">` block of key/value items.
#[derive(Debug, Clone, PartialEq)]
pub struct VrtMetadata {
    pub domain: String,
    pub items: Vec<(String, String)>,
}

/// Anything able to produce a VRT metadata block. RPC side-cars today;
/// other camera models tomorrow.
pub trait VrtMetadataSource {
    fn to_vrt_metadata(&self) -> RdaResult<VrtMetadata>;
}

/// One band of the virtual raster.
#[derive(Debug, Clone, PartialEq)]
pub struct VrtRasterBand {
    pub data_type: String,
    pub band: i64,
    pub sources: Vec<SimpleSource>,
}

/// One tile's contribution to a band.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleSource {
    pub filename: String,
    pub relative_to_vrt: bool,
    pub shared: bool,
    pub source_band: i64,
    pub source_properties: SourceProperties,
    pub src_rect: Rect,
    pub dst_rect: Rect,
}

/// Block layout and type of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProperties {
    pub raster_x_size: i64,
    pub raster_y_size: i64,
    pub data_type: String,
    pub block_x_size: i64,
    pub block_y_size: i64,
}

/// A pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_off: i64,
    pub y_off: i64,
    pub x_size: i64,
    pub y_size: i64,
}

fn tile_extents(tiles: &[TileInfo]) -> (i64, i64, i64, i64) {
    let (mut min_x, mut min_y, mut max_x, mut max_y) = match tiles.first() {
        Some(t) => (t.x_tile, t.y_tile, t.x_tile, t.y_tile),
        None => (0, 0, 0, 0),
    };
    for tile in tiles {
        min_x = min_x.min(tile.x_tile);
        min_y = min_y.min(tile.y_tile);
        max_x = max_x.max(tile.x_tile);
        max_y = max_y.max(tile.y_tile);
    }
    (min_x, min_y, max_x, max_y)
}

/// Compose a VRT from realized tiles and the metadata they came from.
/// Tile order does not matter; only the `(x_tile, y_tile)` coordinates do.
pub fn compose(
    md: &Metadata,
    tiles: &[TileInfo],
    sidecar: Option<&dyn VrtMetadataSource>,
) -> RdaResult<VrtDataset> {
    let im = &md.image_metadata;
    let (min_x_tile, min_y_tile, max_x_tile, max_y_tile) = tile_extents(tiles);
    let num_x_tiles = max_x_tile - min_x_tile + 1;
    let num_y_tiles = max_y_tile - min_y_tile + 1;

    let mut vrt = VrtDataset {
        raster_x_size: im.tile_x_size * num_x_tiles,
        raster_y_size: im.tile_y_size * num_y_tiles,
        srs: None,
        geo_transform: None,
        metadata: None,
        bands: Vec::with_capacity(im.num_bands as usize),
    };

    if let Some(sidecar) = sidecar {
        vrt.metadata = Some(sidecar.to_vrt_metadata()?);
    }

    let tile_gt = md.tile_georeferencing();
    if !tile_gt.spatial_reference_system_code.is_empty() {
        let (tx, ty) = tile_gt.apply(min_x_tile as f64, min_y_tile as f64);
        let img_gt = &md.image_georeferencing;
        vrt.srs = Some(img_gt.spatial_reference_system_code.clone());
        vrt.geo_transform = Some([
            tx,
            img_gt.scale_x,
            img_gt.shear_x,
            ty,
            img_gt.shear_y,
            img_gt.scale_y,
        ]);
    } else {
        // Ungeoreferenced imagery gets exact pixel dimensions instead of
        // the tiled bounds.
        vrt.raster_x_size = im.image_width;
        vrt.raster_y_size = im.image_height;
    }

    let gdal_type = DataType::from_rda(&im.data_type)?.gdal_name();

    // Identical for every tile RDA hands back.
    let src_props = SourceProperties {
        raster_x_size: im.tile_x_size,
        raster_y_size: im.tile_y_size,
        data_type: gdal_type.to_string(),
        block_x_size: im.tile_x_size,
        block_y_size: im.tile_y_size,
    };
    let src_rect = Rect {
        x_off: 0,
        y_off: 0,
        x_size: im.tile_x_size,
        y_size: im.tile_y_size,
    };

    for b in 1..=im.num_bands {
        let mut band = VrtRasterBand {
            data_type: gdal_type.to_string(),
            band: b,
            sources: Vec::with_capacity(tiles.len()),
        };
        for tile in tiles {
            band.sources.push(SimpleSource {
                filename: tile.file_path.to_string_lossy().into_owned(),
                relative_to_vrt: true,
                shared: false,
                source_band: b,
                source_properties: src_props.clone(),
                src_rect,
                dst_rect: Rect {
                    x_off: (tile.x_tile - min_x_tile) * im.tile_x_size,
                    y_off: (tile.y_tile - min_y_tile) * im.tile_y_size,
                    x_size: im.tile_x_size,
                    y_size: im.tile_y_size,
                },
            });
        }
        vrt.bands.push(band);
    }

    debug!(
        raster_x = vrt.raster_x_size,
        raster_y = vrt.raster_y_size,
        bands = vrt.bands.len(),
        tiles = tiles.len(),
        "composed VRT"
    );
    Ok(vrt)
}

impl VrtDataset {
    /// Render the document as XML.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(&format!(
            "<VRTDataset rasterXSize=\"{}\" rasterYSize=\"{}\">\n",
            self.raster_x_size, self.raster_y_size
        ));

        if let Some(srs) = &self.srs {
            xml.push_str(&format!("  <SRS>{}</SRS>\n", escape_text(srs)));
        }
        if let Some(gt) = &self.geo_transform {
            xml.push_str(&format!("  <GeoTransform>{}</GeoTransform>\n", format_geo_transform(gt)));
        }
        if let Some(md) = &self.metadata {
            xml.push_str(&format!(
                "  <Metadata domain=\"{}\">\n",
                escape_attr(&md.domain)
            ));
            for (key, value) in &md.items {
                xml.push_str(&format!(
                    "    <MDI key=\"{}\">{}</MDI>\n",
                    escape_attr(key),
                    escape_text(value)
                ));
            }
            xml.push_str("  </Metadata>\n");
        }

        for band in &self.bands {
            xml.push_str(&format!(
                "  <VRTRasterBand dataType=\"{}\" band=\"{}\">\n",
                escape_attr(&band.data_type),
                band.band
            ));
            for source in &band.sources {
                xml.push_str("    <SimpleSource>\n");
                xml.push_str(&format!(
                    "      <SourceFilename relativeToVRT=\"{}\" shared=\"{}\">{}</SourceFilename>\n",
                    vrt_bool(source.relative_to_vrt),
                    vrt_bool(source.shared),
                    escape_text(&source.filename)
                ));
                xml.push_str(&format!(
                    "      <SourceBand>{}</SourceBand>\n",
                    source.source_band
                ));
                let p = &source.source_properties;
                xml.push_str(&format!(
                    "      <SourceProperties RasterXSize=\"{}\" RasterYSize=\"{}\" DataType=\"{}\" \
                     BlockXSize=\"{}\" BlockYSize=\"{}\" />\n",
                    p.raster_x_size,
                    p.raster_y_size,
                    escape_attr(&p.data_type),
                    p.block_x_size,
                    p.block_y_size
                ));
                xml.push_str(&format_rect("SrcRect", &source.src_rect));
                xml.push_str(&format_rect("DstRect", &source.dst_rect));
                xml.push_str("    </SimpleSource>\n");
            }
            xml.push_str("  </VRTRasterBand>\n");
        }

        xml.push_str("</VRTDataset>\n");
        xml
    }

    /// Write the document to `path`.
    pub fn write_to(&self, path: &Path) -> RdaResult<()> {
        std::fs::write(path, self.to_xml())?;
        Ok(())
    }
}

fn format_rect(name: &str, rect: &Rect) -> String {
    format!(
        "      <{} xOff=\"{}\" yOff=\"{}\" xSize=\"{}\" ySize=\"{}\" />\n",
        name, rect.x_off, rect.y_off, rect.x_size, rect.y_size
    )
}

fn vrt_bool(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// Render the six geo transform floats in 16-digit scientific notation,
/// comma-space separated.
fn format_geo_transform(gt: &[f64; 6]) -> String {
    gt.iter()
        .map(|&v| sci16(v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `%.16e`-style formatting: a 16-digit mantissa and a signed two-digit
/// exponent.
fn sci16(v: f64) -> String {
    let s = format!("{:.16e}", v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => s,
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rda_common::RdaError;
    use std::path::PathBuf;

    fn test_metadata(srs: bool) -> Metadata {
        let code = if srs { "EPSG:32611" } else { "" };
        Metadata::from_json(&format!(
            r#"{{
                "imageMetadata": {{
                    "imageWidth": 1000, "imageHeight": 500, "numBands": 3,
                    "dataType": "UNSIGNED_SHORT",
                    "tileXSize": 256, "tileYSize": 256,
                    "numXTiles": 4, "numYTiles": 2,
                    "minTileX": 0, "minTileY": 0, "maxTileX": 3, "maxTileY": 1
                }},
                "imageGeoreferencing": {{
                    "spatialReferenceSystemCode": "{}",
                    "translateX": 100, "scaleX": 2, "shearX": 0,
                    "translateY": 200, "shearY": 0, "scaleY": -2
                }}
            }}"#,
            code
        ))
        .unwrap()
    }

    fn tiles_2x2() -> Vec<TileInfo> {
        let mut tiles = Vec::new();
        // Deliberately unordered: order must not matter.
        for (x, y) in [(3i64, 1i64), (2, 0), (3, 0), (2, 1)] {
            tiles.push(TileInfo {
                file_path: PathBuf::from(format!("tiles/tile_{}_{}.tif", x, y)),
                x_tile: x,
                y_tile: y,
            });
        }
        tiles
    }

    #[test]
    fn test_compose_dimensions_and_sources() {
        let md = test_metadata(true);
        let vrt = compose(&md, &tiles_2x2(), None).unwrap();

        assert_eq!(vrt.raster_x_size, 512);
        assert_eq!(vrt.raster_y_size, 512);
        assert_eq!(vrt.bands.len(), 3);
        for (i, band) in vrt.bands.iter().enumerate() {
            assert_eq!(band.band, i as i64 + 1);
            assert_eq!(band.data_type, "UInt16");
            assert_eq!(band.sources.len(), 4);
        }

        // The tile at (2, 0) is the window origin.
        let source = vrt.bands[0]
            .sources
            .iter()
            .find(|s| s.filename.ends_with("tile_2_0.tif"))
            .unwrap();
        assert_eq!(
            source.dst_rect,
            Rect {
                x_off: 0,
                y_off: 0,
                x_size: 256,
                y_size: 256
            }
        );
        let far = vrt.bands[0]
            .sources
            .iter()
            .find(|s| s.filename.ends_with("tile_3_1.tif"))
            .unwrap();
        assert_eq!(
            far.dst_rect,
            Rect {
                x_off: 256,
                y_off: 256,
                x_size: 256,
                y_size: 256
            }
        );
        assert_eq!(
            far.src_rect,
            Rect {
                x_off: 0,
                y_off: 0,
                x_size: 256,
                y_size: 256
            }
        );
    }

    #[test]
    fn test_compose_geo_transform() {
        let md = test_metadata(true);
        let vrt = compose(&md, &tiles_2x2(), None).unwrap();

        assert_eq!(vrt.srs.as_deref(), Some("EPSG:32611"));
        // Tile (2, 0) maps through the tile transform (scale 512, -512).
        let gt = vrt.geo_transform.unwrap();
        assert_eq!(gt[0], 100.0 + 2.0 * 512.0);
        assert_eq!(gt[1], 2.0);
        assert_eq!(gt[2], 0.0);
        assert_eq!(gt[3], 200.0);
        assert_eq!(gt[4], 0.0);
        assert_eq!(gt[5], -2.0);
    }

    #[test]
    fn test_compose_without_srs_uses_image_dimensions() {
        let md = test_metadata(false);
        let vrt = compose(&md, &tiles_2x2(), None).unwrap();
        assert_eq!(vrt.raster_x_size, 1000);
        assert_eq!(vrt.raster_y_size, 500);
        assert!(vrt.srs.is_none());
        assert!(vrt.geo_transform.is_none());
    }

    #[test]
    fn test_compose_unknown_data_type() {
        let mut md = test_metadata(true);
        md.image_metadata.data_type = "COMPLEX".to_string();
        assert!(matches!(
            compose(&md, &tiles_2x2(), None),
            Err(RdaError::UnknownDataType(_))
        ));
    }

    struct FakeSidecar;

    impl VrtMetadataSource for FakeSidecar {
        fn to_vrt_metadata(&self) -> RdaResult<VrtMetadata> {
            Ok(VrtMetadata {
                domain: "RPC".to_string(),
                items: vec![("HEIGHT_OFF".to_string(), "23".to_string())],
            })
        }
    }

    #[test]
    fn test_xml_rendering() {
        let md = test_metadata(true);
        let vrt = compose(&md, &tiles_2x2(), Some(&FakeSidecar)).unwrap();
        let xml = vrt.to_xml();

        assert!(xml.starts_with("<VRTDataset rasterXSize=\"512\" rasterYSize=\"512\">"));
        assert!(xml.contains("<SRS>EPSG:32611</SRS>"));
        assert!(xml.contains("<Metadata domain=\"RPC\">"));
        assert!(xml.contains("<MDI key=\"HEIGHT_OFF\">23</MDI>"));
        assert!(xml.contains("<VRTRasterBand dataType=\"UInt16\" band=\"1\">"));
        // Booleans render as 1/0, never true/false.
        assert!(xml.contains("relativeToVRT=\"1\" shared=\"0\""));
        assert!(!xml.contains("true"));
        assert!(xml.contains(
            "<SourceProperties RasterXSize=\"256\" RasterYSize=\"256\" DataType=\"UInt16\" \
             BlockXSize=\"256\" BlockYSize=\"256\" />"
        ));
        assert_eq!(xml.matches("<SimpleSource>").count(), 12);
    }

    #[test]
    fn test_geo_transform_formatting() {
        let gt = [1124.0, 2.0, 0.0, 200.0, 0.0, -2.0];
        let text = format_geo_transform(&gt);
        assert_eq!(
            text,
            "1.1240000000000000e+03, 2.0000000000000000e+00, 0.0000000000000000e+00, \
             2.0000000000000000e+02, 0.0000000000000000e+00, -2.0000000000000000e+00"
        );

        // Round trip through parsing recovers the floats exactly.
        let parsed: Vec<f64> = text.split(", ").map(|s| s.parse().unwrap()).collect();
        assert_eq!(parsed, gt.to_vec());
    }

    #[test]
    fn test_sci16_exponents() {
        assert_eq!(sci16(0.0), "0.0000000000000000e+00");
        assert_eq!(sci16(-0.001), "-1.0000000000000000e-03");
        assert_eq!(sci16(1.5e120), "1.5000000000000000e+120");
    }

    #[test]
    fn test_write_to() {
        let md = test_metadata(true);
        let vrt = compose(&md, &tiles_2x2(), None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vrt");
        vrt.write_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("</VRTDataset>\n"));
    }
}
