//! Translation of RPC side-cars into the VRT metadata block.
//!
//! The parsing itself lives with the client ([`rda_client::rpc`]); this
//! module maps the parsed values onto the GDAL-conventional RPC keys.

pub use rda_client::RpcSidecar;
use rda_common::RdaResult;

use crate::dataset::{VrtMetadata, VrtMetadataSource};

impl VrtMetadataSource for RpcSidecar {
    /// Flatten the RPCs into the GDAL-conventional RPC metadata keys.
    fn to_vrt_metadata(&self) -> RdaResult<VrtMetadata> {
        let items = vec![
            ("HEIGHT_OFF".to_string(), self.height_offset.to_string()),
            ("HEIGHT_SCALE".to_string(), self.height_scale.to_string()),
            ("LAT_OFF".to_string(), self.lat_offset.to_string()),
            ("LAT_SCALE".to_string(), self.lat_scale.to_string()),
            ("LINE_DEN_COEFF".to_string(), coef_list(&self.line_den_coefs)),
            ("LINE_NUM_COEFF".to_string(), coef_list(&self.line_num_coefs)),
            ("LINE_OFF".to_string(), self.line_offset.to_string()),
            ("LINE_SCALE".to_string(), self.line_scale.to_string()),
            ("LONG_OFF".to_string(), self.long_offset.to_string()),
            ("LONG_SCALE".to_string(), self.long_scale.to_string()),
            ("SAMP_DEN_COEFF".to_string(), coef_list(&self.samp_den_coefs)),
            ("SAMP_NUM_COEFF".to_string(), coef_list(&self.samp_num_coefs)),
            ("SAMP_OFF".to_string(), self.samp_offset.to_string()),
            ("SAMP_SCALE".to_string(), self.samp_scale.to_string()),
        ];

        Ok(VrtMetadata {
            domain: "RPC".to_string(),
            items,
        })
    }
}

/// Polynomial coefficients render as space-separated scientific notation,
/// e.g. `+3.170681E-03 +1.004559E+00 -3.297875E-04`.
fn coef_list(coefs: &[f64]) -> String {
    coefs
        .iter()
        .map(|&v| sci_coef(v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sci_coef(v: f64) -> String {
    let s = format!("{:+.6E}", v);
    match s.split_once('E') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}E{}{:0>2}", mantissa, sign, digits)
        }
        None => s,
    }
}
