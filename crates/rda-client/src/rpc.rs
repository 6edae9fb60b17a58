//! Rational polynomial coefficient side-cars parsed from DG-flavor
//! metadata XML (`<isd><RPB><IMAGE>`).

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use rda_common::{RdaError, RdaResult};

/// RPC values parsed from a DG metadata XML file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcSidecar {
    pub err_bias: f64,
    pub err_rand: f64,
    pub line_offset: i64,
    pub samp_offset: i64,
    pub lat_offset: f64,
    pub long_offset: f64,
    pub height_offset: i64,
    pub line_scale: i64,
    pub samp_scale: i64,
    pub lat_scale: f64,
    pub long_scale: f64,
    pub height_scale: i64,
    pub line_num_coefs: Vec<f64>,
    pub line_den_coefs: Vec<f64>,
    pub samp_num_coefs: Vec<f64>,
    pub samp_den_coefs: Vec<f64>,
}

impl RpcSidecar {
    /// Parse RPCs from DG XML text.
    pub fn from_xml(xml: &str) -> RdaResult<RpcSidecar> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut rpcs = RpcSidecar::default();
        let mut current: Vec<u8> = Vec::new();
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => current = e.name().as_ref().to_vec(),
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| RdaError::ServerError(format!("bad RPC XML: {}", e)))?;
                    rpcs.set_field(&current, text.as_ref())?;
                }
                Ok(Event::End(_)) => current.clear(),
                Ok(Event::Eof) => break,
                Err(e) => return Err(RdaError::ServerError(format!("bad RPC XML: {}", e))),
                _ => {}
            }
            buf.clear();
        }
        Ok(rpcs)
    }

    /// Parse RPCs from a DG XML file on disk.
    pub fn from_file(path: &Path) -> RdaResult<RpcSidecar> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml(&xml)
    }

    fn set_field(&mut self, element: &[u8], text: &str) -> RdaResult<()> {
        match element {
            b"ERRBIAS" => self.err_bias = parse_float(element, text)?,
            b"ERRRAND" => self.err_rand = parse_float(element, text)?,
            b"LINEOFFSET" => self.line_offset = parse_int(element, text)?,
            b"SAMPOFFSET" => self.samp_offset = parse_int(element, text)?,
            b"LATOFFSET" => self.lat_offset = parse_float(element, text)?,
            b"LONGOFFSET" => self.long_offset = parse_float(element, text)?,
            b"HEIGHTOFFSET" => self.height_offset = parse_int(element, text)?,
            b"LINESCALE" => self.line_scale = parse_int(element, text)?,
            b"SAMPSCALE" => self.samp_scale = parse_int(element, text)?,
            b"LATSCALE" => self.lat_scale = parse_float(element, text)?,
            b"LONGSCALE" => self.long_scale = parse_float(element, text)?,
            b"HEIGHTSCALE" => self.height_scale = parse_int(element, text)?,
            b"LINENUMCOEF" => self.line_num_coefs = parse_float_list(element, text)?,
            b"LINEDENCOEF" => self.line_den_coefs = parse_float_list(element, text)?,
            b"SAMPNUMCOEF" => self.samp_num_coefs = parse_float_list(element, text)?,
            b"SAMPDENCOEF" => self.samp_den_coefs = parse_float_list(element, text)?,
            _ => {}
        }
        Ok(())
    }
}

fn parse_float(element: &[u8], text: &str) -> RdaResult<f64> {
    text.trim().parse().map_err(|_| bad_value(element, text))
}

fn parse_int(element: &[u8], text: &str) -> RdaResult<i64> {
    text.trim().parse().map_err(|_| bad_value(element, text))
}

fn parse_float_list(element: &[u8], text: &str) -> RdaResult<Vec<f64>> {
    text.split_whitespace()
        .map(|v| v.parse().map_err(|_| bad_value(element, v)))
        .collect()
}

fn bad_value(element: &[u8], text: &str) -> RdaError {
    RdaError::ServerError(format!(
        "bad value {:?} for RPC element {}",
        text,
        String::from_utf8_lossy(element)
    ))
}
