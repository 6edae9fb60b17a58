//! Operator descriptions and DG strip-level metadata.

use std::io::Read;
use std::path::{Path, PathBuf};

use rda_common::{RdaError, RdaResult};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::endpoints::Endpoints;
use crate::http::HttpClient;
use crate::metadata::ImageMetadata;
use crate::rpc::RpcSidecar;

/// Describe the RDA operators with the given names. With no names, every
/// operator is described and the server's list comes back as-is.
pub async fn operator_info(
    client: &HttpClient,
    endpoints: &Endpoints,
    names: &[String],
    cancel: &CancellationToken,
) -> RdaResult<serde_json::Value> {
    if names.is_empty() {
        return client
            .get_json::<serde_json::Value>(endpoints.operator(None), cancel)
            .await;
    }

    let mut described = Vec::with_capacity(names.len());
    for name in names {
        let blob: serde_json::Value = client
            .get_json(endpoints.operator(Some(name)), cancel)
            .await?;
        described.push(blob);
    }
    Ok(serde_json::Value::Array(described))
}

/// Fetch strip-level metadata for a DG catalog id as JSON.
pub async fn strip_info(
    client: &HttpClient,
    endpoints: &Endpoints,
    catalog_id: &str,
    cancel: &CancellationToken,
) -> RdaResult<serde_json::Value> {
    client
        .get_json(endpoints.strip_metadata(catalog_id, false), cancel)
        .await
}

/// The images that compose a DG catalog id, one list per band group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageParts {
    #[serde(rename = "catalogIdentifier")]
    pub catalog_id: String,
    #[serde(alias = "CavisImages")]
    pub cavis_images: Vec<ImageMetadata>,
    #[serde(alias = "PanImages")]
    pub pan_images: Vec<ImageMetadata>,
    #[serde(alias = "SWIRImages")]
    pub swir_images: Vec<ImageMetadata>,
    #[serde(alias = "VNIRImages")]
    pub vnir_images: Vec<ImageMetadata>,
}

/// Describe the 1B image parts stored for a DG catalog id. The image id
/// and tile bucket of a part are what a template needs to address it.
pub async fn part_summary(
    client: &HttpClient,
    endpoints: &Endpoints,
    catalog_id: &str,
    cancel: &CancellationToken,
) -> RdaResult<ImageParts> {
    client
        .get_json(endpoints.strip_metadata(catalog_id, false), cancel)
        .await
}

/// What the factory metadata zip yielded: the files written to disk and
/// the RPCs parsed out of the `.XML` member, when one matched.
#[derive(Debug, Clone)]
pub struct PartMetadata {
    pub files: Vec<PathBuf>,
    pub rpcs: Option<RpcSidecar>,
}

/// Download the factory metadata zip for a catalog id and extract the
/// members whose names start with `prefix` into `out_dir` (created if
/// absent), parsing RPCs from any `.XML` member along the way.
pub async fn part_metadata(
    client: &HttpClient,
    endpoints: &Endpoints,
    catalog_id: &str,
    prefix: &str,
    out_dir: &Path,
    cancel: &CancellationToken,
) -> RdaResult<PartMetadata> {
    tokio::fs::create_dir_all(out_dir).await?;

    let res = client
        .get_raw(endpoints.strip_metadata(catalog_id, true), None, cancel)
        .await?;
    let body = res
        .bytes()
        .await
        .map_err(|e| RdaError::ServerError(format!("failed reading factory metadata: {}", e)))?;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body))
        .map_err(|e| RdaError::ServerError(format!("factory metadata is not a zip: {}", e)))?;

    let mut files = Vec::new();
    let mut rpcs = None;
    for i in 0..archive.len() {
        let mut member = archive
            .by_index(i)
            .map_err(|e| RdaError::ServerError(format!("bad zip member: {}", e)))?;
        if !member.name().starts_with(prefix) {
            continue;
        }

        // Member names are flat file names; refuse anything that tries to
        // escape the output directory.
        let Some(file_name) = Path::new(member.name()).file_name() else {
            continue;
        };
        let out_path = out_dir.join(file_name);

        let mut contents = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut contents)
            .map_err(|e| RdaError::ServerError(format!("failed reading zip member: {}", e)))?;
        std::fs::write(&out_path, &contents)?;
        debug!(path = %out_path.display(), "extracted metadata file");

        // The .XML member carries the RPC camera model.
        if out_path.extension().is_some_and(|ext| ext == "XML") {
            let xml = String::from_utf8_lossy(&contents);
            rpcs = Some(RpcSidecar::from_xml(&xml)?);
        }

        files.push(out_path);
    }

    info!(
        catalog_id,
        count = files.len(),
        has_rpcs = rpcs.is_some(),
        "extracted factory metadata"
    );
    Ok(PartMetadata { files, rpcs })
}
