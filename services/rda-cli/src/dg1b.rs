//! DG 1B subcommands: resolve a catalog id to its image parts and realize
//! them through the idaho read template.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Subcommand;
use rda_client::{catalog, Endpoints, HttpClient, ImageMetadata, ImageParts, Template};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vrt::VrtMetadataSource;

use crate::config::ConfigArgs;
use crate::template::progress_logger;

/// The RDA template wrapping the idaho read operator; 1B parts realize
/// through it addressed by image id and tile bucket.
const DG1B_TEMPLATE_ID: &str =
    "848c481257a100ae373523df9f23c0176484b6f63757e9e58d2fa9c2d2af12d9";

#[derive(Subcommand, Debug)]
pub enum Dg1bCommand {
    /// Describe the image parts that compose the 1B image
    Parts {
        /// The catalog id to describe
        catalog_id: String,
    },

    /// Metadata describing a 1B image part; use "dg1b parts" to find valid
    /// bands and part numbers
    Metadata {
        /// The catalog id holding the part
        catalog_id: String,
        /// Band group: pan, vnir, swir, or cavis
        band: String,
        /// Part number, starting at 1
        part_number: usize,
    },

    /// Realize a 1B image part: factory metadata, tiles, and a VRT with
    /// RPCs attached
    Realize {
        /// The catalog id holding the part
        catalog_id: String,
        /// Band group: pan, vnir, swir, or cavis
        band: String,
        /// Part number, starting at 1
        part_number: usize,
        /// Directory for metadata, tiles, and the VRT; created if absent
        out_dir: PathBuf,
    },
}

/// The image list and metadata file prefix tag for a band name.
fn band_images<'a>(
    parts: &'a ImageParts,
    band: &str,
) -> Result<(&'a [ImageMetadata], &'static str)> {
    match band.to_lowercase().as_str() {
        "pan" => Ok((&parts.pan_images, "PAN")),
        "vnir" => Ok((&parts.vnir_images, "MUL")),
        "swir" => Ok((&parts.swir_images, "SWIR")),
        "cavis" => Ok((&parts.cavis_images, "CAVIS")),
        other => bail!(
            "band argument {:?} is not of type pan, vnir, swir, or cavis",
            other
        ),
    }
}

/// Pick a part by 1-based number, or explain what exists.
fn pick_part<'a>(
    images: &'a [ImageMetadata],
    band: &str,
    part_number: usize,
) -> Result<&'a ImageMetadata> {
    if part_number < 1 {
        bail!("part numbers start at 1");
    }
    if part_number > images.len() {
        bail!("band {:?} has {} parts", band, images.len());
    }
    Ok(&images[part_number - 1])
}

fn part_template(
    client: Arc<HttpClient>,
    endpoints: Endpoints,
    image: &ImageMetadata,
) -> Template {
    Template::new(DG1B_TEMPLATE_ID, client, endpoints)
        .with_parameter("imageId", image.image_id.as_str())
        .with_parameter("bucketName", image.tile_bucket_name.as_str())
}

pub async fn run(
    command: Dg1bCommand,
    config: &ConfigArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = config.http_client()?;
    let endpoints = config.endpoints()?;

    match command {
        Dg1bCommand::Parts { catalog_id } => {
            let parts = catalog::part_summary(&client, &endpoints, &catalog_id, cancel).await?;

            let mut summary = serde_json::Map::new();
            for (name, images) in [
                ("cavis", &parts.cavis_images),
                ("pan", &parts.pan_images),
                ("vnir", &parts.vnir_images),
                ("swir", &parts.swir_images),
            ] {
                if images.is_empty() {
                    continue;
                }
                let image_ids: Vec<&str> =
                    images.iter().map(|i| i.image_id.as_str()).collect();
                summary.insert(
                    name.to_string(),
                    serde_json::json!({
                        "numParts": images.len(),
                        "imageIds": image_ids,
                    }),
                );
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::Value::Object(summary))?
            );
            Ok(())
        }

        Dg1bCommand::Metadata {
            catalog_id,
            band,
            part_number,
        } => {
            let parts = catalog::part_summary(&client, &endpoints, &catalog_id, cancel).await?;
            let (images, _) = band_images(&parts, &band)?;
            let image = pick_part(images, &band, part_number)?;

            let md = part_template(client.clone(), endpoints.clone(), image)
                .metadata(cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(&md)?);
            Ok(())
        }

        Dg1bCommand::Realize {
            catalog_id,
            band,
            part_number,
            out_dir,
        } => {
            let parts = catalog::part_summary(&client, &endpoints, &catalog_id, cancel).await?;
            let (images, tag) = band_images(&parts, &band)?;
            let image = pick_part(images, &band, part_number)?;
            let part_prefix = format!("{}_P{:03}", tag, part_number);

            // Factory metadata lands beside the tiles; its .XML member
            // carries the RPCs for the VRT.
            let part_md = catalog::part_metadata(
                &client,
                &endpoints,
                &catalog_id,
                &part_prefix,
                &out_dir,
                cancel,
            )
            .await?;
            if part_md.rpcs.is_none() {
                warn!(prefix = %part_prefix, "factory metadata carried no RPCs");
            }

            let mut template = part_template(client.clone(), endpoints.clone(), image);
            let md = template.metadata(cancel).await?;
            let window = md.image_metadata.tile_window.clone();
            let total = window.num_tiles();
            info!(tiles = total, prefix = %part_prefix, "realizing 1B part");

            template = template
                .with_window(window)
                .with_progress(progress_logger(total));

            let tile_dir = out_dir.join("tiles");
            let start = Instant::now();
            let outcome = template.realize(&tile_dir, cancel).await?;
            info!(
                tiles = outcome.tiles.len(),
                elapsed = ?start.elapsed(),
                "tile retrieval finished"
            );

            if let Some(err) = outcome.error {
                // Partial tiles stay on disk; rerunning resumes.
                bail!("{}", err);
            }
            if outcome.tiles.is_empty() {
                warn!("no tiles realized, skipping VRT");
                return Ok(());
            }

            let dataset = vrt::compose(
                &md,
                &outcome.tiles,
                part_md
                    .rpcs
                    .as_ref()
                    .map(|r| r as &dyn VrtMetadataSource),
            )?;
            let vrt_path = out_dir.join(format!("{}.vrt", part_prefix));
            dataset.write_to(&vrt_path)?;
            println!("{}", vrt_path.display());
            Ok(())
        }
    }
}
