//! Template subcommands: describe, upload, metadata, realize, batch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use rda_client::{
    BatchFormat, Metadata, PixelWindow, ProgressFn, ProjectedWindow, Template, TemplateGraph,
    TileWindow,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vrt::{RpcSidecar, VrtMetadataSource};

use crate::config::ConfigArgs;

#[derive(Subcommand, Debug)]
pub enum TemplateCommand {
    /// Print the graph backing a template
    Describe {
        /// The template id to describe
        template_id: String,
    },

    /// Upload a template graph from a JSON file, printing the new id
    Upload {
        /// Path to the template JSON
        file: PathBuf,
    },

    /// Print the metadata a template evaluates to
    Metadata {
        /// The template id to evaluate
        template_id: String,

        /// Template parameters, e.g. -p catalogId=103001000EBC3C00
        #[arg(short = 'p', long = "parameter", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Download the tiles composing a template and wrap them in a VRT
    Realize {
        /// The template id to realize
        template_id: String,

        /// Directory to place tiles in; defaults to the template id
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Template parameters, e.g. -p catalogId=103001000EBC3C00
        #[arg(short = 'p', long = "parameter", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Realize a subwindow in pixel space: xoff,yoff,xsize,ysize
        #[arg(long)]
        srcwin: Option<PixelWindow>,

        /// Realize a subwindow in projected space: ulx,uly,lrx,lry
        #[arg(long)]
        projwin: Option<ProjectedWindow>,

        /// Max concurrent tile downloads; 0 means 4 x logical CPUs
        #[arg(long, default_value = "0")]
        num_parallel: usize,

        /// DG metadata XML holding RPCs to embed in the VRT
        #[arg(long)]
        rpc: Option<PathBuf>,
    },

    /// Submit the template to batch materialization
    Batch {
        /// The template id to materialize
        template_id: String,

        /// Template parameters, e.g. -p catalogId=103001000EBC3C00
        #[arg(short = 'p', long = "parameter", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Output format
        #[arg(long, default_value = "TIF")]
        format: BatchFormat,

        /// Crop to a subwindow in pixel space: xoff,yoff,xsize,ysize
        #[arg(long)]
        srcwin: Option<PixelWindow>,

        /// Crop to a subwindow in projected space: ulx,uly,lrx,lry
        #[arg(long)]
        projwin: Option<ProjectedWindow>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

pub async fn run(
    command: TemplateCommand,
    config: &ConfigArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = config.http_client()?;
    let endpoints = config.endpoints()?;

    match command {
        TemplateCommand::Describe { template_id } => {
            let template = Template::new(&template_id, client, endpoints);
            let graph = template.describe(cancel).await?;
            println!("{}", graph.to_json()?);
            Ok(())
        }

        TemplateCommand::Upload { file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("failed reading {}", file.display()))?;
            let graph = TemplateGraph::from_json(&body)?;
            let id = Template::upload(&client, &endpoints, &graph, cancel).await?;
            println!("{}", id);
            Ok(())
        }

        TemplateCommand::Metadata {
            template_id,
            params,
        } => {
            let mut template = Template::new(&template_id, client, endpoints);
            for (key, val) in params {
                template = template.with_parameter(key, val);
            }
            let md = template.metadata(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&md)?);
            Ok(())
        }

        TemplateCommand::Realize {
            template_id,
            out_dir,
            params,
            srcwin,
            projwin,
            num_parallel,
            rpc,
        } => {
            realize(
                config,
                &template_id,
                out_dir,
                params,
                srcwin,
                projwin,
                num_parallel,
                rpc,
                cancel,
            )
            .await
        }

        TemplateCommand::Batch {
            template_id,
            params,
            format,
            srcwin,
            projwin,
        } => {
            let mut template = Template::new(&template_id, client, endpoints);
            for (key, val) in params {
                template = template.with_parameter(key, val);
            }

            if srcwin.is_some() || projwin.is_some() {
                let md = template.metadata(cancel).await?;
                let window = md.resolve_window(srcwin, projwin)?;
                template = template.with_window(window);
            }

            let job = template.batch_materialize(format, cancel).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn realize(
    config: &ConfigArgs,
    template_id: &str,
    out_dir: Option<PathBuf>,
    params: Vec<(String, String)>,
    srcwin: Option<PixelWindow>,
    projwin: Option<ProjectedWindow>,
    num_parallel: usize,
    rpc: Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = config.http_client()?;
    let endpoints = config.endpoints()?;

    let mut template = Template::new(template_id, client, endpoints);
    for (key, val) in params {
        template = template.with_parameter(key, val);
    }
    let md: Metadata = template.metadata(cancel).await?;
    let window: TileWindow = md.resolve_window(srcwin, projwin)?;

    let total = window.num_tiles();
    info!(
        tiles = total,
        x_tiles = window.num_x_tiles,
        y_tiles = window.num_y_tiles,
        "realizing tile window"
    );

    template = template
        .with_window(window)
        .with_num_parallel(num_parallel)
        .with_progress(progress_logger(total));

    let tile_dir = out_dir.unwrap_or_else(|| PathBuf::from(short_id(template_id)));
    let start = Instant::now();
    let outcome = template.realize(&tile_dir, cancel).await?;
    info!(
        tiles = outcome.tiles.len(),
        elapsed = ?start.elapsed(),
        "tile retrieval finished"
    );

    if let Some(err) = outcome.error {
        // Partial tiles stay on disk; rerunning resumes where this left off.
        bail!("{}", err);
    }
    if outcome.tiles.is_empty() {
        warn!("no tiles realized, skipping VRT");
        return Ok(());
    }

    let sidecar = match &rpc {
        Some(path) => Some(
            RpcSidecar::from_file(path)
                .with_context(|| format!("failed parsing RPCs from {}", path.display()))?,
        ),
        None => None,
    };
    let vrt = vrt::compose(
        &md,
        &outcome.tiles,
        sidecar
            .as_ref()
            .map(|s| s as &dyn VrtMetadataSource),
    )?;

    let vrt_file = PathBuf::from(format!("{}.vrt", short_id(template_id)));
    vrt.write_to(&vrt_file)?;
    println!("{}", vrt_file.display());
    Ok(())
}

/// Template ids can be unwieldy; trim them for file names.
fn short_id(template_id: &str) -> &str {
    &template_id[..template_id.len().min(10)]
}

/// A progress callback logging a line roughly every 5% of `total`
/// completions, rather than rendering a bar.
pub(crate) fn progress_logger(total: i64) -> ProgressFn {
    let done = Arc::new(AtomicU64::new(0));
    let step = ((total as u64) / 20).max(1);
    Arc::new(move || {
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % step == 0 || n as i64 == total {
            info!(done = n, total, "tile progress");
        }
    })
}
