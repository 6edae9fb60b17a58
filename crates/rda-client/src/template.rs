//! A handle to one RDA template: its id, parameter values, and the
//! operations the template endpoints support.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rda_common::{RdaError, RdaResult};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::batch::{BatchFormat, BatchJob, BatchRequest, ImageReference};
use crate::endpoints::Endpoints;
use crate::graph::TemplateGraph;
use crate::http::HttpClient;
use crate::metadata::{Metadata, TileWindow};
use crate::realize::{noop_progress, realize_window, ProgressFn, RealizeOutcome};

/// A template plus the parameter values to evaluate it under.
#[derive(Clone)]
pub struct Template {
    template_id: String,
    params: BTreeMap<String, String>,
    window: Option<TileWindow>,

    client: Arc<HttpClient>,
    endpoints: Endpoints,

    num_parallel: usize,
    progress: ProgressFn,
}

impl Template {
    pub fn new(
        template_id: impl Into<String>,
        client: Arc<HttpClient>,
        endpoints: Endpoints,
    ) -> Template {
        Template {
            template_id: template_id.into(),
            params: BTreeMap::new(),
            window: None,
            client,
            endpoints,
            num_parallel: 4 * num_cpus::get(),
            progress: noop_progress(),
        }
    }

    /// Populate the template parameter named by `key` with `val`.
    pub fn with_parameter(mut self, key: impl Into<String>, val: impl Into<String>) -> Template {
        self.params.insert(key.into(), val.into());
        self
    }

    /// Set the tile window to realize or batch-crop to.
    pub fn with_window(mut self, window: TileWindow) -> Template {
        self.window = Some(window);
        self
    }

    /// Cap the number of concurrent tile downloads. Zero keeps the default
    /// of `4 x logical CPUs`.
    pub fn with_num_parallel(mut self, num_parallel: usize) -> Template {
        if num_parallel > 0 {
            self.num_parallel = num_parallel;
        }
        self
    }

    /// Set a callback fired every time a tile finishes downloading (or is
    /// found already on disk) during realization.
    pub fn with_progress(mut self, progress: ProgressFn) -> Template {
        self.progress = progress;
        self
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// Describe the graph backing this template.
    pub async fn describe(&self, cancel: &CancellationToken) -> RdaResult<TemplateGraph> {
        self.client
            .get_json::<TemplateGraph>(self.endpoints.template_describe(&self.template_id), cancel)
            .await
    }

    /// Upload a graph as a new template, returning the template id the
    /// server assigned to it.
    pub async fn upload(
        client: &HttpClient,
        endpoints: &Endpoints,
        graph: &TemplateGraph,
        cancel: &CancellationToken,
    ) -> RdaResult<String> {
        #[derive(Deserialize)]
        struct UploadResponse {
            #[serde(default)]
            id: String,
        }

        let res: UploadResponse = client
            .post_json(endpoints.template_upload(), graph, cancel)
            .await?;
        Ok(res.id)
    }

    /// Fetch the metadata describing the image this template evaluates to
    /// under the configured parameters.
    #[instrument(skip_all, fields(template_id = %self.template_id))]
    pub async fn metadata(&self, cancel: &CancellationToken) -> RdaResult<Metadata> {
        let url = self
            .endpoints
            .template_metadata(&self.template_id, &self.params);
        let body = self.client.get_text(url, cancel).await?;
        Metadata::from_json(&body)
    }

    /// Ask batch materialization to render this template server-side. The
    /// crop geometry comes from the configured tile window, so crops align
    /// to tile edges.
    #[instrument(skip_all, fields(template_id = %self.template_id, format = %format))]
    pub async fn batch_materialize(
        &self,
        format: BatchFormat,
        cancel: &CancellationToken,
    ) -> RdaResult<BatchJob> {
        // The nodeId pseudo-parameter addresses a node rather than
        // parameterizing the template, so it moves into the image reference.
        let node_id = self.params.get("nodeId").cloned();
        let parameters: BTreeMap<String, String> = self
            .params
            .iter()
            .filter(|(k, _)| k.as_str() != "nodeId")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let request = BatchRequest {
            image_reference: ImageReference {
                template_id: self.template_id.clone(),
                node_id,
                parameters: if parameters.is_empty() {
                    None
                } else {
                    Some(parameters)
                },
            },
            output_format: format,
            crop_geometry_wkt: self
                .window
                .as_ref()
                .and_then(TileWindow::wkt)
                .map(|b| b.to_string()),
            ..Default::default()
        };

        let job: BatchJob = self
            .client
            .post_json(self.endpoints.materialize(), &request, cancel)
            .await?;
        info!(job_id = %job.job_id, "submitted batch materialization");
        Ok(job)
    }

    /// Download every tile of the configured window into `tile_dir`,
    /// creating it if absent. Tiles already on disk are reported complete
    /// without contacting the server.
    pub async fn realize(
        &self,
        tile_dir: &Path,
        cancel: &CancellationToken,
    ) -> RdaResult<RealizeOutcome> {
        let window = self.window.as_ref().ok_or_else(|| {
            RdaError::InvalidWindow("realize requires a tile window; set one first".to_string())
        })?;

        realize_window(
            &self.client,
            &self.endpoints,
            &self.template_id,
            &self.params,
            window,
            tile_dir,
            self.num_parallel,
            &self.progress,
            cancel,
        )
        .await
    }
}
