//! URL construction for the RDA API endpoints.

use std::collections::BTreeMap;

use rda_common::{RdaError, RdaResult};
use url::Url;

/// Builds URLs for every RDA endpoint from a configurable base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Create an endpoint set rooted at `base`, e.g.
    /// `https://rda.example.com/v1`.
    pub fn new(base: &str) -> RdaResult<Endpoints> {
        let base = Url::parse(base.trim_end_matches('/'))
            .map_err(|e| RdaError::ServerError(format!("invalid base URL {:?}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(RdaError::ServerError(format!(
                "base URL {:?} cannot carry a path",
                base.as_str()
            )));
        }
        Ok(Endpoints { base })
    }

    fn at(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Unwrap is fine: `new` rejected cannot-be-a-base URLs.
        url.path_segments_mut()
            .unwrap()
            .pop_if_empty()
            .extend(segments);
        url
    }

    fn with_params(mut url: Url, params: &BTreeMap<String, String>) -> Url {
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        url
    }

    /// `GET /template/{id}` — describe the graph backing a template.
    pub fn template_describe(&self, template_id: &str) -> Url {
        self.at(&["template", template_id])
    }

    /// `POST /template` — upload a template graph.
    pub fn template_upload(&self) -> Url {
        self.at(&["template"])
    }

    /// `GET /template/{id}/metadata` with template parameters as the query.
    pub fn template_metadata(&self, template_id: &str, params: &BTreeMap<String, String>) -> Url {
        Self::with_params(self.at(&["template", template_id, "metadata"]), params)
    }

    /// `GET /template/{id}/tile/{x}/{y}` with template parameters as the query.
    pub fn template_tile(
        &self,
        template_id: &str,
        x: i64,
        y: i64,
        params: &BTreeMap<String, String>,
    ) -> Url {
        let url = self.at(&[
            "template",
            template_id,
            "tile",
            &x.to_string(),
            &y.to_string(),
        ]);
        Self::with_params(url, params)
    }

    /// `POST /template/materialize` — submit a batch materialization.
    pub fn materialize(&self) -> Url {
        self.at(&["template", "materialize"])
    }

    /// `GET /template/materialize/status/{jobId}`.
    pub fn job_status(&self, job_id: &str) -> Url {
        self.at(&["template", "materialize", "status", job_id])
    }

    /// `GET /operator` or `GET /operator/{name}`.
    pub fn operator(&self, name: Option<&str>) -> Url {
        match name {
            Some(name) => self.at(&["operator", name]),
            None => self.at(&["operator"]),
        }
    }

    /// `GET /stripMetadata/{catalogId}`, or the zipped factory metadata
    /// variant when `zipped` is set.
    pub fn strip_metadata(&self, catalog_id: &str, zipped: bool) -> Url {
        if zipped {
            self.at(&["stripMetadata", catalog_id, "factoryMetadata"])
        } else {
            self.at(&["stripMetadata", catalog_id])
        }
    }
}
