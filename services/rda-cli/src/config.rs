//! Connection configuration shared by every subcommand.

use std::sync::Arc;

use anyhow::{Context, Result};
use artifact_store::{ArtifactStore, ArtifactStoreConfig};
use clap::Args;
use rda_client::{Endpoints, HttpClient, HttpConfig};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Base URL of the RDA API
    #[arg(
        long,
        env = "RDA_API_URL",
        default_value = "https://rda.geobigdata.io/v1",
        global = true
    )]
    pub api_url: String,

    /// Bearer token for the RDA API
    #[arg(long, env = "RDA_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// S3-compatible endpoint override for the customer data bucket
    #[arg(long, env = "RDA_S3_ENDPOINT", global = true)]
    pub s3_endpoint: Option<String>,

    /// Bucket holding batch materialization artifacts
    #[arg(
        long,
        env = "RDA_S3_BUCKET",
        default_value = "customer-data",
        global = true
    )]
    pub bucket: String,

    /// Access key id for the customer data bucket
    #[arg(long, env = "AWS_ACCESS_KEY_ID", default_value = "", global = true)]
    pub access_key_id: String,

    /// Secret access key for the customer data bucket
    #[arg(
        long,
        env = "AWS_SECRET_ACCESS_KEY",
        default_value = "",
        hide_env_values = true,
        global = true
    )]
    pub secret_access_key: String,

    /// Region of the customer data bucket
    #[arg(
        long,
        env = "RDA_S3_REGION",
        default_value = "us-east-1",
        global = true
    )]
    pub region: String,

    /// Account prefix the batch artifacts live under
    #[arg(long, env = "RDA_ACCOUNT_PREFIX", default_value = "", global = true)]
    pub account_prefix: String,

    /// Allow plain HTTP to the object store (local test stores)
    #[arg(long, global = true)]
    pub allow_http: bool,
}

impl ConfigArgs {
    pub fn http_client(&self) -> Result<Arc<HttpClient>> {
        let client = HttpClient::new(HttpConfig {
            token: self.token.clone(),
            ..Default::default()
        })
        .context("failed building the HTTP client")?;
        Ok(Arc::new(client))
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::new(&self.api_url).context("invalid RDA API base URL")
    }

    pub fn artifact_store(&self) -> Result<ArtifactStore> {
        let store = ArtifactStore::new(&ArtifactStoreConfig {
            endpoint: self.s3_endpoint.clone(),
            bucket: self.bucket.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            region: self.region.clone(),
            allow_http: self.allow_http,
            account_prefix: self.account_prefix.clone(),
        })
        .context("failed building the artifact store client")?;
        Ok(store)
    }
}
