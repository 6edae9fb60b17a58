//! Concurrent tile realization: stream every tile in a window to disk.
//!
//! Tiles download through a bounded pool; tiles already on disk are
//! reported complete without touching the network. Cancellation stops the
//! producer, lets in-flight downloads wind down, and never surfaces as an
//! error — the partial result list is still returned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rda_common::{RdaError, RdaResult};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::endpoints::Endpoints;
use crate::http::HttpClient;
use crate::metadata::TileWindow;

/// Called once per finished tile (downloaded or skipped). The counter
/// behind it must be atomic; realization fires it from many tasks.
pub type ProgressFn = Arc<dyn Fn() + Send + Sync>;

pub(crate) fn noop_progress() -> ProgressFn {
    Arc::new(|| {})
}

/// A tile that is local on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileInfo {
    /// Where this tile is located on disk.
    pub file_path: PathBuf,

    /// The x coordinate of this tile in the tile window it came from.
    pub x_tile: i64,

    /// The y coordinate of this tile in the tile window it came from.
    pub y_tile: i64,
}

/// What a realize run produced: every tile that made it to disk, plus the
/// aggregate of any per-tile failures.
#[derive(Debug)]
pub struct RealizeOutcome {
    pub tiles: Vec<TileInfo>,
    pub error: Option<RdaError>,
}

impl RealizeOutcome {
    /// Collapse into a plain result, discarding partial tiles on failure.
    pub fn into_result(self) -> RdaResult<Vec<TileInfo>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.tiles),
        }
    }
}

/// Download every tile of `window` into `tile_dir`, at most `num_parallel`
/// at a time.
#[instrument(skip_all, fields(template_id = %template_id, num_tiles = window.num_tiles()))]
pub(crate) async fn realize_window(
    client: &HttpClient,
    endpoints: &Endpoints,
    template_id: &str,
    params: &BTreeMap<String, String>,
    window: &TileWindow,
    tile_dir: &Path,
    num_parallel: usize,
    progress: &ProgressFn,
    cancel: &CancellationToken,
) -> RdaResult<RealizeOutcome> {
    fs::create_dir_all(tile_dir).await?;
    let progress: &(dyn Fn() + Send + Sync) = progress.as_ref();

    let coords = (window.min_tile_x..=window.max_tile_x)
        .flat_map(|x| (window.min_tile_y..=window.max_tile_y).map(move |y| (x, y)));

    // The producer side of the pool: stop handing out jobs when the caller
    // cancels, but let whatever is in flight finish draining.
    let results: Vec<RdaResult<TileInfo>> = stream::iter(coords)
        .take_until(cancel.clone().cancelled_owned())
        .map(|(x, y)| fetch_tile(client, endpoints, template_id, params, tile_dir, x, y, progress, cancel))
        .buffer_unordered(num_parallel.max(1))
        .collect()
        .await;

    let mut tiles = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(tile) => tiles.push(tile),
            Err(err) => errors.push(err),
        }
    }

    Ok(RealizeOutcome {
        tiles,
        error: RdaError::aggregate(errors),
    })
}

/// Download a single tile, or report it complete if it is already on disk.
#[allow(clippy::too_many_arguments)]
async fn fetch_tile(
    client: &HttpClient,
    endpoints: &Endpoints,
    template_id: &str,
    params: &BTreeMap<String, String>,
    tile_dir: &Path,
    x: i64,
    y: i64,
    progress: &(dyn Fn() + Send + Sync),
    cancel: &CancellationToken,
) -> RdaResult<TileInfo> {
    let file_path = tile_dir.join(format!("tile_{}_{}.tif", x, y));
    let tile = TileInfo {
        file_path: file_path.clone(),
        x_tile: x,
        y_tile: y,
    };

    // If the tile is already present, don't download it again.
    if fs::metadata(&file_path).await.is_ok() {
        debug!(path = %file_path.display(), "tile already on disk, skipping");
        progress();
        return Ok(tile);
    }

    let url = endpoints.template_tile(template_id, x, y, params);
    let res = client.get_raw(url, Some("image/tiff"), cancel).await?;

    if let Err(err) = stream_to_file(res, &file_path, cancel).await {
        return Err(remove_partial(&file_path, err).await);
    }

    progress();
    Ok(tile)
}

/// Stream a response body into `path`.
async fn stream_to_file(
    res: reqwest::Response,
    path: &Path,
    cancel: &CancellationToken,
) -> RdaResult<()> {
    let mut file = fs::File::create(path).await?;
    let mut body = res.bytes_stream();

    loop {
        let chunk = tokio::select! {
            c = body.next() => c,
            _ = cancel.cancelled() => return Err(RdaError::Cancelled),
        };
        match chunk {
            Some(Ok(chunk)) => file.write_all(&chunk).await?,
            Some(Err(e)) => {
                return Err(RdaError::ServerError(format!(
                    "failed reading tile body: {}",
                    e
                )))
            }
            None => break,
        }
    }

    file.flush().await?;
    Ok(())
}

/// Remove a partially written file, composing any removal failure into the
/// originating error.
async fn remove_partial(path: &Path, err: RdaError) -> RdaError {
    match fs::remove_file(path).await {
        Ok(()) => err,
        Err(remove_err) => RdaError::ServerError(format!(
            "{}; additionally failed removing partial file {}: {}",
            err,
            path.display(),
            remove_err
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::request, responders::status_code, Expectation, Server};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn window(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> TileWindow {
        TileWindow {
            min_tile_x: min_x,
            min_tile_y: min_y,
            max_tile_x: max_x,
            max_tile_y: max_y,
            num_x_tiles: max_x - min_x + 1,
            num_y_tiles: max_y - min_y + 1,
            ..Default::default()
        }
    }

    fn counting_progress() -> (ProgressFn, Arc<AtomicU64>) {
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        (
            Arc::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }),
            counter,
        )
    }

    async fn run(
        server: &Server,
        window: &TileWindow,
        tile_dir: &Path,
        progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> RealizeOutcome {
        let endpoints = Endpoints::new(&server.url_str("")).unwrap();
        let client = HttpClient::new(Default::default()).unwrap();
        realize_window(
            &client,
            &endpoints,
            "tID",
            &BTreeMap::new(),
            window,
            tile_dir,
            4,
            progress,
            cancel,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_pre_placed_tiles_skip_the_network() {
        // No expectations registered: any request would fail the test.
        let server = Server::run();
        let dir = tempfile::tempdir().unwrap();
        for x in 0..2 {
            for y in 0..2 {
                std::fs::write(dir.path().join(format!("tile_{}_{}.tif", x, y)), b"tiff").unwrap();
            }
        }

        let (progress, counter) = counting_progress();
        let cancel = CancellationToken::new();
        let outcome = run(&server, &window(0, 0, 1, 1), dir.path(), &progress, &cancel).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.tiles.len(), 4);
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_tiles_download_to_named_files() {
        let server = Server::run();
        for x in 0..2 {
            for y in 0..2 {
                server.expect(
                    Expectation::matching(request::method_path(
                        "GET",
                        format!("/template/tID/tile/{}/{}", x, y),
                    ))
                    .respond_with(status_code(200).body("tile-bytes")),
                );
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (progress, counter) = counting_progress();
        let cancel = CancellationToken::new();
        let outcome = run(&server, &window(0, 0, 1, 1), dir.path(), &progress, &cancel).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.tiles.len(), 4);
        assert_eq!(counter.load(Ordering::Relaxed), 4);
        for tile in &outcome.tiles {
            let meta = std::fs::metadata(&tile.file_path).unwrap();
            assert!(meta.len() > 0);
            assert_eq!(
                tile.file_path.file_name().unwrap().to_str().unwrap(),
                format!("tile_{}_{}.tif", tile.x_tile, tile.y_tile)
            );
        }
    }

    #[tokio::test]
    async fn test_tile_failures_are_aggregated() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/template/tID/tile/0/0"))
                .respond_with(status_code(200).body("tile-bytes")),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/template/tID/tile/1/0"))
                .respond_with(status_code(404).body(r#"{"error":"tile out of range"}"#)),
        );

        let dir = tempfile::tempdir().unwrap();
        let (progress, _) = counting_progress();
        let cancel = CancellationToken::new();
        let outcome = run(&server, &window(0, 0, 1, 0), dir.path(), &progress, &cancel).await;

        assert_eq!(outcome.tiles.len(), 1);
        let err = outcome.error.unwrap();
        let msg = err.to_string();
        assert!(msg.starts_with("1 error(s) during realization:"), "{}", msg);
        assert!(msg.contains("tile out of range"), "{}", msg);

        // The failed tile must not leave a file behind.
        assert!(!dir.path().join("tile_1_0.tif").exists());
    }

    #[tokio::test]
    async fn test_cancelling_mid_run_keeps_partial_results() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::path(httptest::matchers::matches(
                "^/template/tID/tile/",
            )))
            .times(..)
            .respond_with(status_code(200).body("tile-bytes")),
        );

        let dir = tempfile::tempdir().unwrap();
        // Trip the token from the progress callback once two tiles land;
        // the producer stops and whatever is in flight drains.
        let counter = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let c = counter.clone();
        let trip = cancel.clone();
        let progress: ProgressFn = Arc::new(move || {
            if c.fetch_add(1, Ordering::Relaxed) + 1 >= 2 {
                trip.cancel();
            }
        });

        let outcome = run(&server, &window(0, 0, 9, 9), dir.path(), &progress, &cancel).await;

        assert!(outcome.error.is_none());
        assert!(outcome.tiles.len() >= 2);
        assert!(outcome.tiles.len() <= 100);

        // Every surviving file is fully written.
        for tile in &outcome.tiles {
            assert!(std::fs::metadata(&tile.file_path).unwrap().len() > 0);
        }
    }

    #[tokio::test]
    async fn test_cancelled_realization_returns_partial_results() {
        let server = Server::run();
        let dir = tempfile::tempdir().unwrap();
        // Two tiles are already on disk; the rest would require the network,
        // but the token is cancelled before the run starts, so the producer
        // never hands out a job.
        std::fs::write(dir.path().join("tile_0_0.tif"), b"tiff").unwrap();
        std::fs::write(dir.path().join("tile_0_1.tif"), b"tiff").unwrap();

        let (progress, _) = counting_progress();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run(&server, &window(0, 0, 9, 9), dir.path(), &progress, &cancel).await;

        assert!(outcome.error.is_none());
        assert!(outcome.tiles.len() <= 100);

        // Nothing partially written.
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let entry = entry.unwrap();
            assert!(entry.metadata().unwrap().len() > 0);
        }
    }
}
