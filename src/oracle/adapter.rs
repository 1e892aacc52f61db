//! Oracle adapter

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::EmbeddingOracle;
use crate::config::OracleConfig;
use crate::embedding::Embedding;
use crate::error::IndexError;
use crate::utils::image::decode_image;

/// Turns raw image bytes into zero or more embeddings
#[derive(Clone)]
pub struct OracleAdapter {
    oracle: Arc<dyn EmbeddingOracle>,
    timeout: Duration,
    upsample: u32,
    retry_upsample: Option<u32>,
}

impl OracleAdapter {
    /// Create a new adapter around `oracle`
    pub fn new(oracle: Arc<dyn EmbeddingOracle>, config: &OracleConfig) -> Self {
        let upsample = config.upsample;
        let retry_upsample = config
            .retry_upsample
            .filter(|&r| r > 0 && r != upsample);

        Self {
            oracle,
            timeout: config.timeout(),
            upsample,
            retry_upsample,
        }
    }

    /// Default extraction timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Extract embeddings with the configured timeout
    pub async fn extract(&self, image_bytes: &[u8]) -> Result<Vec<Embedding>, IndexError> {
        self.extract_with_timeout(image_bytes, self.timeout).await
    }

    /// Extract embeddings, giving up after `timeout`.
    ///
    /// On timeout the blocking work is detached rather than aborted; its
    /// thread returns to the pool once the oracle call finishes.
    pub async fn extract_with_timeout(
        &self,
        image_bytes: &[u8],
        timeout: Duration,
    ) -> Result<Vec<Embedding>, IndexError> {
        let start = Instant::now();
        let oracle = self.oracle.clone();
        let image_data = image_bytes.to_vec();
        let upsample = self.upsample;
        let retry_upsample = self.retry_upsample;

        let task = tokio::task::spawn_blocking(move || {
            run_extraction(oracle.as_ref(), &image_data, upsample, retry_upsample)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => {
                if let Ok(faces) = &result {
                    debug!(
                        "Oracle returned {} faces in {}ms",
                        faces.len(),
                        start.elapsed().as_millis()
                    );
                }
                result
            }
            Ok(Err(join_error)) => Err(IndexError::OracleFailure(anyhow::anyhow!(
                "oracle task aborted: {join_error}"
            ))),
            Err(_) => {
                warn!("Oracle extraction exceeded {:?}", timeout);
                Err(IndexError::OracleTimeout(timeout))
            }
        }
    }
}

fn run_extraction(
    oracle: &dyn EmbeddingOracle,
    image_data: &[u8],
    upsample: u32,
    retry_upsample: Option<u32>,
) -> Result<Vec<Embedding>, IndexError> {
    let image = decode_image(image_data)?;

    let faces = oracle
        .extract(&image, upsample)
        .map_err(IndexError::OracleFailure)?;
    if !faces.is_empty() {
        return Ok(faces);
    }

    match retry_upsample {
        Some(retry) => {
            debug!("No face at upsample {}, retrying at {}", upsample, retry);
            oracle
                .extract(&image, retry)
                .map_err(IndexError::OracleFailure)
        }
        None => Ok(faces),
    }
}
