//! Embedding oracle boundary
//!
//! The oracle (face detection + encoding model) lives outside this crate.
//! `EmbeddingOracle` is the seam it plugs into; `OracleAdapter` wraps it with
//! decoding, the low-light retry, timeouts and error normalization.

pub mod adapter;

use image::DynamicImage;

use crate::embedding::Embedding;

pub use adapter::OracleAdapter;

/// External face detector/encoder.
///
/// Implementations are blocking and are always called from the blocking pool.
pub trait EmbeddingOracle: Send + Sync + 'static {
    /// Return one embedding per detected face, in detection order.
    ///
    /// `upsample` is the detection aggressiveness; higher values find smaller
    /// faces at the cost of latency. An empty result means no face was found.
    fn extract(&self, image: &DynamicImage, upsample: u32) -> anyhow::Result<Vec<Embedding>>;
}
