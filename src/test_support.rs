//! Test fixtures: a scripted oracle and tiny PNG images.
//!
//! Each fixture image is a solid color whose red channel is a "marker"; the
//! scripted oracle looks the marker up to decide which faces it "detects".

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

use crate::embedding::Embedding;
use crate::oracle::EmbeddingOracle;

pub(crate) fn emb(values: &[f32]) -> Embedding {
    Embedding::new(values.to_vec())
}

/// Encode a small solid-color PNG whose red channel is `marker`
pub(crate) fn png_with_marker(marker: u8) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(8, 8, Rgb([marker, 16, 32])));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

struct Script {
    faces: Vec<Embedding>,
    min_upsample: u32,
    fail: bool,
}

#[derive(Default)]
pub(crate) struct ScriptedOracle {
    scripts: HashMap<u8, Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Faces found at any upsampling level
    pub(crate) fn with_faces(self, marker: u8, faces: Vec<Embedding>) -> Self {
        self.with_small_faces(marker, faces, 0)
    }

    /// Faces found only once upsampling reaches `min_upsample`
    pub(crate) fn with_small_faces(mut self, marker: u8, faces: Vec<Embedding>, min_upsample: u32) -> Self {
        self.scripts.insert(
            marker,
            Script {
                faces,
                min_upsample,
                fail: false,
            },
        );
        self
    }

    pub(crate) fn with_failure(mut self, marker: u8) -> Self {
        self.scripts.insert(
            marker,
            Script {
                faces: Vec::new(),
                min_upsample: 0,
                fail: true,
            },
        );
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingOracle for ScriptedOracle {
    fn extract(&self, image: &DynamicImage, upsample: u32) -> anyhow::Result<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let marker = image.to_rgb8().get_pixel(0, 0)[0];
        match self.scripts.get(&marker) {
            Some(script) if script.fail => anyhow::bail!("model failed on marker {marker}"),
            Some(script) if upsample >= script.min_upsample => Ok(script.faces.clone()),
            _ => Ok(Vec::new()),
        }
    }
}
