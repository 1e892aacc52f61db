//! Image decoding

use std::io::Cursor;

use image::{DynamicImage, ImageResult};

/// Decode image from bytes (JPEG, PNG, etc.) with EXIF orientation applied.
///
/// Phone cameras usually store portrait shots as rotated pixels plus an
/// orientation tag, so the tag has to be honored before faces are detected.
pub fn decode_image(data: &[u8]) -> ImageResult<DynamicImage> {
    let image = image::load_from_memory(data)?;
    Ok(apply_exif_orientation(data, image))
}

/// Read the EXIF orientation tag, defaulting to 1 (normal) when absent
fn exif_orientation(data: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|exif_data| {
            exif_data
                .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Rotate/flip according to https://exiftool.org/TagNames/EXIF.html (Orientation)
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    match exif_orientation(data) {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}
