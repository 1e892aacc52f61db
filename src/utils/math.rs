//! Math utility functions

/// Compute Euclidean distance between two vectors.
///
/// Returns `None` when the vectors differ in length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let squared: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum();

    Some(squared.sqrt())
}
