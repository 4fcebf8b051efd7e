//! Embedding providers and batching helpers.
pub mod batch;
pub mod hashing;

pub use batch::embed_in_batches;
pub use hashing::HashingEmbedder;

/// Scales `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f64]) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
