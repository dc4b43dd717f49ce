//! Similarity math over embedding vectors, plus the blob codec the sqlite
//! store persists them with.

/// Cosine similarity, clamped to `0.0..=1.0`. Mismatched or empty inputs
/// score zero rather than erroring: callers are ranking, not validating.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    // Accumulate in f64; hundreds of small f32 products lose precision fast.
    let (dot, a_sq, b_sq) = a.iter().zip(b).fold(
        (0.0_f64, 0.0_f64, 0.0_f64),
        |(dot, a_sq, b_sq), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (dot + x * y, a_sq + x * x, b_sq + y * y)
        },
    );

    let denom = (a_sq * b_sq).sqrt();
    if denom < f64::EPSILON || !denom.is_finite() {
        return 0.0;
    }

    let score = dot / denom;
    if !score.is_finite() {
        return 0.0;
    }

    #[allow(clippy::cast_possible_truncation)]
    {
        score.clamp(0.0, 1.0) as f32
    }
}

/// Pack an embedding into the little-endian byte form stored at rest.
pub fn embedding_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Unpack a stored blob. A trailing partial chunk (a corrupt row) is
/// dropped rather than padded.
pub fn blob_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
