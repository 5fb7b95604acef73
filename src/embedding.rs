//! Per-document reduction of segment embeddings.
//!
//! The encoder hands back one flat row-major `(total_segments, dim)` buffer
//! for a whole batch; this module collapses each document's run of rows into
//! a single mean vector and L2-normalizes it. This runs once per batch on
//! the CPU and is the hottest pure-Rust loop in the pipeline, hence the
//! index arithmetic over a contiguous slice.

/// Mean-then-normalize for every document in a batch.
///
/// `flat` is row-major with `dim` columns; `counts[i]` is the number of
/// consecutive rows belonging to document `i`. A document with a zero mean
/// (or zero segments) comes back as the zero vector rather than NaN.
pub fn reduce_documents(flat: &[f32], dim: usize, counts: &[usize]) -> Vec<Vec<f32>> {
    debug_assert_eq!(flat.len(), counts.iter().sum::<usize>() * dim);

    let mut documents = Vec::with_capacity(counts.len());
    let mut row = 0usize;

    for &count in counts {
        let mut mean = vec![0.0f32; dim];

        for r in row..row + count {
            let base = r * dim;
            for d in 0..dim {
                mean[d] += flat[base + d];
            }
        }
        if count > 0 {
            let inv = 1.0 / count as f32;
            for value in mean.iter_mut() {
                *value *= inv;
            }
        }

        let norm = mean.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in mean.iter_mut() {
                *value /= norm;
            }
        }

        row += count;
        documents.push(mean);
    }

    documents
}
