//! Process-owned handle to the sentence-embedding model.
//!
//! The model is loaded once at startup on the best available device and kept
//! for the life of the process. Encoding takes the GIL, so callers run it on
//! a blocking task; everything that comes back is plain Rust data.

use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::info;

pub const MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// Mini-batch size for the accelerator forward passes within one document
/// batch.
pub const EMBED_BATCH_SIZE: usize = 512;

pub struct Encoder {
    model: Py<PyAny>,
    device: String,
    /// Embedding width, probed from the warm-up pass.
    pub dim: usize,
}

/// Probes CUDA. With an accelerator present, pins device 0 and enables TF32
/// matmul plus cudnn benchmark autotuning; otherwise falls back to the CPU.
fn configure_device(py: Python<'_>) -> PyResult<String> {
    let torch = py.import("torch")?;
    let available: bool = torch
        .getattr("cuda")?
        .call_method0("is_available")?
        .extract()?;

    if available {
        let backends = torch.getattr("backends")?;
        backends
            .getattr("cuda")?
            .getattr("matmul")?
            .setattr("allow_tf32", true)?;
        let cudnn = backends.getattr("cudnn")?;
        cudnn.setattr("allow_tf32", true)?;
        cudnn.setattr("benchmark", true)?;
        Ok("cuda:0".to_string())
    } else {
        Ok("cpu".to_string())
    }
}

fn encode_with(
    py: Python<'_>,
    model: &Bound<'_, PyAny>,
    segments: &[String],
    batch_size: usize,
) -> anyhow::Result<(Vec<f32>, usize)> {
    let kwargs = PyDict::new(py);
    kwargs.set_item("batch_size", batch_size)?;
    kwargs.set_item("show_progress_bar", false)?;
    kwargs.set_item("convert_to_numpy", true)?;

    let array = model.call_method("encode", (segments.to_vec(),), Some(&kwargs))?;
    let rows: Vec<Vec<f32>> = array.call_method0("tolist")?.extract()?;

    let dim = rows.first().map(Vec::len).unwrap_or(0);
    let mut flat = Vec::with_capacity(rows.len() * dim);
    for row in rows {
        flat.extend(row);
    }
    Ok((flat, dim))
}

impl Encoder {
    /// Loads the model and runs one dummy forward pass so the first real
    /// batch does not pay for kernel selection and cache warm-up.
    pub fn new() -> anyhow::Result<Self> {
        Python::with_gil(|py| -> anyhow::Result<Self> {
            let device = configure_device(py)?;
            info!("Embedding model {MODEL_NAME} on device {device}");

            let kwargs = PyDict::new(py);
            kwargs.set_item("device", &device)?;
            let model = py
                .import("sentence_transformers")?
                .getattr("SentenceTransformer")?
                .call((MODEL_NAME,), Some(&kwargs))?;

            let (_, dim) = encode_with(py, &model, &[String::new()], 1)?;

            Ok(Self {
                model: model.unbind(),
                device,
                dim,
            })
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Encodes all segments in [`EMBED_BATCH_SIZE`] mini-batches and returns
    /// the embeddings as one flat row-major `(segments.len(), dim)` buffer.
    pub fn encode(&self, segments: &[String]) -> anyhow::Result<(Vec<f32>, usize)> {
        if segments.is_empty() {
            return Ok((Vec::new(), self.dim));
        }
        Python::with_gil(|py| encode_with(py, self.model.bind(py), segments, EMBED_BATCH_SIZE))
    }
}
