//! ONNX Runtime encoder for sentence-transformers models.
//!
//! Turns one log message into a mean-pooled, L2-normalized embedding
//! (384 dimensions for all-MiniLM-L6-v2). The model directory must
//! contain `model.onnx` and `tokenizer.json`.

use std::path::Path;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::info;

/// Sentence embedding encoder using ONNX Runtime.
///
/// Loaded once at process start and treated as read-only afterwards; the
/// session's scratch buffers need `&mut`, so callers serialize access.
pub struct Encoder {
    session: Session,
    tokenizer: Tokenizer,
    dim: usize,
}

impl Encoder {
    /// Load an encoder from a directory containing `model.onnx` and `tokenizer.json`.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?.commit_from_file(&model_path)?;

        // Infer embedding dimension from model output shape.
        let dim = infer_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;

        // Truncate to the model's max sequence length (256 for MiniLM).
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: 256,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;

        info!(dim, model = %model_path.display(), "loaded embedding model");
        Ok(Self {
            session,
            tokenizer,
            dim,
        })
    }

    /// Embedding dimensionality (384 for all-MiniLM-L6-v2).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Encode a single log message into a normalized vector.
    ///
    /// Rows are classified one at a time, so the encoder only carries the
    /// single-text path.
    pub fn encode(&mut self, text: &str) -> anyhow::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let seq_len = encoding.get_ids().len();
        anyhow::ensure!(seq_len > 0, "tokenizer produced an empty encoding");

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding
            .get_type_ids()
            .iter()
            .map(|&t| t as i64)
            .collect();

        let shape = [1i64, seq_len as i64];

        let ids_tensor = Tensor::from_array((shape, input_ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape, attention_mask.clone().into_boxed_slice()))?;
        let type_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs![
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => type_tensor,
        ])?;

        // Token embeddings: [1, seq_len, dim].
        let (output_shape, output_data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = output_shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] == 1 && dims[2] as usize == self.dim,
            "unexpected output shape: {dims:?}, expected [1, {seq_len}, {}]",
            self.dim
        );

        let actual_seq_len = dims[1] as usize;

        // Mean pooling with the attention mask.
        let mut pooled = vec![0.0f32; self.dim];
        let mut token_count = 0.0f32;
        for (j, &mask) in attention_mask.iter().enumerate().take(actual_seq_len) {
            let mask_val = mask as f32;
            if mask_val > 0.0 {
                let offset = j * self.dim;
                for (d, p) in pooled.iter_mut().enumerate() {
                    *p += output_data[offset + d] * mask_val;
                }
                token_count += mask_val;
            }
        }

        if token_count > 0.0 {
            for p in &mut pooled {
                *p /= token_count;
            }
        }
        normalize(&mut pooled);

        Ok(pooled)
    }
}

/// L2-normalize a vector in place.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Try to infer the embedding dimension from the ONNX model output type.
fn infer_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => {
            // Last dimension is the embedding dim.
            shape
                .last()
                .and_then(|&d| if d > 0 { Some(d as usize) } else { None })
        }
        _ => None,
    }
}
