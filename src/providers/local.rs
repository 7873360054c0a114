//! Local embedding model using candle + sentence-transformers.

use super::{EmbedPurpose, Embedding, EmbeddingProvider, TokenCount};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;
use tracing::{debug, info};

const PROVIDER: &str = "local";

fn provider_error(context: &str, err: impl std::fmt::Display) -> EvalError {
    EvalError::provider(PROVIDER, format!("{}: {}", context, err))
}

/// Sentence-transformers BERT model run on the CPU.
///
/// Local embeddings cost nothing; token counts come from the tokenizer and are
/// reported, not estimated.
pub struct LocalEmbedder {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LocalEmbedder {
    /// Download (or reuse the cached copy of) a model from the Hugging Face Hub.
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;
        info!(model = model_id, "loading local embedding model");

        let api = Api::new().map_err(|e| provider_error("Failed to create HF Hub API", e))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .map_err(|e| provider_error("Failed to get config.json", e))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| provider_error("Failed to get tokenizer.json", e))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| provider_error("Failed to get model weights", e))?;

        let raw_config =
            std::fs::read_to_string(&config_path).map_err(|e| EvalError::io(&config_path, e))?;
        let config: BertConfig = serde_json::from_str(&raw_config).map_err(|e| {
            EvalError::Configuration(format!("Invalid model config for '{}': {}", model_id, e))
        })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| provider_error("Failed to load tokenizer", e))?;

        // SAFETY: the weights file is in the hub cache and not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|e| provider_error("Failed to load model weights", e))?
        };
        let model =
            BertModel::load(vb, &config).map_err(|e| provider_error("Failed to load BERT model", e))?;

        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
        })
    }

    /// Mean-pooled, L2-normalized embedding and the number of attended tokens.
    fn encode(&self, text: &str) -> Result<(Vec<f32>, u64)> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| provider_error("Tokenization failed", e))?;

        let ids = encoding.get_ids().to_vec();
        let mask = encoding.get_attention_mask().to_vec();
        let len = ids.len();
        let tokens: u64 = mask.iter().map(|&m| m as u64).sum();

        self.forward(ids, mask, len)
            .map(|vector| (vector, tokens))
            .map_err(|e| provider_error("Inference failed", e))
    }

    fn forward(
        &self,
        ids: Vec<u32>,
        mask: Vec<u32>,
        len: usize,
    ) -> candle_core::Result<Vec<f32>> {
        let input_ids = Tensor::from_vec(ids, (1, len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (1, len), &self.device)?;
        let token_type_ids = Tensor::zeros((1, len), candle_core::DType::U32, &self.device)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over attended positions
        let mask = attention_mask
            .unsqueeze(2)?
            .to_dtype(output.dtype())?
            .broadcast_as(output.shape())?;
        let summed = (output * &mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = (summed / counts)?;

        let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norms)?;

        Ok(normalized.squeeze(0)?.to_vec1::<f32>()?)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Embedding> {
        let (vector, tokens) = self.encode(text)?;
        debug!(
            purpose = purpose.as_str(),
            tokens,
            dimension = vector.len(),
            "local embedding"
        );
        Ok(Embedding {
            vector,
            tokens: TokenCount::reported(tokens),
        })
    }
}
