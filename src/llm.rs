use std::num::NonZeroU32;
use std::pin::pin;

use anyhow::{Context, Result};
use log::{debug, info, trace};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use crate::content::Scenario;
use crate::remote::{build_messages, ChatMessage, DialogueCollaborator, RemoteError, RemoteRequest};

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ModelConfig {
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Maximum tokens to generate per completion.
    pub max_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_ctx: 8092,
            max_tokens: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

fn build_sampler() -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, 1.1, 0.0, 0.0),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(0.95, 1),
        LlamaSampler::min_p(0.0, 1),
        LlamaSampler::temp(0.8),
        LlamaSampler::dist(1234),
    ])
}

/// Tokens that may be sampled after a prompt of `prompt_len` tokens without
/// running past the context window.
fn generation_budget(prompt_len: usize, n_ctx: u32, max_tokens: usize) -> usize {
    max_tokens.min((n_ctx as usize).saturating_sub(prompt_len))
}

// ---------------------------------------------------------------------------
// Loaded model handle
// ---------------------------------------------------------------------------

pub struct LLM {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    n_ctx: u32,
    max_tokens: usize,
}

impl LLM {
    pub fn load_model(model_path: &str, config: ModelConfig) -> Result<Self> {
        let n_ctx = NonZeroU32::new(config.n_ctx).context("context size must be > 0")?;

        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading model from: {model_path}");
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}",
            config.n_gpu_layers, config.n_ctx, config.max_tokens
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .context("failed to load model")?,
        ));

        info!("Model loaded successfully");

        let ctx_params = LlamaContextParams::default().with_n_ctx(Some(n_ctx));
        let ctx = model
            .new_context(backend, ctx_params)
            .context("failed to create inference context")?;

        Ok(Self {
            backend,
            model,
            ctx,
            n_ctx: config.n_ctx,
            max_tokens: config.max_tokens,
        })
    }

    /// Run a chat completion and return the raw text.
    pub fn chat(&mut self, messages: &[ChatMessage]) -> Result<String> {
        let mut sampler = build_sampler();
        self.generate(messages, &mut sampler)
    }

    /// Core generation: tokenize messages, feed prompt, sample tokens.
    fn generate(&mut self, messages: &[ChatMessage], sampler: &mut LlamaSampler) -> Result<String> {
        info!("=== LLM CALL: {} messages ===", messages.len());
        for (i, msg) in messages.iter().enumerate() {
            debug!("  msg[{i}] {msg}");
        }

        self.ctx.clear_kv_cache();

        let llama_msgs: Vec<LlamaChatMessage> = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to create chat messages")?;

        let tmpl = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &llama_msgs, true)
            .context("failed to apply chat template")?;

        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .context("tokenization failed")?;
        anyhow::ensure!(!tokens.is_empty(), "prompt rendered to zero tokens");
        anyhow::ensure!(
            tokens.len() < self.n_ctx as usize,
            "prompt of {} tokens does not fit a context of {}",
            tokens.len(),
            self.n_ctx
        );

        info!("Prompt tokenized: {} tokens", tokens.len());

        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch.add(*tok, i, &[0], i == last_idx)?;
        }
        self.ctx
            .decode(&mut batch)
            .context("initial decode failed")?;

        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();
        let budget = generation_budget(tokens.len(), self.n_ctx, self.max_tokens);
        if budget < self.max_tokens {
            debug!("Generation capped at {budget} tokens by the context window");
        }

        for _ in 0..budget {
            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                debug!("Hit EOG token, stopping generation");
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .context("token_to_piece failed")?;
            output.push_str(&piece);

            batch.clear();
            batch.add(tok, n_cur, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            n_cur += 1;
        }

        info!(
            "=== LLM RAW OUTPUT ({} chars) ===\n{}\n=== END OUTPUT ===",
            output.len(),
            output
        );

        Ok(output)
    }
}

impl DialogueCollaborator for LLM {
    fn respond(&mut self, scenario: &Scenario, request: &RemoteRequest) -> Result<String, RemoteError> {
        let messages = build_messages(scenario, request);
        self.chat(&messages)
            .map_err(|err| RemoteError::Transport(format!("{err:#}")))
    }
}
