//! The seam between the narrator and the text generation service.

use async_trait::async_trait;
use deepinfra::{DeepInfra, Message, Request, ResponseFormat};

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
}

impl Sampling {
    pub const fn new(temperature: f32, top_p: f32) -> Self {
        Self { temperature, top_p }
    }

    /// Whether both values lie in [0, 1].
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.temperature) && (0.0..=1.0).contains(&self.top_p)
    }
}

/// Something that turns a conversation into one assistant reply.
///
/// Implementations hold no per-call state; the narrator shares one behind
/// an `Arc` across every operation.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        sampling: Sampling,
        format: ResponseFormat,
    ) -> Result<String, deepinfra::Error>;
}

#[async_trait]
impl TextBackend for DeepInfra {
    async fn generate(
        &self,
        messages: &[Message],
        sampling: Sampling,
        format: ResponseFormat,
    ) -> Result<String, deepinfra::Error> {
        let mut request = Request::new(messages.to_vec())
            .with_temperature(sampling.temperature)
            .with_top_p(sampling.top_p);
        if format == ResponseFormat::JsonObject {
            request = request.with_json_output();
        }

        let response = self.complete(request).await?;

        if let Some(usage) = response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Generation usage"
            );
        }

        Ok(response.content)
    }
}
