use crate::Result;
use async_trait::async_trait;

/// Trait for embedding providers that convert text to vectors.
///
/// Models are identified by string; a provider may serve several. The
/// engine caches results per artifact in
/// [`SemanticView`](crate::types::SemanticView)s, so providers are only
/// consulted for texts they have not seen.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text under a named model.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in batch.
    ///
    /// Default implementation calls [`embed`](Self::embed) per text;
    /// providers with batch endpoints should override.
    async fn embed_batch(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text, model).await?);
        }
        Ok(embeddings)
    }

    /// Dimensionality of a model's vectors, if the provider serves it.
    fn dimension(&self, model: &str) -> Option<usize>;

    /// Whether the provider serves a model.
    fn supports(&self, model: &str) -> bool {
        self.dimension(model).is_some()
    }
}
