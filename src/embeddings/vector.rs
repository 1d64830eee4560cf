use super::EmbeddingError;

/// A validated embedding: non-empty and free of NaN/infinite components
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    #[inline]
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(position) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { position });
        }
        Ok(Self(values))
    }

    #[inline]
    pub fn zeros(dimension: usize) -> Self {
        Self(vec![0.0; dimension])
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[inline]
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Truncate or zero-pad to exactly `dimension` components
    #[inline]
    #[must_use]
    pub fn reconcile(mut self, dimension: usize) -> Self {
        self.0.resize(dimension, 0.0);
        self
    }

    /// Scale to unit L2 length. The zero vector is returned unchanged.
    #[inline]
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let norm = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut self.0 {
                *v /= norm;
            }
        }
        self
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }
}

impl From<Embedding> for Vec<f32> {
    #[inline]
    fn from(embedding: Embedding) -> Self {
        embedding.0
    }
}
