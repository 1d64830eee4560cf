
use super::StoreError;

/// A neighbor returned by [`FlatIndex::search`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Insertion position of the vector
    pub position: usize,
    /// Squared Euclidean distance to the query
    pub distance: f32,
}

/// Append-only exhaustive L2 index over fixed-dimension vectors
///
/// Vectors are stored contiguously; position `i` occupies
/// `vectors[i * dimension..(i + 1) * dimension]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    /// Rebuild an index from contiguous vector data
    #[inline]
    pub fn from_flat(dimension: usize, vectors: Vec<f32>) -> Result<Self, StoreError> {
        if dimension == 0 || vectors.len() % dimension != 0 {
            return Err(StoreError::InvalidSnapshot(format!(
                "{} values do not divide into {}-dimensional vectors",
                vectors.len(),
                dimension
            )));
        }
        Ok(Self { dimension, vectors })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors in the index
    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[inline]
    pub fn as_flat(&self) -> &[f32] {
        &self.vectors
    }

    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Append a vector, returning its position
    #[inline]
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let position = self.len();
        self.vectors.extend_from_slice(vector);
        Ok(position)
    }

    /// Return the `k` nearest vectors to `query`, closest first
    ///
    /// Ties are broken by insertion position.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2(query, vector),
            })
            .collect();

        let by_distance = |a: &Neighbor, b: &Neighbor| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        };

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, by_distance);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(by_distance);

        Ok(neighbors)
    }
}

#[inline]
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
