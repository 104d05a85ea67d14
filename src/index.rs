//! Exact nearest-neighbour index over squared Euclidean distance.
//!
//! Rows are stored back to back in one `Vec<f32>`; row `i` is the embedding of
//! chunk `i`. The index is append-only: removing content means building a new
//! index from the rows that survive.

use rayon::prelude::*;
use std::cmp::Ordering;
use std::mem::size_of;

use crate::config::Number;
use crate::error::{RagError, Result};
use crate::vector_ops::squared_l2_distance_simd;

const MAGIC: &[u8; 4] = b"RVIX";
const FORMAT_VERSION: u32 = 1;
/// magic + version + dimension + row count
pub const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row: usize,
    pub distance: Number,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<Number>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfig(
                "index dimension must be at least 1".into(),
            ));
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    /// Build an index holding exactly `rows`, in order.
    pub fn from_rows<V: AsRef<[Number]>>(dimension: usize, rows: &[V]) -> Result<Self> {
        let mut index = Self::new(dimension)?;
        index.add(rows)?;
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[Number]> {
        let start = index.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Number]> {
        self.data.chunks_exact(self.dimension)
    }

    /// Append rows. Either every row is appended or, on a dimension mismatch,
    /// none is.
    pub fn add<V: AsRef<[Number]>>(&mut self, vectors: &[V]) -> Result<()> {
        if let Some(bad) = vectors
            .iter()
            .map(|v| v.as_ref().len())
            .find(|&len| len != self.dimension)
        {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad,
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector.as_ref());
        }
        Ok(())
    }

    /// The `min(k, len)` nearest rows by ascending distance. Equal distances
    /// keep insertion order.
    pub fn search(&self, query: &[Number], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, vector)| Neighbor {
                row,
                distance: squared_l2_distance_simd(query, vector),
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.row.cmp(&b.row))
        });
        scored.truncate(k.min(self.len()));
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * size_of::<Number>());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend(self.data.iter().flat_map(|&num| num.to_le_bytes()));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RagError::CorruptArtifact(format!(
                "index artifact too short ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(RagError::CorruptArtifact("index artifact has bad magic".into()));
        }

        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(RagError::CorruptArtifact(format!(
                "unsupported index format version {version}"
            )));
        }

        let dimension = read_u32(&bytes[8..12]) as usize;
        let rows = read_u64(&bytes[12..20]) as usize;
        let expected_len = rows
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(size_of::<Number>()))
            .and_then(|n| n.checked_add(HEADER_LEN));
        if dimension == 0 || expected_len != Some(bytes.len()) {
            return Err(RagError::CorruptArtifact(format!(
                "index artifact length {} does not match {rows} rows of dimension {dimension}",
                bytes.len()
            )));
        }

        let data = bytes[HEADER_LEN..]
            .chunks_exact(size_of::<Number>())
            .map(|b| Number::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self { dimension, data })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(rows: &[[f32; 2]]) -> FlatL2Index {
        FlatL2Index::from_rows(2, rows).unwrap()
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(FlatL2Index::new(0).is_err());
    }

    #[test]
    fn test_add_rejects_mismatch_without_partial_append() {
        let mut index = FlatL2Index::new(3).unwrap();
        index.add(&[vec![1.0, 2.0, 3.0]]).unwrap();

        let err = index
            .add(&[vec![4.0, 5.0, 6.0], vec![7.0, 8.0]])
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = index_with(&[[10.0, 0.0], [1.0, 0.0], [5.0, 0.0], [0.0, 0.0]]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let rows: Vec<usize> = hits.iter().map(|n| n.row).collect();
        assert_eq!(rows, vec![3, 1, 2]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].distance, 1.0);
        assert_eq!(hits[2].distance, 25.0);
    }

    #[test]
    fn test_ties_prefer_earlier_rows() {
        let index = index_with(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]]);
        let hits = index.search(&[0.0, 0.0], 4).unwrap();
        let rows: Vec<usize> = hits.iter().map(|n| n.row).collect();
        assert_eq!(rows, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_k_is_capped_by_row_count() {
        let index = index_with(&[[1.0, 1.0], [2.0, 2.0]]);
        assert_eq!(index.search(&[0.0, 0.0], 10).unwrap().len(), 2);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = FlatL2Index::new(4).unwrap();
        assert!(index.search(&[0.0; 4], 3).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = index_with(&[[1.0, 1.0]]);
        assert!(matches!(
            index.search(&[0.0, 0.0, 0.0], 1),
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_bytes_round_trip_and_corruption() {
        let index = index_with(&[[0.5, -1.5], [3.25, 8.0]]);
        let bytes = index.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 4 * 4);
        assert_eq!(FlatL2Index::from_bytes(&bytes).unwrap(), index);

        assert!(FlatL2Index::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(FlatL2Index::from_bytes(&bytes[..10]).is_err());

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            FlatL2Index::from_bytes(&bad_magic),
            Err(RagError::CorruptArtifact(_))
        ));
    }

    #[test]
    fn test_row_access() {
        let index = index_with(&[[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(index.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(index.row(2), None);
        assert_eq!(index.rows().count(), 2);
    }
}
