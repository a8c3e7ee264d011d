//! Exact in-memory vector index.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use carebot_shared::{CarebotError, Result};

use crate::{IndexedChunk, Neighbor, VectorIndex};

/// One record of the on-disk chunk index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexRecord {
    content: String,
    source_file: String,
    embedding: Vec<f32>,
}

/// Brute-force inner-product search over a fixed chunk table.
///
/// Equal scores keep the order in which records were loaded.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    records: Vec<IndexRecord>,
    dimension: usize,
}

impl FlatIndex {
    /// An index with no chunks; every search comes back empty.
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            dimension: 0,
        }
    }

    /// Build an index; every embedding must have the same non-zero length.
    fn from_records(records: Vec<IndexRecord>) -> Result<Self> {
        let dimension = records.first().map(|r| r.embedding.len()).unwrap_or(0);
        if !records.is_empty() && dimension == 0 {
            return Err(CarebotError::validation("index records have empty embeddings"));
        }
        if let Some((i, record)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.embedding.len() != dimension)
        {
            return Err(CarebotError::validation(format!(
                "index record {i} ({}) has dimension {}, expected {dimension}",
                record.source_file,
                record.embedding.len()
            )));
        }
        Ok(Self { records, dimension })
    }

    /// Load a JSON array of [`IndexRecord`]s.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CarebotError::io(path, e))?;
        let records: Vec<IndexRecord> = serde_json::from_str(&content).map_err(|e| {
            CarebotError::parse(format!("invalid chunk index {}: {e}", path.display()))
        })?;
        let index = Self::from_records(records)?;
        info!(path = %path.display(), chunks = index.len(), dimension = index.dimension, "chunk index loaded");
        Ok(index)
    }
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(CarebotError::validation(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<Neighbor> = self
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| Neighbor {
                index,
                score: dot(query, &record.embedding),
            })
            .collect();
        // Stable sort: ties stay in load order.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    fn chunk(&self, index: usize) -> Option<IndexedChunk> {
        self.records.get(index).map(|r| IndexedChunk {
            content: r.content.clone(),
            source_id: r.source_file.clone(),
        })
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str, embedding: &[f32]) -> IndexRecord {
        IndexRecord {
            content: content.into(),
            source_file: format!("{content}.pdf"),
            embedding: embedding.to_vec(),
        }
    }

    fn sample() -> FlatIndex {
        FlatIndex::from_records(vec![
            record("iron", &[1.0, 0.0]),
            record("sleep", &[0.0, 1.0]),
            record("folate", &[0.8, 0.6]),
            record("iron-twin", &[1.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn search_orders_by_decreasing_score() {
        let hits = sample().search(&[1.0, 0.0], 3).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(order, vec![0, 3, 2]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn k_larger_than_index_returns_everything() {
        let hits = sample().search(&[0.0, 1.0], 10).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].index, 1);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let err = sample().search(&[1.0, 0.0, 0.0], 2).unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn empty_index_finds_nothing() {
        let index = FlatIndex::empty();
        assert_eq!(index.len(), 0);
        assert!(index.search(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn ragged_records_rejected() {
        let err = FlatIndex::from_records(vec![record("a", &[1.0]), record("b", &[1.0, 2.0])])
            .unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn load_reads_json_file() {
        let path = std::env::temp_dir().join(format!("carebot_index_{}.json", std::process::id()));
        let json = serde_json::to_string(&vec![record("iron", &[1.0, 0.0])]).unwrap();
        std::fs::write(&path, json).unwrap();

        let index = FlatIndex::load(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension, 2);
        assert_eq!(index.chunk(0).unwrap().source_id, "iron.pdf");
        assert!(index.chunk(1).is_none());

        let _ = std::fs::remove_file(&path);
    }
}
