//! HNSW vector store with cosine distance.
//!
//! Vector ids are assigned from a monotonic counter; a forward map
//! (vector id → chunk id) and reverse map (chunk id → vector id) stay
//! mutual inverses over live entries. Deletion is soft: the entry leaves
//! both maps while its point stays in the graph as a tombstone, excluded
//! from results at query time. The graph never reclaims space; tombstones
//! disappear when the index is rebuilt from the persisted payload on the
//! next load.
//!
//! Persistence is `vectors.bin` (bincode, live vectors ordered by vector
//! id) plus the `vectors.meta.json` sidecar holding both maps and the
//! counter. A missing or corrupt pair degrades to an empty store.

use hnsw_rs::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::VectorConfig;
use crate::error::CodiiErr;
use crate::error::Result;

const VECTORS_FILE: &str = "vectors.bin";
const META_FILE: &str = "vectors.meta.json";

/// HNSW max-layer parameter; the library caps layers internally.
const MAX_LAYER: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaFile {
    id_mapping: HashMap<u64, i64>,
    reverse_mapping: HashMap<i64, u64>,
    next_id: u64,
}

struct VectorInner {
    index: Option<Hnsw<'static, f32, DistCosine>>,
    /// Fixed at first insertion (or load) from the embedding dimension
    dimension: Option<usize>,
    /// Live vectors by vector id; this is the persisted payload
    vectors: BTreeMap<u64, Vec<f32>>,
    /// vector id → chunk id, live entries only
    id_mapping: HashMap<u64, i64>,
    /// chunk id → vector id, live entries only
    reverse_mapping: HashMap<i64, u64>,
    next_id: u64,
    /// Points inserted into the current graph instance, tombstones included
    graph_points: usize,
}

impl VectorInner {
    fn empty() -> Self {
        Self {
            index: None,
            dimension: None,
            vectors: BTreeMap::new(),
            id_mapping: HashMap::new(),
            reverse_mapping: HashMap::new(),
            next_id: 0,
            graph_points: 0,
        }
    }
}

/// Persistent approximate-nearest-neighbor store over chunk embeddings.
pub struct VectorStore {
    dir: PathBuf,
    config: VectorConfig,
    inner: Mutex<VectorInner>,
}

impl VectorStore {
    /// Open the store under `dir`, loading any persisted state.
    ///
    /// Load failure is recovered locally: the store logs and starts empty,
    /// never propagating the error.
    pub fn open(dir: &Path, config: VectorConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self {
            dir: dir.to_path_buf(),
            config,
            inner: Mutex::new(VectorInner::empty()),
        };

        match store.load_from_disk() {
            Ok(Some(inner)) => {
                *store.lock() = inner;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Failed to load vector index, starting empty"
                );
            }
        }

        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VectorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(dir = %self.dir.display(), "Vector store mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn vectors_file(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    fn meta_file(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Returns `Ok(None)` when nothing is persisted yet.
    fn load_from_disk(&self) -> Result<Option<VectorInner>> {
        let vectors_file = self.vectors_file();
        let meta_file = self.meta_file();
        if !vectors_file.exists() || !meta_file.exists() {
            return Ok(None);
        }

        let meta_raw = std::fs::read_to_string(&meta_file)?;
        let meta: MetaFile =
            serde_json::from_str(&meta_raw).map_err(|e| CodiiErr::VectorStoreError {
                cause: format!("malformed sidecar: {e}"),
            })?;

        let payload = std::fs::read(&vectors_file)?;
        let entries: Vec<(u64, Vec<f32>)> =
            bincode::deserialize(&payload).map_err(|e| CodiiErr::VectorStoreError {
                cause: format!("malformed vector payload: {e}"),
            })?;

        let mut inner = VectorInner::empty();
        inner.id_mapping = meta.id_mapping;
        inner.reverse_mapping = meta.reverse_mapping;
        inner.next_id = meta.next_id;

        for (vector_id, vector) in entries {
            if inner.dimension.is_none() {
                inner.dimension = Some(vector.len());
            }
            inner.vectors.insert(vector_id, vector);
        }

        // Rebuild the graph from the live payload; vectors tombstoned
        // before the last save are gone for good.
        if let Some(dim) = inner.dimension {
            let index = self.new_index(dim);
            for (vector_id, vector) in &inner.vectors {
                index.insert((vector, *vector_id as usize));
            }
            inner.graph_points = inner.vectors.len();
            inner.index = Some(index);
        }

        tracing::info!(
            dir = %self.dir.display(),
            vectors = inner.vectors.len(),
            "Loaded vector index"
        );
        Ok(Some(inner))
    }

    fn new_index(&self, _dimension: usize) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::new(
            self.config.hnsw_m,
            self.config.max_elements,
            MAX_LAYER,
            self.config.hnsw_ef_construction,
            DistCosine {},
        )
    }

    /// Append vectors for the given chunk ids.
    ///
    /// Vector ids are assigned from the monotonic counter; both maps are
    /// updated. The dimension is fixed by the first vector ever added.
    pub fn add_vectors(&self, chunk_ids: &[i64], vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        if chunk_ids.len() != vectors.len() {
            return Err(CodiiErr::VectorStoreError {
                cause: format!(
                    "chunk id / vector count mismatch: {} vs {}",
                    chunk_ids.len(),
                    vectors.len()
                ),
            });
        }

        let mut inner = self.lock();

        let dim = match inner.dimension {
            Some(dim) => dim,
            None => {
                let dim = vectors[0].len();
                inner.dimension = Some(dim);
                dim
            }
        };
        for vector in &vectors {
            if vector.len() != dim {
                return Err(CodiiErr::VectorStoreError {
                    cause: format!("dimension mismatch: expected {dim}, got {}", vector.len()),
                });
            }
        }

        if inner.index.is_none() {
            inner.index = Some(self.new_index(dim));
        }

        for (chunk_id, vector) in chunk_ids.iter().zip(vectors) {
            let vector_id = inner.next_id;
            inner.next_id += 1;

            if let Some(index) = &inner.index {
                index.insert((&vector, vector_id as usize));
            }
            inner.graph_points += 1;
            inner.vectors.insert(vector_id, vector);
            inner.id_mapping.insert(vector_id, *chunk_id);
            inner.reverse_mapping.insert(*chunk_id, vector_id);
        }

        Ok(())
    }

    /// Nearest live entries to `query`, up to `k`.
    ///
    /// An empty store returns an empty list without touching the ANN layer.
    /// Tombstoned vectors are filtered out; the request is widened by the
    /// tombstone count so they cannot crowd out live results.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        let inner = self.lock();
        if inner.id_mapping.is_empty() || k == 0 {
            return Vec::new();
        }
        let Some(index) = &inner.index else {
            return Vec::new();
        };

        let tombstones = inner.graph_points.saturating_sub(inner.id_mapping.len());
        let knbn = (k + tombstones).min(inner.graph_points);
        let ef = self.config.hnsw_ef_search.max(knbn);

        index
            .search(query, knbn, ef)
            .into_iter()
            .filter_map(|neighbour| {
                inner
                    .id_mapping
                    .get(&(neighbour.d_id as u64))
                    .map(|chunk_id| (*chunk_id, neighbour.distance))
            })
            .take(k)
            .collect()
    }

    /// Soft-delete one chunk's vector. Returns whether it was present.
    pub fn remove_by_chunk_id(&self, chunk_id: i64) -> bool {
        let mut inner = self.lock();
        let Some(vector_id) = inner.reverse_mapping.remove(&chunk_id) else {
            return false;
        };
        inner.id_mapping.remove(&vector_id);
        inner.vectors.remove(&vector_id);
        true
    }

    /// Soft-delete many chunks' vectors. Returns how many were present.
    pub fn remove_by_chunk_ids(&self, chunk_ids: &[i64]) -> usize {
        chunk_ids
            .iter()
            .filter(|id| self.remove_by_chunk_id(**id))
            .count()
    }

    /// Persist the live payload and the id-mapping sidecar.
    pub fn save(&self) -> Result<()> {
        let inner = self.lock();

        let entries: Vec<(u64, Vec<f32>)> = inner
            .vectors
            .iter()
            .map(|(id, vector)| (*id, vector.clone()))
            .collect();
        let payload = bincode::serialize(&entries).map_err(|e| CodiiErr::VectorStoreError {
            cause: format!("vector serialization failed: {e}"),
        })?;
        std::fs::write(self.vectors_file(), payload)?;

        let meta = MetaFile {
            id_mapping: inner.id_mapping.clone(),
            reverse_mapping: inner.reverse_mapping.clone(),
            next_id: inner.next_id,
        };
        let meta_json =
            serde_json::to_vec_pretty(&meta).map_err(|e| CodiiErr::VectorStoreError {
                cause: format!("sidecar serialization failed: {e}"),
            })?;
        std::fs::write(self.meta_file(), meta_json)?;

        Ok(())
    }

    /// Drop all state and delete the persisted files.
    pub fn clear(&self) -> Result<()> {
        *self.lock() = VectorInner::empty();

        for file in [self.vectors_file(), self.meta_file()] {
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        Ok(())
    }

    /// Number of live vectors.
    pub fn vector_count(&self) -> usize {
        self.lock().id_mapping.len()
    }

    /// Vector id currently mapped for a chunk, if live.
    pub fn vector_id_for_chunk(&self, chunk_id: i64) -> Option<u64> {
        self.lock().reverse_mapping.get(&chunk_id).copied()
    }

    /// Embedding dimension, once fixed.
    pub fn dimension(&self) -> Option<usize> {
        self.lock().dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_in(dir: &Path) -> VectorStore {
        VectorStore::open(dir, VectorConfig::default()).unwrap()
    }

    /// Axis-aligned unit vectors make nearest-neighbor outcomes exact.
    fn axis(dim: usize, index: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[index] = 1.0;
        v
    }

    #[test]
    fn empty_store_search_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.search(&[1.0, 0.0, 0.0, 0.0], 5).is_empty());
        assert_eq!(store.vector_count(), 0);
    }

    #[test]
    fn add_and_search_finds_exact_match_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store
            .add_vectors(&[10, 11, 12], vec![axis(4, 0), axis(4, 1), axis(4, 2)])
            .unwrap();

        let hits = store.search(&axis(4, 1), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 11);
        assert!(hits[0].1 < hits[1].1);
    }

    #[test]
    fn dimension_is_fixed_by_first_add() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.add_vectors(&[1], vec![axis(4, 0)]).unwrap();
        assert_eq!(store.dimension(), Some(4));

        let err = store.add_vectors(&[2], vec![vec![1.0; 8]]).unwrap_err();
        assert!(matches!(err, CodiiErr::VectorStoreError { .. }));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let err = store.add_vectors(&[1, 2], vec![axis(4, 0)]).unwrap_err();
        assert!(matches!(err, CodiiErr::VectorStoreError { .. }));
    }

    #[test]
    fn soft_delete_excludes_from_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .add_vectors(&[10, 11], vec![axis(4, 0), axis(4, 1)])
            .unwrap();

        assert!(store.remove_by_chunk_id(10));
        assert!(!store.remove_by_chunk_id(10));
        assert_eq!(store.vector_count(), 1);

        // The tombstoned vector must not resurface even as nearest match.
        let hits = store.search(&axis(4, 0), 2);
        assert_eq!(hits.iter().filter(|(id, _)| *id == 10).count(), 0);
        assert!(hits.iter().any(|(id, _)| *id == 11));
    }

    #[test]
    fn remove_many_reports_found_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .add_vectors(&[1, 2, 3], vec![axis(4, 0), axis(4, 1), axis(4, 2)])
            .unwrap();
        assert_eq!(store.remove_by_chunk_ids(&[1, 3, 99]), 2);
        assert_eq!(store.vector_count(), 1);
    }

    #[test]
    fn vector_ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.add_vectors(&[5], vec![axis(4, 0)]).unwrap();
        store.add_vectors(&[6], vec![axis(4, 1)]).unwrap();
        assert_eq!(store.vector_id_for_chunk(5), Some(0));
        assert_eq!(store.vector_id_for_chunk(6), Some(1));

        // Counter does not regress after a delete.
        store.remove_by_chunk_id(6);
        store.add_vectors(&[7], vec![axis(4, 2)]).unwrap();
        assert_eq!(store.vector_id_for_chunk(7), Some(2));
    }

    #[test]
    fn save_load_roundtrip_preserves_results() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store
                .add_vectors(&[20, 21, 22], vec![axis(4, 0), axis(4, 1), axis(4, 2)])
                .unwrap();
            store.remove_by_chunk_id(22);
            store.save().unwrap();
        }

        let reloaded = store_in(dir.path());
        assert_eq!(reloaded.vector_count(), 2);
        let hits = reloaded.search(&axis(4, 1), 1);
        assert_eq!(hits[0].0, 21);

        // Counter persists so new ids never collide with old ones.
        reloaded.add_vectors(&[23], vec![axis(4, 3)]).unwrap();
        assert_eq!(reloaded.vector_id_for_chunk(23), Some(3));
    }

    #[test]
    fn corrupt_sidecar_degrades_to_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VECTORS_FILE), b"junk").unwrap();
        std::fs::write(dir.path().join(META_FILE), b"{not json").unwrap();

        let store = store_in(dir.path());
        assert_eq!(store.vector_count(), 0);
        assert!(store.search(&[1.0, 0.0, 0.0, 0.0], 3).is_empty());
    }

    #[test]
    fn clear_removes_state_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.add_vectors(&[1], vec![axis(4, 0)]).unwrap();
        store.save().unwrap();
        assert!(dir.path().join(VECTORS_FILE).exists());

        store.clear().unwrap();
        assert_eq!(store.vector_count(), 0);
        assert!(!dir.path().join(VECTORS_FILE).exists());
        assert!(!dir.path().join(META_FILE).exists());
    }
}
