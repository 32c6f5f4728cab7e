//! In-process vector store implementing the full adapter contract.
//!
//! Backs tests and offline smoke runs. Honors filters, cosine ordering, and
//! scroll semantics so pipeline behavior observed here carries over to a real
//! Qdrant deployment. Scroll order is ascending point id, matching the
//! server's traversal.

use std::collections::BTreeMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::embed::cosine;
use crate::error::{StoreError, StoreResult};
use crate::store::{
    CollectionStats, FieldIndexKind, Filter, PointRecord, ScoredPoint, VectorStore,
};

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    points: BTreeMap<Uuid, PointRecord>,
}

/// In-memory vector store.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl VectorStore for MemoryStore {
    fn ensure_collection(&self, name: &str, dimension: usize) -> StoreResult<()> {
        let mut collections = self.collections.write().expect("store lock");
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension => {
                Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    stored: existing.dimension,
                    requested: dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dimension,
                        points: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn ensure_payload_indexes(
        &self,
        _name: &str,
        _fields: &[(&str, FieldIndexKind)],
    ) -> StoreResult<()> {
        // Every field is "indexed" in memory.
        Ok(())
    }

    fn upsert(&self, name: &str, points: &[PointRecord]) -> StoreResult<()> {
        let mut collections = self.collections.write().expect("store lock");
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound {
                collection: name.to_string(),
            })?;
        for point in points {
            if point.vector.len() != collection.dimension {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    stored: collection.dimension,
                    requested: point.vector.len(),
                });
            }
            collection.points.insert(point.id, point.clone());
        }
        Ok(())
    }

    fn delete_by_filter(&self, name: &str, filter: &Filter) -> StoreResult<()> {
        let mut collections = self.collections.write().expect("store lock");
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound {
                collection: name.to_string(),
            })?;
        collection
            .points
            .retain(|_, point| !filter.matches(&point.payload));
        Ok(())
    }

    fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> StoreResult<Vec<ScoredPoint>> {
        let collections = self.collections.read().expect("store lock");
        let collection = collections.get(name).ok_or_else(|| StoreError::NotFound {
            collection: name.to_string(),
        })?;
        let mut hits: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|point| filter.matches(&point.payload))
            .map(|point| ScoredPoint {
                id: point.id,
                score: cosine(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn retrieve(&self, name: &str, ids: &[Uuid]) -> StoreResult<Vec<PointRecord>> {
        let collections = self.collections.read().expect("store lock");
        let collection = collections.get(name).ok_or_else(|| StoreError::NotFound {
            collection: name.to_string(),
        })?;
        Ok(ids
            .iter()
            .filter_map(|id| collection.points.get(id).cloned())
            .collect())
    }

    fn scroll(&self, name: &str, filter: &Filter, limit: usize) -> StoreResult<Vec<PointRecord>> {
        let collections = self.collections.read().expect("store lock");
        let collection = collections.get(name).ok_or_else(|| StoreError::NotFound {
            collection: name.to_string(),
        })?;
        Ok(collection
            .points
            .values()
            .filter(|point| filter.matches(&point.payload))
            .take(limit)
            .map(|point| PointRecord {
                id: point.id,
                vector: Vec::new(),
                payload: point.payload.clone(),
            })
            .collect())
    }

    fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self
            .collections
            .read()
            .expect("store lock")
            .contains_key(name))
    }

    fn stats(&self, name: &str) -> StoreResult<CollectionStats> {
        let collections = self.collections.read().expect("store lock");
        let collection = collections.get(name).ok_or_else(|| StoreError::NotFound {
            collection: name.to_string(),
        })?;
        Ok(CollectionStats {
            points: collection.points.len() as u64,
            dimension: collection.dimension,
        })
    }
}
