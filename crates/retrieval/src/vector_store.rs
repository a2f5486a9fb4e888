//! Dense vector search via Qdrant, implementing `ragq_core::VectorIndex`.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::{
    Qdrant,
    qdrant::{Distance, SearchPointsBuilder, value::Kind},
};
use ragq_core::{DocumentChunk, Result, VectorIndex, VectorSearchHit};

use crate::RetrievalError;

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: usize,
    pub distance: VectorDistance,
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: ragq_config::constants::endpoints::QDRANT_DEFAULT.clone(),
            collection: "chunks".to_string(),
            vector_dim: 384,
            distance: VectorDistance::Cosine,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorDistance {
    Cosine,
    Euclidean,
    DotProduct,
}

impl From<VectorDistance> for Distance {
    fn from(d: VectorDistance) -> Self {
        match d {
            VectorDistance::Cosine => Distance::Cosine,
            VectorDistance::Euclidean => Distance::Euclid,
            VectorDistance::DotProduct => Distance::Dot,
        }
    }
}

/// Read-only Qdrant client; this workspace never ingests, only searches an
/// externally managed collection.
pub struct QdrantVectorIndex {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl QdrantVectorIndex {
    pub async fn new(config: VectorStoreConfig) -> std::result::Result<Self, RetrievalError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<VectorSearchHit>> {
        let search_builder = SearchPointsBuilder::new(
            &self.config.collection,
            query_embedding.to_vec(),
            top_k as u64,
        )
        .with_payload(true);

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let hits = results
            .result
            .into_iter()
            .map(|point| {
                let mut text = String::new();
                let mut metadata = HashMap::new();

                for (k, v) in point.payload {
                    if let Some(Kind::StringValue(s)) = v.kind {
                        if k == "text" {
                            text = s;
                        } else {
                            metadata.insert(k, s);
                        }
                    }
                }

                let id = point
                    .id
                    .map(|pid| match pid.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            n.to_string()
                        }
                        None => String::new(),
                    })
                    .unwrap_or_default();

                let mut chunk = DocumentChunk::new(id, text);
                chunk.title = metadata.remove("title");
                chunk.source = metadata.remove("source");
                chunk.metadata = metadata;

                VectorSearchHit {
                    chunk,
                    score: point.score,
                }
            })
            .collect();

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_uses_cosine_distance() {
        let config = VectorStoreConfig::default();
        assert_eq!(config.distance, VectorDistance::Cosine);
        assert_eq!(config.vector_dim, 384);
    }
}
