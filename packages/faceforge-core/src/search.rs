use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::EnhanceError;

/// Similarity a search match must exceed to count as an identification.
pub const MATCH_SIMILARITY: f64 = 0.85;

/// Derive the face collection id from the source directory name, so separate
/// source sets never collide.
pub fn collection_id_for_source(source_dir: &Path) -> String {
    let basename = source_dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("default");
    format!("npcc-2-{basename}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceMatch {
    pub external_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IndexSummary {
    pub indexed: usize,
    pub unindexed: usize,
}

/// The face index/search collaborator. The engine only ever needs these four
/// calls; tests swap in an in-memory fake.
pub trait FaceSearch {
    /// Create the collection if it does not already exist.
    fn ensure_collection(&self, collection_id: &str) -> Result<(), EnhanceError>;

    /// External ids of every face already indexed in the collection.
    fn list_external_ids(&self, collection_id: &str) -> Result<Vec<String>, EnhanceError>;

    /// Index a JPEG under `external_id`.
    fn index_face(
        &self,
        collection_id: &str,
        external_id: &str,
        image_jpeg: &[u8],
    ) -> Result<IndexSummary, EnhanceError>;

    /// Search the collection for the face in a JPEG; matches come back in
    /// service order, not sorted.
    fn search_by_image(
        &self,
        collection_id: &str,
        image_jpeg: &[u8],
    ) -> Result<Vec<FaceMatch>, EnhanceError>;
}

/// Pick the strongest match above [`MATCH_SIMILARITY`], if any.
pub fn best_match(matches: &[FaceMatch]) -> Option<&FaceMatch> {
    matches
        .iter()
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
        .filter(|m| m.similarity > MATCH_SIMILARITY)
}

/// HTTP client for a face search service with collection/index/search
/// endpoints.
pub struct HttpFaceSearch {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct ListFacesResponse {
    faces: Vec<ListedFace>,
}

#[derive(Debug, Deserialize)]
struct ListedFace {
    external_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    matches: Vec<FaceMatch>,
}

impl HttpFaceSearch {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl FaceSearch for HttpFaceSearch {
    fn ensure_collection(&self, collection_id: &str) -> Result<(), EnhanceError> {
        let resp = self
            .client
            .put(self.url(&format!("/collections/{collection_id}")))
            .send()
            .map_err(|err| EnhanceError::Search(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(EnhanceError::Search(format!(
                "ensure collection {collection_id}: {}",
                resp.status()
            )));
        }
        info!("collection {collection_id} ready");
        Ok(())
    }

    fn list_external_ids(&self, collection_id: &str) -> Result<Vec<String>, EnhanceError> {
        let resp: ListFacesResponse = self
            .client
            .get(self.url(&format!("/collections/{collection_id}/faces")))
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|err| EnhanceError::Search(err.to_string()))?;
        Ok(resp.faces.into_iter().map(|f| f.external_id).collect())
    }

    fn index_face(
        &self,
        collection_id: &str,
        external_id: &str,
        image_jpeg: &[u8],
    ) -> Result<IndexSummary, EnhanceError> {
        self.client
            .post(self.url(&format!("/collections/{collection_id}/faces")))
            .query(&[("external_id", external_id)])
            .header("content-type", "image/jpeg")
            .body(image_jpeg.to_vec())
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|err| EnhanceError::Search(err.to_string()))
    }

    fn search_by_image(
        &self,
        collection_id: &str,
        image_jpeg: &[u8],
    ) -> Result<Vec<FaceMatch>, EnhanceError> {
        let resp: SearchResponse = self
            .client
            .post(self.url(&format!("/collections/{collection_id}/search")))
            .header("content-type", "image/jpeg")
            .body(image_jpeg.to_vec())
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|err| EnhanceError::Search(err.to_string()))?;
        Ok(resp.matches)
    }
}
