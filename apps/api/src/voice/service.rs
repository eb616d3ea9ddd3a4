//! Voice profile lifecycle: every sample change recomputes the embedding
//! before anything is persisted, so a stored profile never carries a vector
//! that disagrees with its samples.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::voice::embedding::Embedder;
use crate::voice::models::{
    CreateProfileRequest, SimilarityMatch, UpdateProfileRequest, VoiceProfile,
    VoiceProfileSummary,
};
use crate::voice::similarity::rank;
use crate::voice::store::ProfileStore;

pub const DEFAULT_SIMILAR_LIMIT: usize = 5;
const SAMPLE_SEPARATOR: &str = "\n\n";

#[derive(Clone)]
pub struct VoiceProfileService {
    store: Arc<dyn ProfileStore>,
    embedder: Arc<dyn Embedder>,
}

impl VoiceProfileService {
    pub fn new(store: Arc<dyn ProfileStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub async fn create(&self, request: CreateProfileRequest) -> Result<VoiceProfile, AppError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }
        validate_samples(&request.samples)?;

        let embedding = self.embed_samples(&request.samples).await?;
        let now = Utc::now();
        let profile = VoiceProfile {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            name: name.to_string(),
            description: request.description,
            samples: request.samples,
            dimensions: embedding.len() as i32,
            embedding,
            model: self.embedder.model_name().to_string(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert(&profile).await?;
        info!(
            "Created voice profile {} ({} samples, {} dims) for owner {}",
            profile.id,
            profile.samples.len(),
            profile.dimensions,
            profile.owner_id
        );
        Ok(profile)
    }

    pub async fn get(&self, id: Uuid) -> Result<VoiceProfile, AppError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<VoiceProfileSummary>, AppError> {
        let profiles = self.store.list_by_owner(owner_id).await?;
        Ok(profiles.into_iter().map(VoiceProfileSummary::from).collect())
    }

    pub async fn samples(&self, id: Uuid) -> Result<Vec<String>, AppError> {
        Ok(self.store.get(id).await?.samples)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateProfileRequest,
    ) -> Result<VoiceProfile, AppError> {
        let mut profile = self.store.get(id).await?;

        if let Some(name) = request.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::Validation("name cannot be empty".to_string()));
            }
            profile.name = name.to_string();
        }
        if let Some(description) = request.description {
            profile.description = Some(description);
        }
        if let Some(samples) = request.samples {
            validate_samples(&samples)?;
            let embedding = self.embed_samples(&samples).await?;
            profile.dimensions = embedding.len() as i32;
            profile.embedding = embedding;
            profile.model = self.embedder.model_name().to_string();
            profile.samples = samples;
        }
        profile.updated_at = Utc::now();

        self.store.update(&profile).await?;
        Ok(profile)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete(id).await?;
        info!("Deleted voice profile {id}");
        Ok(())
    }

    /// Ranks the owner's profiles by similarity to `query_text`.
    pub async fn find_similar(
        &self,
        owner_id: Uuid,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityMatch>, AppError> {
        if query_text.trim().is_empty() {
            return Err(AppError::Validation("query_text cannot be empty".to_string()));
        }

        let query = self.embedder.embed(query_text).await?;
        let candidates = self.store.list_by_owner(owner_id).await?;
        Ok(rank(&query, &candidates, limit))
    }

    async fn embed_samples(&self, samples: &[String]) -> Result<Vec<f32>, AppError> {
        Ok(self.embedder.embed(&samples.join(SAMPLE_SEPARATOR)).await?)
    }
}

fn validate_samples(samples: &[String]) -> Result<(), AppError> {
    if samples.iter().all(|s| s.trim().is_empty()) {
        return Err(AppError::Validation(
            "At least one writing sample is required".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedEmbedder, MemoryProfileStore};

    fn service() -> (VoiceProfileService, Arc<MemoryProfileStore>) {
        let store = Arc::new(MemoryProfileStore::default());
        let service = VoiceProfileService::new(store.clone(), Arc::new(FixedEmbedder::new(16)));
        (service, store)
    }

    fn create_request(owner_id: Uuid, name: &str, samples: &[&str]) -> CreateProfileRequest {
        CreateProfileRequest {
            owner_id,
            name: name.to_string(),
            description: None,
            samples: samples.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_computes_embedding_before_persisting() {
        let (service, store) = service();
        let owner = Uuid::new_v4();

        let profile = service
            .create(create_request(owner, "Blog voice", &["Short and punchy.", "Always direct."]))
            .await
            .unwrap();

        assert_eq!(profile.dimensions, 16);
        assert_eq!(profile.embedding.len(), 16);
        assert_eq!(profile.model, "fixed");
        let stored = store.get(profile.id).await.unwrap();
        assert_eq!(stored.embedding, profile.embedding);
        assert_eq!(
            stored.embedding,
            FixedEmbedder::new(16).vector("Short and punchy.\n\nAlways direct.")
        );
    }

    #[tokio::test]
    async fn test_create_rejects_missing_samples_without_persisting() {
        let (service, store) = service();
        let owner = Uuid::new_v4();

        let err = service.create(create_request(owner, "Empty", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = service.create(create_request(owner, "Blank", &["  "])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = service.create(create_request(owner, " ", &["text"])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(store.list_by_owner(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_surfaces_embedding_failure() {
        let store = Arc::new(MemoryProfileStore::default());
        let service = VoiceProfileService::new(store.clone(), Arc::new(FixedEmbedder::failing()));
        let owner = Uuid::new_v4();

        let err = service
            .create(create_request(owner, "Voice", &["sample"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Embedding(_)));
        assert!(store.list_by_owner(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_samples_recomputes_embedding() {
        let (service, _) = service();
        let profile = service
            .create(create_request(Uuid::new_v4(), "Voice", &["first sample"]))
            .await
            .unwrap();

        let updated = service
            .update(
                profile.id,
                UpdateProfileRequest {
                    samples: Some(vec!["a completely different sample".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_ne!(updated.embedding, profile.embedding);
        assert_eq!(
            updated.embedding,
            FixedEmbedder::new(16).vector("a completely different sample")
        );
        assert_eq!(updated.name, "Voice");
    }

    #[tokio::test]
    async fn test_update_name_keeps_embedding() {
        let (service, _) = service();
        let profile = service
            .create(create_request(Uuid::new_v4(), "Voice", &["first sample"]))
            .await
            .unwrap();

        let updated = service
            .update(
                profile.id,
                UpdateProfileRequest {
                    name: Some("Renamed".to_string()),
                    description: Some("for newsletters".to_string()),
                    samples: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.description.as_deref(), Some("for newsletters"));
        assert_eq!(updated.embedding, profile.embedding);
    }

    #[tokio::test]
    async fn test_update_rejects_empty_samples() {
        let (service, store) = service();
        let profile = service
            .create(create_request(Uuid::new_v4(), "Voice", &["first sample"]))
            .await
            .unwrap();

        let err = service
            .update(
                profile.id,
                UpdateProfileRequest {
                    samples: Some(vec![]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.get(profile.id).await.unwrap().samples, vec!["first sample"]);
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let (service, _) = service();
        let id = Uuid::new_v4();
        assert!(matches!(service.get(id).await, Err(AppError::NotFound(_))));
        assert!(matches!(service.samples(id).await, Err(AppError::NotFound(_))));
        assert!(matches!(service.delete(id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            service.update(id, UpdateProfileRequest::default()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_profile() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let profile = service
            .create(create_request(owner, "Voice", &["sample"]))
            .await
            .unwrap();

        service.delete(profile.id).await.unwrap();
        assert!(service.list(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_similar_ranks_owner_profiles_only() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        let target = service
            .create(create_request(owner, "Rusty", &["rust rust rust"]))
            .await
            .unwrap();
        service
            .create(create_request(owner, "Other", &["zzzz qqqq"]))
            .await
            .unwrap();
        service
            .create(create_request(other, "Stranger", &["rust rust rust"]))
            .await
            .unwrap();

        let matches = service.find_similar(owner, "rust rust rust", 5).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].profile_id, target.id);
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);

        let top = service.find_similar(owner, "rust rust rust", 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn test_find_similar_rejects_blank_query() {
        let (service, _) = service();
        let err = service.find_similar(Uuid::new_v4(), "   ", 5).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
