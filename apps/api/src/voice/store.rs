//! Voice profile repository. Postgres in production; the trait keeps the
//! service testable against an in-memory store.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::StoreError;
use crate::voice::models::VoiceProfile;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn insert(&self, profile: &VoiceProfile) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<VoiceProfile, StoreError>;

    /// Newest first.
    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<VoiceProfile>, StoreError>;

    /// Overwrites name, description, samples and embedding of an existing profile.
    async fn update(&self, profile: &VoiceProfile) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn not_found(id: Uuid) -> StoreError {
    StoreError::NotFound(format!("Voice profile {id}"))
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn insert(&self, profile: &VoiceProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO voice_profiles
                (id, owner_id, name, description, samples, embedding, dimensions, model,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(profile.id)
        .bind(profile.owner_id)
        .bind(&profile.name)
        .bind(&profile.description)
        .bind(&profile.samples)
        .bind(&profile.embedding)
        .bind(profile.dimensions)
        .bind(&profile.model)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<VoiceProfile, StoreError> {
        sqlx::query_as::<_, VoiceProfile>("SELECT * FROM voice_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(id))
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<VoiceProfile>, StoreError> {
        Ok(sqlx::query_as::<_, VoiceProfile>(
            "SELECT * FROM voice_profiles WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update(&self, profile: &VoiceProfile) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE voice_profiles
            SET name = $2, description = $3, samples = $4, embedding = $5,
                dimensions = $6, model = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(profile.id)
        .bind(&profile.name)
        .bind(&profile.description)
        .bind(&profile.samples)
        .bind(&profile.embedding)
        .bind(profile.dimensions)
        .bind(&profile.model)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(profile.id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM voice_profiles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }
}
