use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted writing-style fingerprint.
///
/// `embedding` is derived from the samples joined with blank lines and is
/// recomputed whenever `samples` changes; `dimensions == embedding.len()`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VoiceProfile {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub samples: Vec<String>,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub dimensions: i32,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing view: no samples, no vector.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceProfileSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<VoiceProfile> for VoiceProfileSummary {
    fn from(profile: VoiceProfile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            description: profile.description,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProfileRequest {
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub samples: Vec<String>,
}

/// Partial update. Absent fields are left untouched; `description: null`
/// is indistinguishable from absent and also leaves it untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub samples: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimilarProfilesRequest {
    pub owner_id: Uuid,
    pub query_text: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityMatch {
    pub profile_id: Uuid,
    pub name: String,
    pub similarity: f64,
    pub samples: Vec<String>,
}
