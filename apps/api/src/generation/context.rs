use uuid::Uuid;
use tracing::warn;

use crate::voice::store::ProfileStore;

/// Collects the samples of every referenced voice profile, in the order the
/// ids were given. Profiles that are missing or fail to load are logged and
/// skipped.
pub async fn resolve_voice_samples(profiles: &dyn ProfileStore, ids: &[Uuid]) -> Vec<String> {
    let mut samples = Vec::new();
    for id in ids {
        match profiles.get(*id).await {
            Ok(profile) => samples.extend(profile.samples),
            Err(e) => warn!(profile_id = %id, error = %e, "Skipping voice profile"),
        }
    }
    samples
}
