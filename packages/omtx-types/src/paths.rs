//! Canonical object-storage path schema.
//!
//! The Storage Gateway refuses to write anywhere these helpers don't
//! produce, so everything that needs an object-store key goes through
//! here rather than formatting strings inline.

/// Artifact kinds a single job can have stored against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Results,
    Structure,
    Metadata,
}

impl ArtifactKind {
    fn filename(self) -> &'static str {
        match self {
            ArtifactKind::Results => "results.json",
            ArtifactKind::Structure => "structure.cif",
            ArtifactKind::Metadata => "metadata.json",
        }
    }
}

pub fn job_artifact_path(user_id: &str, job_id: &str, kind: ArtifactKind) -> String {
    format!("users/{user_id}/jobs/{job_id}/{}", kind.filename())
}

pub fn job_dir(user_id: &str, job_id: &str) -> String {
    format!("users/{user_id}/jobs/{job_id}/")
}

pub fn batch_metadata_path(user_id: &str, batch_id: &str) -> String {
    format!("users/{user_id}/batches/{batch_id}/batch_metadata.json")
}

pub fn batch_child_artifact_path(
    user_id: &str,
    batch_id: &str,
    child_id: &str,
    kind: ArtifactKind,
) -> String {
    format!(
        "users/{user_id}/batches/{batch_id}/jobs/{child_id}/{}",
        kind.filename()
    )
}

pub fn batch_aggregated_path(user_id: &str, batch_id: &str) -> String {
    format!("users/{user_id}/batches/{batch_id}/results/aggregated.json")
}

pub fn batch_summary_path(user_id: &str, batch_id: &str) -> String {
    format!("users/{user_id}/batches/{batch_id}/results/summary.json")
}

pub fn batch_csv_path(user_id: &str, batch_id: &str) -> String {
    format!("users/{user_id}/batches/{batch_id}/results/batch_results.csv")
}

pub fn batch_dir(user_id: &str, batch_id: &str) -> String {
    format!("users/{user_id}/batches/{batch_id}/")
}

/// Scratch location for an in-flight atomic write. `txn_id` should be a
/// fresh UUID per transaction so concurrent writers never collide.
pub fn temp_path(txn_id: &str, rest: &str) -> String {
    format!("temp/{txn_id}/{rest}")
}

pub fn job_search_index_path(job_id: &str) -> String {
    format!("index/jobs/{job_id}.json")
}

/// Rejects any key that isn't rooted under `users/`, `temp/`, or `index/`,
/// or that contains a `..` segment. Every write the Storage Gateway
/// performs is checked against this before it reaches the client.
pub fn is_schema_valid(key: &str) -> bool {
    if key.split('/').any(|segment| segment == "..") {
        return false;
    }
    key.starts_with("users/") || key.starts_with("temp/") || key.starts_with("index/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_the_published_layout() {
        assert_eq!(
            job_artifact_path("u1", "j1", ArtifactKind::Results),
            "users/u1/jobs/j1/results.json"
        );
        assert_eq!(
            batch_aggregated_path("u1", "b1"),
            "users/u1/batches/b1/results/aggregated.json"
        );
        assert_eq!(job_search_index_path("j1"), "index/jobs/j1.json");
    }

    #[test]
    fn schema_validation_rejects_escapes_and_foreign_roots() {
        assert!(is_schema_valid("users/u1/jobs/j1/results.json"));
        assert!(is_schema_valid("temp/txn-1/users/u1/jobs/j1/results.json"));
        assert!(!is_schema_valid("../etc/passwd"));
        assert!(!is_schema_valid("users/u1/../../secrets.json"));
        assert!(!is_schema_valid("scratch/whatever.json"));
    }
}
