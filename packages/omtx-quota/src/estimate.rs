//! Translates a job's task/model type and size into a [`ResourceEstimate`].

use omtx_types::quota::ResourceEstimate;

struct ModelProfile {
    gpu_minutes_per_complex: f64,
    storage_mb_per_complex: f64,
}

const BOLTZ2: ModelProfile = ModelProfile {
    gpu_minutes_per_complex: 3.5,
    storage_mb_per_complex: 2.0,
};
const CHAI1: ModelProfile = ModelProfile {
    gpu_minutes_per_complex: 8.0,
    storage_mb_per_complex: 5.0,
};
const RFANTIBODY: ModelProfile = ModelProfile {
    gpu_minutes_per_complex: 5.0,
    storage_mb_per_complex: 3.0,
};
const DEFAULT_PROFILE: ModelProfile = ModelProfile {
    gpu_minutes_per_complex: 5.0,
    storage_mb_per_complex: 5.12,
};

fn profile_for(model_name: &str) -> &'static ModelProfile {
    match model_name.to_ascii_lowercase().as_str() {
        "boltz2" => &BOLTZ2,
        "chai1" => &CHAI1,
        "rfantibody" => &RFANTIBODY,
        _ => &DEFAULT_PROFILE,
    }
}

/// `units` is the number of complexes the job will actually run: 1 for an
/// individual job, the ligand count for a batch parent.
pub fn estimate_job_resources(
    model_name: &str,
    units: u32,
    is_priority: bool,
) -> ResourceEstimate {
    let profile = profile_for(model_name);
    ResourceEstimate::from_units(
        profile.gpu_minutes_per_complex,
        profile.storage_mb_per_complex,
        units,
        is_priority,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_default_profile() {
        let est = estimate_job_resources("some-new-model", 1, false);
        let default_est = estimate_job_resources("unrecognized", 1, false);
        assert_eq!(est.gpu_minutes, default_est.gpu_minutes);
    }

    #[test]
    fn batch_scales_linearly_with_unit_count() {
        let one = estimate_job_resources("boltz2", 1, false);
        let ten = estimate_job_resources("boltz2", 10, false);
        assert!((ten.gpu_minutes - one.gpu_minutes * 10.0).abs() < 1e-9);
        assert_eq!(ten.concurrent_jobs, 10);
    }
}
