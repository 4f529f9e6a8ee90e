//! Admission step 2: schema validation of the submitted input, ahead of
//! any resource estimation or quota check. Grounded on the required-field
//! tables `original_source/backend/services/*` validate against before
//! ever touching storage.

use omtx_types::error::ApiError;

use crate::models::{PredictBatchRequest, PredictRequest};

const MAX_SEQUENCE_LEN: usize = 10_000;
const MAX_BATCH_LIGANDS: usize = 1_500;

pub fn validate_predict(req: &PredictRequest) -> Result<(), ApiError> {
    if req.model.trim().is_empty() {
        return Err(ApiError::validation("model is required"));
    }
    if req.protein_sequence.trim().is_empty() {
        return Err(ApiError::validation("protein_sequence is required"));
    }
    if req.protein_sequence.len() > MAX_SEQUENCE_LEN {
        return Err(ApiError::validation(format!(
            "protein_sequence exceeds maximum length of {MAX_SEQUENCE_LEN}"
        )));
    }
    if req.job_name.trim().is_empty() {
        return Err(ApiError::validation("job_name is required"));
    }
    if req.user_id.trim().is_empty() {
        return Err(ApiError::validation("user_id is required"));
    }
    if let Some(smiles) = &req.ligand_smiles {
        if smiles.trim().is_empty() {
            return Err(ApiError::validation("ligand_smiles, if present, must not be blank"));
        }
    }
    Ok(())
}

pub fn validate_predict_batch(req: &PredictBatchRequest) -> Result<(), ApiError> {
    if req.model.trim().is_empty() {
        return Err(ApiError::validation("model is required"));
    }
    if req.protein_sequence.trim().is_empty() {
        return Err(ApiError::validation("protein_sequence is required"));
    }
    if req.batch_name.trim().is_empty() {
        return Err(ApiError::validation("batch_name is required"));
    }
    if req.user_id.trim().is_empty() {
        return Err(ApiError::validation("user_id is required"));
    }
    if req.ligands.is_empty() {
        return Err(ApiError::validation("ligands must contain at least one entry"));
    }
    if req.ligands.len() > MAX_BATCH_LIGANDS {
        return Err(ApiError::validation(format!(
            "batch exceeds maximum of {MAX_BATCH_LIGANDS} ligands"
        )));
    }
    for ligand in &req.ligands {
        if ligand.smiles.trim().is_empty() {
            return Err(ApiError::validation(format!("ligand `{}` has an empty smiles string", ligand.name)));
        }
    }
    if !matches!(req.priority.as_str(), "high" | "normal" | "low") {
        return Err(ApiError::validation("priority must be one of high, normal, low"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> PredictRequest {
        PredictRequest {
            model: "boltz2".into(),
            protein_sequence: "MKT".into(),
            ligand_smiles: Some("CCO".into()),
            job_name: "job-1".into(),
            user_id: "u1".into(),
            parameters: json!({}),
            idem_key: None,
        }
    }

    #[test]
    fn rejects_blank_protein_sequence() {
        let mut req = sample();
        req.protein_sequence = "   ".into();
        assert!(validate_predict(&req).is_err());
    }

    #[test]
    fn accepts_a_well_formed_request() {
        assert!(validate_predict(&sample()).is_ok());
    }

    #[test]
    fn rejects_batches_with_no_ligands() {
        let req = PredictBatchRequest {
            model: "boltz2".into(),
            protein_sequence: "MKT".into(),
            ligands: vec![],
            batch_name: "batch-1".into(),
            user_id: "u1".into(),
            max_concurrent: None,
            priority: "normal".into(),
            parameters: json!({}),
            idem_key: None,
        };
        assert!(validate_predict_batch(&req).is_err());
    }
}
