//! Materializes the three batch artifacts (aggregated.json, summary.json,
//! batch_results.csv) atomically, plus an on-demand zip export.

use std::io::Write;

use omtx_types::paths;
use omtx_storage_gateway::StorageGateway;

use crate::error::Result;
use crate::stats::{BatchSummary, IndividualResult};

pub async fn materialize(
    storage: &StorageGateway,
    user_id: &str,
    batch_id: &str,
    results: &[IndividualResult],
    summary: &BatchSummary,
) -> Result<Vec<String>> {
    let mut txn = storage.begin();

    let aggregated = serde_json::json!({
        "batch_id": batch_id,
        "total_results": results.len(),
        "results": results,
        "generated_at": chrono::Utc::now(),
    });
    storage
        .stage_json(&mut txn, &paths::batch_aggregated_path(user_id, batch_id), &aggregated)
        .await?;

    storage
        .stage_json(&mut txn, &paths::batch_summary_path(user_id, batch_id), summary)
        .await?;

    let csv_bytes = to_csv(results)?;
    storage
        .stage(&mut txn, &paths::batch_csv_path(user_id, batch_id), csv_bytes, "text/csv")
        .await?;

    Ok(storage.commit(txn).await?)
}

fn to_csv(results: &[IndividualResult]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for r in results {
        writer.serialize(CsvRow {
            job_id: &r.job_id,
            ligand_name: &r.ligand_name,
            affinity: r.affinity,
            confidence: r.confidence,
            ptm: r.ptm,
            iptm: r.iptm,
            plddt: r.plddt,
        })?;
    }
    Ok(writer.into_inner().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?)
}

#[derive(serde::Serialize)]
struct CsvRow<'a> {
    job_id: &'a str,
    ligand_name: &'a str,
    affinity: f64,
    confidence: f64,
    ptm: Option<f64>,
    iptm: Option<f64>,
    plddt: Option<f64>,
}

/// Builds an in-memory zip of the batch's three artifacts, for the
/// on-demand export endpoint. Keys are read back from the canonical
/// tree, not regenerated, so the export always reflects what was
/// actually committed.
pub async fn export_zip(storage: &StorageGateway, user_id: &str, batch_id: &str) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, key) in [
            ("aggregated.json", paths::batch_aggregated_path(user_id, batch_id)),
            ("summary.json", paths::batch_summary_path(user_id, batch_id)),
            ("batch_results.csv", paths::batch_csv_path(user_id, batch_id)),
        ] {
            let body = storage.read_key(&key).await?;
            zip.start_file(name, options)?;
            zip.write_all(&body)?;
        }
        zip.finish()?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_results() -> Vec<IndividualResult> {
        vec![IndividualResult {
            job_id: "j1".into(),
            ligand_name: "lig-1".into(),
            affinity: 0.5,
            confidence: 0.6,
            ptm: Some(0.7),
            iptm: Some(0.6),
            plddt: Some(85.0),
        }]
    }

    #[tokio::test]
    async fn materialize_then_export_produces_a_valid_zip() {
        let storage = StorageGateway::new(Arc::new(omtx_storage_gateway::InMemoryObjectStore::new()));
        let results = sample_results();
        let summary = crate::stats::summarize(&results).unwrap();
        materialize(&storage, "u1", "b1", &results, &summary).await.unwrap();

        let zip_bytes = export_zip(&storage, "u1", "b1").await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        assert!(archive.by_name("summary.json").is_ok());
    }
}
