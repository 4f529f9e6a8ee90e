//! Summary statistics over a batch's individual prediction results.
//!
//! Grounded on `_calculate_batch_summary`/`_get_top_predictions` in the
//! original service: affinity is "lower is better" (binding affinity),
//! confidence/pTM/ipTM/pLDDT are "higher is better".

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct IndividualResult {
    pub job_id: String,
    pub ligand_name: String,
    pub affinity: f64,
    pub confidence: f64,
    pub ptm: Option<f64>,
    pub iptm: Option<f64>,
    pub plddt: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Distribution {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Performer {
    pub job_id: String,
    pub ligand_name: String,
    pub affinity: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AffinityBuckets {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ConfidenceBuckets {
    pub high: u32,
    pub low: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total_results: u32,
    pub affinity: Distribution,
    pub confidence: Distribution,
    pub ptm_mean: Option<f64>,
    pub iptm_mean: Option<f64>,
    pub plddt_mean: Option<f64>,
    /// By affinity: lowest (best) first.
    pub top_affinity: Vec<Performer>,
    /// By confidence: highest (best) first.
    pub top_confidence: Vec<Performer>,
    pub best_performer: Performer,
    pub worst_performer: Performer,
    pub affinity_buckets: AffinityBuckets,
    pub confidence_buckets: ConfidenceBuckets,
}

fn distribution(values: &[f64]) -> Distribution {
    let n = values.len();
    if n == 0 {
        return Distribution { mean: 0.0, median: 0.0, std_dev: 0.0, min: 0.0, max: 0.0 };
    }
    let sum: f64 = values.iter().sum();
    let mean = sum / n as f64;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = sorted[n / 2];
    let std_dev = if n > 1 {
        (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt()
    } else {
        0.0
    };
    Distribution {
        mean,
        median,
        std_dev,
        min: sorted[0],
        max: sorted[n - 1],
    }
}

fn mean_of(values: impl Iterator<Item = f64> + Clone) -> Option<f64> {
    let count = values.clone().count();
    if count == 0 {
        return None;
    }
    Some(values.sum::<f64>() / count as f64)
}

const TOP_N: usize = 5;

/// Buckets an affinity score as defined in the batch aggregation spec:
/// high >= 0.8, medium in [0.4, 0.8), low < 0.4.
fn bucket_affinity(buckets: &mut AffinityBuckets, affinity: f64) {
    if affinity >= 0.8 {
        buckets.high += 1;
    } else if affinity >= 0.4 {
        buckets.medium += 1;
    } else {
        buckets.low += 1;
    }
}

fn bucket_confidence(buckets: &mut ConfidenceBuckets, confidence: f64) {
    if confidence > 0.7 {
        buckets.high += 1;
    } else {
        buckets.low += 1;
    }
}

pub fn summarize(results: &[IndividualResult]) -> Option<BatchSummary> {
    if results.is_empty() {
        return None;
    }

    let affinities: Vec<f64> = results.iter().map(|r| r.affinity).collect();
    let confidences: Vec<f64> = results.iter().map(|r| r.confidence).collect();

    let mut affinity_buckets = AffinityBuckets::default();
    let mut confidence_buckets = ConfidenceBuckets::default();
    for r in results {
        bucket_affinity(&mut affinity_buckets, r.affinity);
        bucket_confidence(&mut confidence_buckets, r.confidence);
    }

    let mut by_affinity: Vec<&IndividualResult> = results.iter().collect();
    by_affinity.sort_by(|a, b| a.affinity.partial_cmp(&b.affinity).unwrap());
    let mut by_confidence: Vec<&IndividualResult> = results.iter().collect();
    by_confidence.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let to_performer = |r: &IndividualResult| Performer {
        job_id: r.job_id.clone(),
        ligand_name: r.ligand_name.clone(),
        affinity: r.affinity,
        confidence: r.confidence,
    };

    let best_performer = to_performer(by_affinity[0]);
    let worst_performer = to_performer(by_affinity[by_affinity.len() - 1]);

    Some(BatchSummary {
        total_results: results.len() as u32,
        affinity: distribution(&affinities),
        confidence: distribution(&confidences),
        ptm_mean: mean_of(results.iter().filter_map(|r| r.ptm)),
        iptm_mean: mean_of(results.iter().filter_map(|r| r.iptm)),
        plddt_mean: mean_of(results.iter().filter_map(|r| r.plddt)),
        top_affinity: by_affinity.iter().take(TOP_N).map(|r| to_performer(r)).collect(),
        top_confidence: by_confidence.iter().take(TOP_N).map(|r| to_performer(r)).collect(),
        best_performer,
        worst_performer,
        affinity_buckets,
        confidence_buckets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(job_id: &str, affinity: f64, confidence: f64) -> IndividualResult {
        IndividualResult {
            job_id: job_id.into(),
            ligand_name: format!("ligand-{job_id}"),
            affinity,
            confidence,
            ptm: Some(0.8),
            iptm: Some(0.75),
            plddt: Some(90.0),
        }
    }

    #[test]
    fn best_performer_is_the_lowest_affinity() {
        let results = vec![result("a", 0.9, 0.5), result("b", 0.2, 0.6), result("c", 0.5, 0.9)];
        let summary = summarize(&results).unwrap();
        assert_eq!(summary.best_performer.job_id, "b");
        assert_eq!(summary.worst_performer.job_id, "a");
    }

    #[test]
    fn empty_batch_summarizes_to_none() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn buckets_match_the_published_thresholds() {
        let results = vec![result("a", 0.9, 0.8), result("b", 0.5, 0.5), result("c", 0.1, 0.2)];
        let summary = summarize(&results).unwrap();
        assert_eq!(summary.affinity_buckets.high, 1);
        assert_eq!(summary.affinity_buckets.medium, 1);
        assert_eq!(summary.affinity_buckets.low, 1);
        assert_eq!(summary.confidence_buckets.high, 1);
        assert_eq!(summary.confidence_buckets.low, 2);
    }

    #[test]
    fn top_n_caps_at_five_even_with_more_results() {
        let results: Vec<_> = (0..10).map(|i| result(&i.to_string(), i as f64 / 10.0, 0.5)).collect();
        let summary = summarize(&results).unwrap();
        assert_eq!(summary.top_affinity.len(), 5);
        assert_eq!(summary.top_confidence.len(), 5);
    }
}
