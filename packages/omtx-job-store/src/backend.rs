//! The document-database seam. Each job record is stored as a single
//! JSON blob attribute alongside the handful of scalar attributes the
//! access patterns query on — the same shape the `data-generator`
//! reference uses for its partition counters, generalized to a full
//! record instead of a single counter.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use dashmap::DashMap;
use omtx_types::job::JobRecord;

use crate::error::{JobStoreError, Result};

#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn put(&self, record: &JobRecord) -> Result<()>;
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;
    async fn delete(&self, job_id: &str) -> Result<()>;
    async fn query_by_user(&self, user_id: &str, job_type_filter: Option<&str>) -> Result<Vec<JobRecord>>;
    async fn query_by_batch_parent(&self, batch_parent_id: &str) -> Result<Vec<JobRecord>>;
    async fn query_running_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<Vec<JobRecord>>;
    async fn find_by_idempotency_key(&self, user_id: &str, idem_key: &str) -> Result<Option<JobRecord>>;
    /// Fetches up to 500 ids (the DynamoDB `BatchGetItem` page limit) in
    /// one round-trip. Callers needing more chunk at the `JobStore` layer.
    async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<JobRecord>>;
}

pub struct DynamoDbBackend {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoDbBackend {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub async fn from_env(table_name: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_dynamodb::Client::new(&config), table_name)
    }

    fn to_item(record: &JobRecord) -> Result<std::collections::HashMap<String, AttributeValue>> {
        let data = serde_json::to_string(record)?;
        let mut item = std::collections::HashMap::new();
        item.insert("job_id".to_string(), AttributeValue::S(record.id.clone()));
        item.insert("user_id".to_string(), AttributeValue::S(record.user_id.clone()));
        item.insert(
            "status".to_string(),
            AttributeValue::S(serde_json::to_value(record.status)?.as_str().unwrap_or_default().to_string()),
        );
        item.insert(
            "job_type".to_string(),
            AttributeValue::S(serde_json::to_value(record.job_type)?.as_str().unwrap_or_default().to_string()),
        );
        if let Some(parent) = &record.batch_parent_id {
            item.insert("batch_parent_id".to_string(), AttributeValue::S(parent.clone()));
        }
        if let Some(idem_key) = &record.idempotency_key {
            item.insert("idempotency_key".to_string(), AttributeValue::S(idem_key.clone()));
        }
        item.insert("updated_at".to_string(), AttributeValue::S(record.updated_at.to_rfc3339()));
        item.insert("created_at".to_string(), AttributeValue::S(record.created_at.to_rfc3339()));
        item.insert("data".to_string(), AttributeValue::S(data));
        Ok(item)
    }

    fn from_item(item: &std::collections::HashMap<String, AttributeValue>) -> Result<JobRecord> {
        let data = item
            .get("data")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| JobStoreError::Backend("item missing `data` attribute".into()))?;
        Ok(serde_json::from_str(data)?)
    }
}

#[async_trait]
impl JobBackend for DynamoDbBackend {
    async fn put(&self, record: &JobRecord) -> Result<()> {
        let item = Self::to_item(record)?;
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .send()
            .await
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        response.item.as_ref().map(Self::from_item).transpose()
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .send()
            .await
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Queries the `user_id-index` GSI. A missing index at the table
    /// surfaces as a backend error the caller maps to
    /// `database_unavailable`.
    async fn query_by_user(&self, user_id: &str, job_type_filter: Option<&str>) -> Result<Vec<JobRecord>> {
        let mut request = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name("user_id-index")
            .key_condition_expression("user_id = :uid")
            .expression_attribute_values(":uid", AttributeValue::S(user_id.to_string()));

        if let Some(job_type) = job_type_filter {
            request = request
                .filter_expression("job_type = :jt")
                .expression_attribute_values(":jt", AttributeValue::S(job_type.to_string()));
        }

        let response = request.send().await.map_err(|e| JobStoreError::Backend(e.to_string()))?;
        response.items().iter().map(Self::from_item).collect()
    }

    /// Queries the `batch_parent_id-index` GSI for a batch's children.
    async fn query_by_batch_parent(&self, batch_parent_id: &str) -> Result<Vec<JobRecord>> {
        let response = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name("batch_parent_id-index")
            .key_condition_expression("batch_parent_id = :bid")
            .expression_attribute_values(":bid", AttributeValue::S(batch_parent_id.to_string()))
            .send()
            .await
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        response.items().iter().map(Self::from_item).collect()
    }

    /// Queries the `status-index` GSI for `running` jobs, then filters by
    /// `updated_at` client-side (DynamoDB can't range-compare a string
    /// timestamp against a parameter in a key condition on a non-sort
    /// key here without a composite GSI sort key, which this table
    /// doesn't carry).
    async fn query_running_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<Vec<JobRecord>> {
        let response = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name("status-index")
            .key_condition_expression("#s = :running")
            .expression_attribute_names("#s", "status")
            .expression_attribute_values(":running", AttributeValue::S("running".to_string()))
            .send()
            .await
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        let records: Result<Vec<JobRecord>> = response.items().iter().map(Self::from_item).collect();
        Ok(records?.into_iter().filter(|r| r.updated_at < cutoff).collect())
    }

    /// Queries the `idempotency_key-index` GSI, then narrows to the
    /// submitting user with a filter expression (the key is only unique
    /// per-user, not globally).
    async fn find_by_idempotency_key(&self, user_id: &str, idem_key: &str) -> Result<Option<JobRecord>> {
        let response = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name("idempotency_key-index")
            .key_condition_expression("idempotency_key = :k")
            .filter_expression("user_id = :uid")
            .expression_attribute_values(":k", AttributeValue::S(idem_key.to_string()))
            .expression_attribute_values(":uid", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        let records: Result<Vec<JobRecord>> = response.items().iter().map(Self::from_item).collect();
        Ok(records?.into_iter().next())
    }

    async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<JobRecord>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys = job_ids
            .iter()
            .map(|id| {
                let mut key = std::collections::HashMap::new();
                key.insert("job_id".to_string(), AttributeValue::S(id.clone()));
                key
            })
            .collect();
        let keys_and_attributes = aws_sdk_dynamodb::types::KeysAndAttributes::builder()
            .set_keys(Some(keys))
            .build()
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        let response = self
            .client
            .batch_get_item()
            .request_items(&self.table_name, keys_and_attributes)
            .send()
            .await
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        let items = response
            .responses()
            .and_then(|r| r.get(&self.table_name))
            .cloned()
            .unwrap_or_default();
        items.iter().map(Self::from_item).collect()
    }
}

/// In-process backend used by the job store's own test suite and by
/// dependent crates' integration tests.
#[derive(Default)]
pub struct InMemoryBackend {
    records: DashMap<String, JobRecord>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobBackend for InMemoryBackend {
    async fn put(&self, record: &JobRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.get(job_id).map(|r| r.clone()))
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        self.records.remove(job_id);
        Ok(())
    }

    async fn query_by_user(&self, user_id: &str, job_type_filter: Option<&str>) -> Result<Vec<JobRecord>> {
        Ok(self
            .records
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.user_id == user_id)
            .filter(|r| {
                job_type_filter
                    .map(|jt| serde_json::to_value(r.job_type).ok().and_then(|v| v.as_str().map(String::from)) == Some(jt.to_string()))
                    .unwrap_or(true)
            })
            .collect())
    }

    async fn query_by_batch_parent(&self, batch_parent_id: &str) -> Result<Vec<JobRecord>> {
        Ok(self
            .records
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.batch_parent_id.as_deref() == Some(batch_parent_id))
            .collect())
    }

    async fn query_running_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<Vec<JobRecord>> {
        use omtx_types::job::JobStatus;
        Ok(self
            .records
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.status == JobStatus::Running && r.updated_at < cutoff)
            .collect())
    }

    async fn find_by_idempotency_key(&self, user_id: &str, idem_key: &str) -> Result<Option<JobRecord>> {
        Ok(self
            .records
            .iter()
            .map(|e| e.value().clone())
            .find(|r| r.user_id == user_id && r.idempotency_key.as_deref() == Some(idem_key)))
    }

    async fn batch_get(&self, job_ids: &[String]) -> Result<Vec<JobRecord>> {
        Ok(job_ids.iter().filter_map(|id| self.records.get(id).map(|r| r.clone())).collect())
    }
}
