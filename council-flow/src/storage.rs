use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{CouncilError, Result};
use crate::models::{
    AnalysisRecord, AnonymizedCase, ChatMessage, FinalReport, PatientData, ReportPatch,
};
use crate::specialists::SpecialistRole;

/// Trait for storing and retrieving finished council analyses
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Returns the record as stored; the id may be reassigned by the backend
    async fn save_analysis(&self, record: AnalysisRecord) -> Result<AnalysisRecord>;
    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>>;
    /// Newest first
    async fn list_analyses(&self) -> Result<Vec<AnalysisRecord>>;
    /// Applies a partial report edit and returns the updated record
    async fn update_report(&self, id: &str, patch: ReportPatch) -> Result<Option<AnalysisRecord>>;
    async fn delete_analysis(&self, id: &str) -> Result<()>;

    async fn anonymized_cases(&self) -> Result<Vec<AnonymizedCase>> {
        Ok(self
            .list_analyses()
            .await?
            .iter()
            .map(AnalysisRecord::anonymize)
            .collect())
    }
}

/// Runs `primary`; on failure logs the error and runs `secondary` instead
pub async fn with_fallback<T, P, S>(operation: &str, primary: P, secondary: S) -> Result<T>
where
    P: Future<Output = Result<T>>,
    S: Future<Output = Result<T>>,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(operation, error = %e, "Primary backend failed, falling back");
            secondary.await
        }
    }
}

/// Like `with_fallback`, but also asks `secondary` when `primary` finds nothing
pub async fn find_with_fallback<T, P, S>(operation: &str, primary: P, secondary: S) -> Result<Option<T>>
where
    P: Future<Output = Result<Option<T>>>,
    S: Future<Output = Result<Option<T>>>,
{
    match primary.await {
        Ok(Some(value)) => Ok(Some(value)),
        Ok(None) => secondary.await,
        Err(e) => {
            warn!(operation, error = %e, "Primary backend failed, falling back");
            secondary.await
        }
    }
}

/// In-memory implementation of PersistenceBackend
#[derive(Default)]
pub struct LocalBackend {
    analyses: Arc<DashMap<String, AnalysisRecord>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            analyses: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl PersistenceBackend for LocalBackend {
    async fn save_analysis(&self, record: AnalysisRecord) -> Result<AnalysisRecord> {
        self.analyses.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        Ok(self.analyses.get(id).map(|entry| entry.clone()))
    }

    async fn list_analyses(&self) -> Result<Vec<AnalysisRecord>> {
        let mut records: Vec<AnalysisRecord> =
            self.analyses.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update_report(&self, id: &str, patch: ReportPatch) -> Result<Option<AnalysisRecord>> {
        Ok(self.analyses.get_mut(id).map(|mut entry| {
            entry.final_report.apply_patch(patch);
            entry.clone()
        }))
    }

    async fn delete_analysis(&self, id: &str) -> Result<()> {
        self.analyses.remove(id);
        Ok(())
    }
}

/// Wire shape used by the remote analyses API
#[derive(Debug, Serialize, Deserialize)]
struct RemoteAnalysis {
    #[serde(default, skip_serializing)]
    id: Value,
    patient_data: PatientData,
    #[serde(default)]
    debate_history: Vec<ChatMessage>,
    final_report: FinalReport,
    #[serde(default)]
    selected_specialists: Vec<SpecialistRole>,
    #[serde(default, skip_serializing)]
    created_at: Option<DateTime<Utc>>,
}

impl RemoteAnalysis {
    fn from_record(record: &AnalysisRecord) -> Self {
        Self {
            id: Value::Null,
            patient_data: record.patient_data.clone(),
            debate_history: record.debate_history.clone(),
            final_report: record.final_report.clone(),
            selected_specialists: record.selected_specialists.clone(),
            created_at: None,
        }
    }

    fn into_record(self) -> AnalysisRecord {
        let id = match self.id {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        AnalysisRecord {
            id,
            patient_data: self.patient_data,
            debate_history: self.debate_history,
            final_report: self.final_report,
            selected_specialists: self.selected_specialists,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// REST client for a remote analyses service
pub struct RemoteBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/analyses/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Option<reqwest::Response>> {
        let response = builder
            .send()
            .await
            .map_err(|e| CouncilError::Storage(format!("remote request failed: {}", e)))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CouncilError::Storage(format!(
                "remote backend returned {}",
                response.status()
            )));
        }
        Ok(Some(response))
    }

    async fn read<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| CouncilError::Storage(format!("invalid remote payload: {}", e)))
    }
}

#[async_trait]
impl PersistenceBackend for RemoteBackend {
    async fn save_analysis(&self, record: AnalysisRecord) -> Result<AnalysisRecord> {
        let builder = self
            .request(reqwest::Method::POST, self.url(""))
            .json(&RemoteAnalysis::from_record(&record));
        let response = self
            .send(builder)
            .await?
            .ok_or_else(|| CouncilError::Storage("analyses endpoint not found".to_string()))?;

        let remote: RemoteAnalysis = Self::read(response).await?;
        let created_at = remote.created_at.unwrap_or(record.created_at);
        let mut stored = remote.into_record();
        stored.created_at = created_at;
        if stored.id.is_empty() {
            stored.id = record.id;
        }
        info!(analysis_id = %stored.id, "Analysis saved remotely");
        Ok(stored)
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let builder = self.request(reqwest::Method::GET, self.url(&format!("{}/", id)));
        match self.send(builder).await? {
            Some(response) => Ok(Some(Self::read::<RemoteAnalysis>(response).await?.into_record())),
            None => Ok(None),
        }
    }

    async fn list_analyses(&self) -> Result<Vec<AnalysisRecord>> {
        let builder = self.request(reqwest::Method::GET, self.url(""));
        let Some(response) = self.send(builder).await? else {
            return Ok(Vec::new());
        };
        let body: Value = Self::read(response).await?;
        // paginated responses wrap the list in "results"
        let items = match body {
            Value::Object(mut map) => map.remove("results").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        let remote: Vec<RemoteAnalysis> = serde_json::from_value(items)?;
        Ok(remote.into_iter().map(RemoteAnalysis::into_record).collect())
    }

    async fn update_report(&self, id: &str, patch: ReportPatch) -> Result<Option<AnalysisRecord>> {
        let Some(mut record) = self.get_analysis(id).await? else {
            return Ok(None);
        };
        record.final_report.apply_patch(patch);

        let builder = self
            .request(reqwest::Method::PATCH, self.url(&format!("{}/", id)))
            .json(&json!({ "final_report": record.final_report }));
        match self.send(builder).await? {
            Some(_) => Ok(Some(record)),
            None => Ok(None),
        }
    }

    async fn delete_analysis(&self, id: &str) -> Result<()> {
        let builder = self.request(reqwest::Method::DELETE, self.url(&format!("{}/", id)));
        self.send(builder).await?;
        Ok(())
    }
}

/// Remote-first persistence backed by a local store.
///
/// Writes go to the secondary only when the primary fails. Reads consult
/// both, so records saved locally during an outage stay visible.
pub struct FallbackBackend {
    primary: Arc<dyn PersistenceBackend>,
    secondary: Arc<dyn PersistenceBackend>,
}

impl FallbackBackend {
    pub fn new(primary: Arc<dyn PersistenceBackend>, secondary: Arc<dyn PersistenceBackend>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl PersistenceBackend for FallbackBackend {
    async fn save_analysis(&self, record: AnalysisRecord) -> Result<AnalysisRecord> {
        with_fallback(
            "save_analysis",
            self.primary.save_analysis(record.clone()),
            self.secondary.save_analysis(record),
        )
        .await
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        find_with_fallback(
            "get_analysis",
            self.primary.get_analysis(id),
            self.secondary.get_analysis(id),
        )
        .await
    }

    /// Union of both stores, primary copy winning on duplicate ids
    async fn list_analyses(&self) -> Result<Vec<AnalysisRecord>> {
        let primary = self.primary.list_analyses().await;
        let secondary = self.secondary.list_analyses().await;
        let (mut records, local) = match (primary, secondary) {
            (Ok(remote), Ok(local)) => (remote, local),
            (Ok(remote), Err(e)) => {
                warn!(error = %e, "Secondary backend failed to list analyses");
                (remote, Vec::new())
            }
            (Err(e), Ok(local)) => {
                warn!(operation = "list_analyses", error = %e, "Primary backend failed, falling back");
                (Vec::new(), local)
            }
            (Err(_), Err(e)) => return Err(e),
        };

        for record in local {
            if records.iter().all(|r| r.id != record.id) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update_report(&self, id: &str, patch: ReportPatch) -> Result<Option<AnalysisRecord>> {
        find_with_fallback(
            "update_report",
            self.primary.update_report(id, patch.clone()),
            self.secondary.update_report(id, patch),
        )
        .await
    }

    /// Removes the record from both stores; fails only when both fail
    async fn delete_analysis(&self, id: &str) -> Result<()> {
        let primary = self.primary.delete_analysis(id).await;
        let secondary = self.secondary.delete_analysis(id).await;
        match (primary, secondary) {
            (Err(_), Err(e)) => Err(e),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                warn!(analysis_id = %id, error = %e, "Analysis deleted from one backend only");
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}
