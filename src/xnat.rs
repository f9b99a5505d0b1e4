//
// xnat.rs
// xnat2bids-launcher
//
// Minimal XNAT REST client and the resolver that expands project/subject selections into sessions.
//
// Thales Matheus Mendonça Santos - November 2025

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::SessionSelector;
use crate::error::RemoteError;
use crate::layout::bids_labels;
use crate::models::{RemoteSession, SessionDescriptor};

const LISTING_COLUMNS: &str = "ID,label,project,subject_label,insert_date,last_modified";

#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

/// Where a session sits in the XNAT hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub project: String,
    pub subject_id: String,
    pub label: String,
}

/// The XNAT queries the resolver and the sync engine depend on.
#[allow(async_fn_in_trait)]
pub trait SessionCatalog {
    async fn session_info(&self, session_id: &str) -> Result<SessionInfo, RemoteError>;
    async fn subject_label(&self, subject_id: &str) -> Result<String, RemoteError>;
    async fn project_sessions(&self, project: &str) -> Result<Vec<RemoteSession>, RemoteError>;
    async fn subject_sessions(
        &self,
        project: &str,
        subject: &str,
    ) -> Result<Vec<RemoteSession>, RemoteError>;
}

/// Authenticated XNAT session (JSESSION) shared by every query of one run.
///
/// Call [`XnatConnection::close`] when done; the server-side session is not released otherwise.
pub struct XnatConnection {
    client: reqwest::Client,
    host: String,
    credentials: Credentials,
}

impl XnatConnection {
    pub async fn open(host: &str, credentials: Credentials) -> Result<Self, RemoteError> {
        let host = host.trim_end_matches('/').to_string();
        let url = format!("{}/data/JSESSION", host);
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|source| RemoteError::Transport {
                url: url.clone(),
                source,
            })?;

        let response = client
            .post(&url)
            .basic_auth(&credentials.user, Some(&credentials.password))
            .send()
            .await
            .map_err(|source| RemoteError::Transport {
                url: url.clone(),
                source,
            })?;
        check_status(&url, response.status())?;
        tracing::debug!(%host, user = %credentials.user, "opened XNAT session");

        Ok(Self {
            client,
            host,
            credentials,
        })
    }

    /// Release the server-side session. Failures are logged, never returned.
    pub async fn close(self) {
        let url = format!("{}/data/JSESSION", self.host);
        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(host = %self.host, "closed XNAT session");
            }
            Ok(response) => {
                tracing::warn!(host = %self.host, status = %response.status(), "closing XNAT session failed");
            }
            Err(err) => tracing::warn!(host = %self.host, "closing XNAT session failed: {}", err),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, RemoteError> {
        let url = format!("{}{}", self.host, path);
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .query(query)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .send()
            .await
            .map_err(|source| RemoteError::Transport {
                url: url.clone(),
                source,
            })?;
        check_status(&url, response.status())?;

        let body = response.text().await.map_err(|source| RemoteError::Transport {
            url: url.clone(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|err| RemoteError::Payload {
            url,
            message: err.to_string(),
        })
    }
}

fn check_status(url: &str, status: reqwest::StatusCode) -> Result<(), RemoteError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(RemoteError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ItemsEnvelope {
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    data_fields: DataFields,
}

#[derive(Debug, Deserialize)]
struct DataFields {
    #[serde(default)]
    project: Option<String>,
    #[serde(default, rename = "subject_ID")]
    subject_id: Option<String>,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultSetEnvelope {
    #[serde(rename = "ResultSet")]
    result_set: ResultSet,
}

#[derive(Debug, Deserialize)]
struct ResultSet {
    #[serde(rename = "Result", default)]
    result: Vec<ExperimentRow>,
}

#[derive(Debug, Deserialize)]
struct ExperimentRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    subject_label: Option<String>,
    #[serde(default)]
    insert_date: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
}

impl ExperimentRow {
    fn into_remote(self, project: &str) -> RemoteSession {
        RemoteSession {
            id: self.id,
            label: self.label,
            project: self
                .project
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| project.to_string()),
            subject_label: self.subject_label.filter(|s| !s.is_empty()),
            insert_date: self.insert_date.as_deref().and_then(parse_remote_date),
            last_modified: self.last_modified.as_deref().and_then(parse_remote_date),
        }
    }
}

fn first_fields(url: &str, envelope: ItemsEnvelope) -> Result<DataFields, RemoteError> {
    envelope
        .items
        .into_iter()
        .next()
        .map(|item| item.data_fields)
        .ok_or_else(|| RemoteError::Payload {
            url: url.to_string(),
            message: "no items in response".into(),
        })
}

impl SessionCatalog for XnatConnection {
    async fn session_info(&self, session_id: &str) -> Result<SessionInfo, RemoteError> {
        let path = format!("/data/experiments/{}", session_id);
        let envelope: ItemsEnvelope = self.get_json(&path, &[("format", "json")]).await?;
        let fields = first_fields(&path, envelope)?;
        Ok(SessionInfo {
            project: fields.project.unwrap_or_default(),
            subject_id: fields.subject_id.unwrap_or_default(),
            label: fields.label.unwrap_or_default(),
        })
    }

    async fn subject_label(&self, subject_id: &str) -> Result<String, RemoteError> {
        let path = format!("/data/subjects/{}", subject_id);
        let envelope: ItemsEnvelope = self.get_json(&path, &[("format", "json")]).await?;
        Ok(first_fields(&path, envelope)?.label.unwrap_or_default())
    }

    async fn project_sessions(&self, project: &str) -> Result<Vec<RemoteSession>, RemoteError> {
        let path = format!("/data/projects/{}/experiments", project);
        let envelope: ResultSetEnvelope = self
            .get_json(&path, &[("format", "json"), ("columns", LISTING_COLUMNS)])
            .await?;
        Ok(envelope
            .result_set
            .result
            .into_iter()
            .map(|row| row.into_remote(project))
            .collect())
    }

    async fn subject_sessions(
        &self,
        project: &str,
        subject: &str,
    ) -> Result<Vec<RemoteSession>, RemoteError> {
        let path = format!("/data/projects/{}/subjects/{}/experiments", project, subject);
        let envelope: ResultSetEnvelope = self
            .get_json(&path, &[("format", "json"), ("columns", LISTING_COLUMNS)])
            .await?;
        Ok(envelope
            .result_set
            .result
            .into_iter()
            .map(|row| row.into_remote(project))
            .collect())
    }
}

/// XNAT dates come as `2024-03-05` or `2024-03-05 14:22:10.0`; only the date is kept.
pub fn parse_remote_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%m/%d/%Y"))
        .ok()
}

/// Expand a selector into session ids, in subject order for project/subject selections.
pub async fn resolve_sessions<C: SessionCatalog>(
    catalog: &C,
    selector: &SessionSelector,
) -> Result<Vec<String>, RemoteError> {
    match selector {
        SessionSelector::Explicit(ids) => Ok(ids.clone()),
        SessionSelector::Project { project, subjects } if subjects.is_empty() => {
            let sessions = catalog.project_sessions(project).await?;
            tracing::info!(%project, count = sessions.len(), "resolved project sessions");
            Ok(sessions.into_iter().map(|s| s.id).collect())
        }
        SessionSelector::Project { project, subjects } => {
            let mut ids = Vec::new();
            for subject in subjects {
                let sessions = catalog.subject_sessions(project, subject).await?;
                if sessions.is_empty() {
                    tracing::warn!(%project, %subject, "subject has no sessions");
                }
                ids.extend(sessions.into_iter().map(|s| s.id));
            }
            Ok(ids)
        }
    }
}

/// Project, subject, and BIDS labels of a single session.
pub async fn session_hierarchy<C: SessionCatalog>(
    catalog: &C,
    session_id: &str,
) -> Result<SessionDescriptor, RemoteError> {
    let info = catalog.session_info(session_id).await?;
    let subject = catalog.subject_label(&info.subject_id).await?;
    let (bids_subject, bids_session) = bids_labels(&info.label, Some(&subject));
    Ok(SessionDescriptor {
        id: session_id.to_string(),
        project: info.project,
        subject,
        bids_subject,
        bids_session,
    })
}
