use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The source type for credential-backed ingestion sources.
pub(crate) const SAS_TOKEN_SOURCE_TYPE: &str = "SasToken";

/// A catalog-side registration binding a container URL to a credential.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSource {
    /// The ingestion source id.
    pub id: String,

    /// The source type, `"SasToken"` for credential-backed sources.
    pub source_type: String,

    /// How the catalog connects to the container.
    pub connection_info: ConnectionInfo,
}

/// The connection half of an [IngestionSource].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// The canonical URL of the container the catalog reads from.
    pub container_url: String,

    /// The delegation credential, in query string form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sas_token: Option<String>,

    /// When the credential expires. Absent for policy-based credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// What the source manager needs to know about an existing source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSummary {
    /// The ingestion source id.
    pub id: String,

    /// When its credential expires.
    pub expiration: DateTime<Utc>,
}

/// The id-only listing returned by `GET /api/ingestion-sources`.
#[derive(Debug, Deserialize)]
pub(crate) struct SourceList {
    pub(crate) value: Vec<SourceId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SourceId {
    pub(crate) id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IngestionResponse {
    pub(crate) ingestion_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunResponse {
    pub(crate) operation: Operation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Operation {
    pub(crate) operation_id: String,
}
