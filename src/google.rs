//! Google Ads API Client
//!
//! REST transport for the Google Ads API. Queries go through
//! `googleAds:searchStream` and are exposed as a [`ChunkSource`]; mutations go
//! through the per-collection `:mutate` methods.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{AdsError, Result};
use crate::gateway::{
    ChunkSource, MutationGateway, Operation, QueryGateway, ResourceKind, Row, RowChunkStream,
    StreamingQueryGateway,
};
use crate::session::Session;

pub const GOOGLE_ADS_API: &str = "https://googleads.googleapis.com";
pub const API_VERSION: &str = "v16";

const PLATFORM: &str = "google-ads";

/// Google Ads REST client
#[derive(Clone)]
pub struct GoogleAdsClient {
    http: Client,
    base_url: String,
    session: Arc<dyn Session>,
    developer_token: String,
    login_customer_id: String,
}

// ============================================================
// API Response Types
// ============================================================

#[derive(Debug, Deserialize)]
struct SearchStreamChunk {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<FailureDetail>,
}

#[derive(Debug, Deserialize)]
struct FailureDetail {
    #[serde(default)]
    errors: Vec<FailureError>,
}

#[derive(Debug, Deserialize)]
struct FailureError {
    #[serde(default)]
    message: String,
}

// ============================================================
// Client Implementation
// ============================================================

impl GoogleAdsClient {
    /// Create a client against the production endpoint
    pub fn new(
        session: Arc<dyn Session>,
        developer_token: impl Into<String>,
        login_customer_id: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("ads-access-agent/0.1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AdsError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: GOOGLE_ADS_API.to_string(),
            session,
            developer_token: developer_token.into(),
            login_customer_id: login_customer_id.into(),
        })
    }

    /// Point the client at another host (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Split into the query/mutation capability pair services consume.
    pub fn into_gateways(self) -> (Arc<dyn QueryGateway>, Arc<dyn MutationGateway>) {
        let mutation: Arc<dyn MutationGateway> = Arc::new(self.clone());
        (Arc::new(StreamingQueryGateway::new(self)), mutation)
    }

    fn url(&self, customer_id: &str, method: &str) -> String {
        format!(
            "{}/{}/customers/{}/{}",
            self.base_url, API_VERSION, customer_id, method
        )
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Response> {
        let token = self.session.access_token().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header("developer-token", &self.developer_token)
            .header("login-customer-id", &self.login_customer_id)
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Map a non-success response to the error taxonomy.
async fn error_from_response(response: Response) -> AdsError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    classify_error(status, &text)
}

fn classify_error(status: StatusCode, text: &str) -> AdsError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(text).ok();

    if status == StatusCode::UNAUTHORIZED {
        return AdsError::Auth(match envelope {
            Some(envelope) => envelope.error.message,
            None => format!("Google Ads API returned {}: {}", status, text),
        });
    }

    let Some(envelope) = envelope else {
        return AdsError::Transport(format!("Google Ads API error {}: {}", status, text));
    };
    let body = envelope.error;

    if body.status == "UNAUTHENTICATED" {
        return AdsError::Auth(body.message);
    }

    let errors: Vec<String> = body
        .details
        .into_iter()
        .flat_map(|d| d.errors)
        .map(|e| e.message)
        .collect();

    if errors.is_empty() {
        AdsError::Transport(format!("Google Ads API error {}: {}", status, body.message))
    } else {
        AdsError::api_operation(errors)
    }
}

fn mutate_method(kind: ResourceKind) -> Result<&'static str> {
    match kind {
        ResourceKind::CustomerNegativeCriterion => Ok("customerNegativeCriteria:mutate"),
        ResourceKind::CampaignCriterion => Ok("campaignCriteria:mutate"),
        ResourceKind::CustomerUserAccessInvitation => Ok("customerUserAccessInvitations:mutate"),
        ResourceKind::ClientLink => Err(AdsError::unsupported(PLATFORM, format!("mutate {}", kind))),
    }
}

/// Build the request body for a mutate call.
///
/// The invitation service takes a single `operation`; the criterion services
/// take an `operations` list.
fn mutate_body(kind: ResourceKind, operations: Vec<Operation>) -> Result<Value> {
    if kind == ResourceKind::CustomerUserAccessInvitation {
        let mut operations = operations.into_iter();
        let (Some(operation), None) = (operations.next(), operations.next()) else {
            return Err(AdsError::InvalidArgument(
                "invitation mutations take exactly one operation".to_string(),
            ));
        };
        return Ok(json!({ "operation": operation }));
    }

    Ok(json!({ "operations": operations }))
}

#[async_trait]
impl ChunkSource for GoogleAdsClient {
    async fn search_stream(&self, account_id: &str, query: &str) -> Result<RowChunkStream> {
        let url = self.url(account_id, "googleAds:searchStream");
        debug!(account_id = %account_id, "searchStream: {}", query);

        let response = self.post(&url, &json!({ "query": query })).await?;
        let text = response.text().await?;
        let chunks: Vec<SearchStreamChunk> = serde_json::from_str(&text)?;

        let rows = chunks
            .into_iter()
            .map(|chunk| Ok(chunk.results.into_iter().map(Row::new).collect()));
        Ok(Box::pin(stream::iter(rows.collect::<Vec<Result<Vec<Row>>>>())))
    }
}

#[async_trait]
impl MutationGateway for GoogleAdsClient {
    async fn apply(
        &self,
        account_id: &str,
        kind: ResourceKind,
        operations: Vec<Operation>,
    ) -> Result<()> {
        let method = mutate_method(kind)?;

        if operations.is_empty() {
            debug!(account_id = %account_id, kind = %kind, "Skipping empty mutate batch");
            return Ok(());
        }

        let count = operations.len();
        let body = mutate_body(kind, operations)?;
        let url = self.url(account_id, method);

        self.post(&url, &body).await?;
        debug!(account_id = %account_id, kind = %kind, operations = count, "Mutate applied");
        Ok(())
    }
}
