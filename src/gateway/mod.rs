//! Platform Gateway Abstractions
//!
//! Services talk to an ad platform through two capabilities only:
//! running a query that returns rows, and applying a batch of
//! create/remove operations. Each platform supplies its own variant.

mod paginated;
mod streaming;

pub use paginated::{PageRequest, PageSource, PaginatedQueryGateway, DEFAULT_PAGE_SIZE};
pub use streaming::{ChunkSource, RowChunkStream, StreamingQueryGateway};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One result row as returned by the platform.
///
/// Rows keep the platform's own JSON shape; fields are read with dotted paths
/// such as `customerClientLink.status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Value);

impl Row {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Read a string field by dotted path
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Read any field by dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.0, |value, segment| value.get(segment))
    }
}

impl From<Value> for Row {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Platform resource collections the services mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Google Ads user access invitation
    CustomerUserAccessInvitation,
    /// Microsoft Advertising account link
    ClientLink,
    /// Account-level negative criterion
    CustomerNegativeCriterion,
    /// Campaign-level criterion
    CampaignCriterion,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::CustomerUserAccessInvitation => write!(f, "customer_user_access_invitation"),
            ResourceKind::ClientLink => write!(f, "client_link"),
            ResourceKind::CustomerNegativeCriterion => write!(f, "customer_negative_criterion"),
            ResourceKind::CampaignCriterion => write!(f, "campaign_criterion"),
        }
    }
}

/// A single mutation in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create a resource from the given payload
    Create(Value),
    /// Remove the resource with the given platform handle
    Remove(String),
}

impl Operation {
    pub fn is_create(&self) -> bool {
        matches!(self, Operation::Create(_))
    }
}

/// Runs a platform query and returns every row, fully drained.
#[async_trait]
pub trait QueryGateway: Send + Sync {
    /// Execute `query` on behalf of `account_id`.
    ///
    /// Zero rows is a valid result, never an error.
    async fn run(&self, account_id: &str, query: &str) -> Result<Vec<Row>>;
}

/// Applies a batch of create/remove operations against one resource kind.
#[async_trait]
pub trait MutationGateway: Send + Sync {
    /// Submit `operations` for `account_id`.
    ///
    /// Any operation-level error fails the whole batch with
    /// [`AdsError::ApiOperation`](crate::error::AdsError::ApiOperation).
    async fn apply(
        &self,
        account_id: &str,
        kind: ResourceKind,
        operations: Vec<Operation>,
    ) -> Result<()>;
}
