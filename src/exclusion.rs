//! IP Exclusion Lists
//!
//! Blocks and unblocks IP addresses with negative criteria, either
//! account-wide (`Scope::Global`) or for one campaign (`Scope::Campaign`).
//! Blocking never checks for an existing rule, so blocking twice leaves two
//! platform resources behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{AdsError, Result};
use crate::gateway::{MutationGateway, Operation, QueryGateway, ResourceKind, Row};
use crate::query::{campaign_resource, host_route, Query, HOST_ROUTE_SUFFIX};

/// Criterion type used for IP exclusions
pub const IP_BLOCK: &str = "IP_BLOCK";

/// Where an exclusion applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Every campaign in the account
    Global,
    /// One campaign
    Campaign,
}

impl Scope {
    fn resource_kind(self) -> ResourceKind {
        match self {
            Scope::Global => ResourceKind::CustomerNegativeCriterion,
            Scope::Campaign => ResourceKind::CampaignCriterion,
        }
    }

    /// Query resource name
    fn resource(self) -> &'static str {
        match self {
            Scope::Global => "customer_negative_criterion",
            Scope::Campaign => "campaign_criterion",
        }
    }

    /// Key under which the platform returns the resource in a row
    fn row_key(self) -> &'static str {
        match self {
            Scope::Global => "customerNegativeCriterion",
            Scope::Campaign => "campaignCriterion",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Campaign => write!(f, "campaign"),
        }
    }
}

/// An IP exclusion as found on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpExclusionRule {
    pub scope: Scope,
    pub account_id: String,
    /// Present iff `scope` is `Campaign`
    pub campaign_id: Option<String>,
    pub ip_address: String,
    /// Platform handle; set once the rule has been looked up
    pub resource_handle: Option<String>,
}

/// Result of searching for a rule
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Found(Vec<String>),
    NotFound,
}

/// Block/unblock service for one scope
pub struct ExclusionListService {
    scope: Scope,
    query: Arc<dyn QueryGateway>,
    mutation: Arc<dyn MutationGateway>,
}

impl ExclusionListService {
    pub fn new(
        scope: Scope,
        query: Arc<dyn QueryGateway>,
        mutation: Arc<dyn MutationGateway>,
    ) -> Self {
        Self {
            scope,
            query,
            mutation,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Create an exclusion for `ip`. Issues exactly one CREATE; duplicates
    /// are allowed.
    pub async fn block_ip(&self, account_id: &str, campaign_id: Option<&str>, ip: &str) -> Result<()> {
        let campaign_id = self.check_campaign(campaign_id)?;
        let payload = self.criterion_payload(account_id, campaign_id, ip);

        self.mutation
            .apply(account_id, self.scope.resource_kind(), vec![Operation::Create(payload)])
            .await?;

        info!(scope = %self.scope, account_id = %account_id, campaign_id = ?campaign_id, ip = %ip, "IP blocked");
        Ok(())
    }

    /// Remove the exclusion for `ip`, returning how many rules were removed.
    ///
    /// Global scope removes every matching rule in one batch. Campaign scope
    /// removes only the first match; later duplicates stay in place. No
    /// match is a no-op.
    pub async fn unblock_ip(&self, account_id: &str, campaign_id: Option<&str>, ip: &str) -> Result<usize> {
        let campaign_id = self.check_campaign(campaign_id)?;

        let handles = match self.lookup(account_id, campaign_id, ip).await? {
            Lookup::NotFound => {
                debug!(scope = %self.scope, account_id = %account_id, ip = %ip, "No exclusion to remove");
                return Ok(0);
            }
            Lookup::Found(handles) => handles,
        };

        let operations: Vec<Operation> = match self.scope {
            Scope::Global => handles.into_iter().map(Operation::Remove).collect(),
            Scope::Campaign => handles.into_iter().take(1).map(Operation::Remove).collect(),
        };
        let removed = operations.len();

        self.mutation
            .apply(account_id, self.scope.resource_kind(), operations)
            .await?;

        info!(scope = %self.scope, account_id = %account_id, campaign_id = ?campaign_id, ip = %ip, removed, "IP unblocked");
        Ok(removed)
    }

    /// Every exclusion currently stored for `ip` in this scope.
    pub async fn find_rules(
        &self,
        account_id: &str,
        campaign_id: Option<&str>,
        ip: &str,
    ) -> Result<Vec<IpExclusionRule>> {
        let campaign_id = self.check_campaign(campaign_id)?;

        let handles = match self.lookup(account_id, campaign_id, ip).await? {
            Lookup::Found(handles) => handles,
            Lookup::NotFound => Vec::new(),
        };

        Ok(handles
            .into_iter()
            .map(|handle| IpExclusionRule {
                scope: self.scope,
                account_id: account_id.to_string(),
                campaign_id: campaign_id.map(str::to_string),
                ip_address: format!("{}{}", ip, HOST_ROUTE_SUFFIX),
                resource_handle: Some(handle),
            })
            .collect())
    }

    /// Campaign scope needs a campaign id; global scope must not get one.
    fn check_campaign<'a>(&self, campaign_id: Option<&'a str>) -> Result<Option<&'a str>> {
        match (self.scope, campaign_id) {
            (Scope::Global, None) => Ok(None),
            (Scope::Campaign, Some(id)) if !id.is_empty() => Ok(Some(id)),
            (Scope::Global, Some(_)) => Err(AdsError::InvalidArgument(
                "global exclusions do not take a campaign id".to_string(),
            )),
            (Scope::Campaign, _) => Err(AdsError::InvalidArgument(
                "campaign exclusions require a campaign id".to_string(),
            )),
        }
    }

    fn criterion_payload(&self, account_id: &str, campaign_id: Option<&str>, ip: &str) -> Value {
        match (self.scope, campaign_id) {
            (Scope::Campaign, Some(campaign_id)) => json!({
                "campaign": campaign_resource(account_id, campaign_id),
                "negative": true,
                "ipBlock": { "ipAddress": ip },
            }),
            _ => json!({
                "type": IP_BLOCK,
                "ipBlock": { "ipAddress": ip },
            }),
        }
    }

    fn lookup_query(&self, account_id: &str, campaign_id: Option<&str>, ip: &str) -> Query {
        let resource = self.scope.resource();
        let mut query = Query::select(format!("{}.resource_name", resource), resource)
            .filter_eq(format!("{}.type", resource), IP_BLOCK);

        if let Some(campaign_id) = campaign_id {
            query = query.filter_eq(
                format!("{}.campaign", resource),
                campaign_resource(account_id, campaign_id),
            );
        }

        query.filter_eq_escaped(format!("{}.ip_block.ip_address", resource), host_route(ip))
    }

    async fn lookup(&self, account_id: &str, campaign_id: Option<&str>, ip: &str) -> Result<Lookup> {
        let query = self.lookup_query(account_id, campaign_id, ip);
        let rows = self.query.run(account_id, &query.to_string()).await?;

        let handles: Vec<String> = rows
            .iter()
            .filter_map(|row| self.resource_handle(row))
            .collect();

        debug!(scope = %self.scope, account_id = %account_id, matches = handles.len(), "Looked up exclusions");

        if handles.is_empty() {
            Ok(Lookup::NotFound)
        } else {
            Ok(Lookup::Found(handles))
        }
    }

    fn resource_handle(&self, row: &Row) -> Option<String> {
        row.get_str(&format!("{}.resourceName", self.scope.row_key()))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every lookup with `handles` and records mutations.
    struct CannedCriteria {
        scope: Scope,
        handles: Vec<String>,
        queries: Mutex<Vec<String>>,
        batches: Mutex<Vec<(ResourceKind, Vec<Operation>)>>,
    }

    impl CannedCriteria {
        fn new(scope: Scope, handles: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                scope,
                handles: handles.iter().map(|h| h.to_string()).collect(),
                queries: Mutex::new(Vec::new()),
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl QueryGateway for CannedCriteria {
        async fn run(&self, _account_id: &str, query: &str) -> Result<Vec<Row>> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self
                .handles
                .iter()
                .map(|h| Row::new(json!({ (self.scope.row_key()): { "resourceName": h } })))
                .collect())
        }
    }

    #[async_trait]
    impl MutationGateway for CannedCriteria {
        async fn apply(
            &self,
            _account_id: &str,
            kind: ResourceKind,
            operations: Vec<Operation>,
        ) -> Result<()> {
            self.batches.lock().unwrap().push((kind, operations));
            Ok(())
        }
    }

    fn service(fake: &Arc<CannedCriteria>) -> ExclusionListService {
        ExclusionListService::new(fake.scope, fake.clone(), fake.clone())
    }

    #[tokio::test]
    async fn test_global_block_payload() {
        let fake = CannedCriteria::new(Scope::Global, &[]);
        service(&fake).block_ip("123456789", None, "192.168.1.1").await.unwrap();

        let batches = fake.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, ResourceKind::CustomerNegativeCriterion);
        assert_eq!(
            batches[0].1,
            vec![Operation::Create(json!({
                "type": "IP_BLOCK",
                "ipBlock": { "ipAddress": "192.168.1.1" }
            }))]
        );
        assert!(fake.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_campaign_block_payload() {
        let fake = CannedCriteria::new(Scope::Campaign, &[]);
        service(&fake)
            .block_ip("123456789", Some("987654321"), "10.0.0.1")
            .await
            .unwrap();

        let batches = fake.batches.lock().unwrap();
        assert_eq!(batches[0].0, ResourceKind::CampaignCriterion);
        assert_eq!(
            batches[0].1,
            vec![Operation::Create(json!({
                "campaign": "customers/123456789/campaigns/987654321",
                "negative": true,
                "ipBlock": { "ipAddress": "10.0.0.1" }
            }))]
        );
    }

    #[tokio::test]
    async fn test_block_twice_creates_twice() {
        let fake = CannedCriteria::new(Scope::Global, &[]);
        let svc = service(&fake);

        svc.block_ip("1", None, "1.1.1.1").await.unwrap();
        svc.block_ip("1", None, "1.1.1.1").await.unwrap();

        let creates = fake
            .batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, ops)| ops.iter())
            .filter(|op| op.is_create())
            .count();
        assert_eq!(creates, 2);
    }

    #[tokio::test]
    async fn test_global_unblock_removes_every_match() {
        let fake = CannedCriteria::new(
            Scope::Global,
            &[
                "customers/1/customerNegativeCriteria/10",
                "customers/1/customerNegativeCriteria/11",
                "customers/1/customerNegativeCriteria/12",
            ],
        );

        let removed = service(&fake).unblock_ip("1", None, "1.1.1.1").await.unwrap();
        assert_eq!(removed, 3);

        let batches = fake.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.len(), 3);
        assert!(batches[0].1.iter().all(|op| matches!(op, Operation::Remove(_))));
    }

    #[tokio::test]
    async fn test_campaign_unblock_removes_first_match_only() {
        let fake = CannedCriteria::new(
            Scope::Campaign,
            &[
                "customers/1/campaignCriteria/5~100",
                "customers/1/campaignCriteria/5~101",
            ],
        );

        let removed = service(&fake).unblock_ip("1", Some("5"), "1.1.1.1").await.unwrap();
        assert_eq!(removed, 1);

        let batches = fake.batches.lock().unwrap();
        assert_eq!(
            batches[0].1,
            vec![Operation::Remove("customers/1/campaignCriteria/5~100".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unblock_without_match_is_noop() {
        let fake = CannedCriteria::new(Scope::Global, &[]);

        let removed = service(&fake).unblock_ip("1", None, "1.1.1.1").await.unwrap();

        assert_eq!(removed, 0);
        assert!(fake.batches.lock().unwrap().is_empty());
        assert_eq!(fake.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_query_shapes() {
        let global = CannedCriteria::new(Scope::Global, &[]);
        service(&global).unblock_ip("1", None, "1.1.1.1").await.unwrap();
        assert_eq!(
            global.queries.lock().unwrap()[0],
            "SELECT customer_negative_criterion.resource_name FROM customer_negative_criterion \
             WHERE customer_negative_criterion.type = 'IP_BLOCK' \
             AND customer_negative_criterion.ip_block.ip_address = '1.1.1.1/32'"
        );

        let campaign = CannedCriteria::new(Scope::Campaign, &[]);
        service(&campaign).unblock_ip("1", Some("5"), "1.1.1.1").await.unwrap();
        assert_eq!(
            campaign.queries.lock().unwrap()[0],
            "SELECT campaign_criterion.resource_name FROM campaign_criterion \
             WHERE campaign_criterion.type = 'IP_BLOCK' \
             AND campaign_criterion.campaign = 'customers/1/campaigns/5' \
             AND campaign_criterion.ip_block.ip_address = '1.1.1.1/32'"
        );
    }

    #[tokio::test]
    async fn test_hostile_ip_is_escaped() {
        let fake = CannedCriteria::new(Scope::Global, &[]);
        service(&fake).unblock_ip("1", None, "1.1.1.1' OR 'x").await.unwrap();

        let query = fake.queries.lock().unwrap()[0].clone();
        assert!(query.ends_with("ip_address = '1.1.1.1\\' OR \\'x/32'"));
    }

    #[tokio::test]
    async fn test_scope_campaign_mismatch() {
        let global = CannedCriteria::new(Scope::Global, &[]);
        let err = service(&global).block_ip("1", Some("5"), "1.1.1.1").await.unwrap_err();
        assert!(matches!(err, AdsError::InvalidArgument(_)));

        let campaign = CannedCriteria::new(Scope::Campaign, &[]);
        let err = service(&campaign).unblock_ip("1", None, "1.1.1.1").await.unwrap_err();
        assert!(matches!(err, AdsError::InvalidArgument(_)));

        assert!(global.batches.lock().unwrap().is_empty());
        assert!(campaign.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_rules_reports_handles() {
        let fake = CannedCriteria::new(Scope::Campaign, &["customers/1/campaignCriteria/5~100"]);

        let rules = service(&fake).find_rules("1", Some("5"), "1.1.1.1").await.unwrap();

        assert_eq!(
            rules,
            vec![IpExclusionRule {
                scope: Scope::Campaign,
                account_id: "1".to_string(),
                campaign_id: Some("5".to_string()),
                ip_address: "1.1.1.1/32".to_string(),
                resource_handle: Some("customers/1/campaignCriteria/5~100".to_string()),
            }]
        );
    }
}
