//! Account Access Links
//!
//! Sends management invitations and answers "can this manager act on that
//! account?" for either platform. Link records are owned by the platform and
//! only ever read here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{AdsError, Result};
use crate::gateway::{MutationGateway, Operation, QueryGateway, ResourceKind, Row};
use crate::query::{customer_resource, Query};

/// Role granted when none is given
pub const DEFAULT_ROLE: &str = "ADMIN";

/// Which ad platform a service talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    GoogleAds,
    MicrosoftAds,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GoogleAds => "google-ads",
            Platform::MicrosoftAds => "microsoft-ads",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a manager/client link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Pending,
    /// The only status that grants management
    Active,
    Refused,
    Canceled,
    Inactive,
    Unknown,
}

impl LinkStatus {
    /// Parse either platform's spelling of a link status
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ACTIVE" | "Active" => LinkStatus::Active,
            "PENDING" | "LinkPending" | "LinkInProgress" | "LinkAccepted" => LinkStatus::Pending,
            "REFUSED" | "LinkDeclined" => LinkStatus::Refused,
            "CANCELED" | "LinkCanceled" | "LinkExpired" => LinkStatus::Canceled,
            "INACTIVE" | "Inactive" => LinkStatus::Inactive,
            _ => LinkStatus::Unknown,
        }
    }
}

/// An access invitation; written once, never read back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    /// Account the invitation grants access to
    pub account_id: String,
    /// Email address (Google Ads) or account number (Microsoft Advertising)
    pub target: String,
    pub role: String,
}

impl Invitation {
    pub fn new(account_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            target: target.into(),
            role: DEFAULT_ROLE.to_string(),
        }
    }

    /// Override the access role
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// An account reachable through an active link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub linked_id: String,
    pub linked_number: String,
}

/// Invitation and link-verification service
pub struct AccessLinkService {
    platform: Platform,
    query: Arc<dyn QueryGateway>,
    mutation: Arc<dyn MutationGateway>,
    manager_id: String,
}

impl AccessLinkService {
    /// `manager_id` is the login (manager) account invitations are sent from.
    pub fn new(
        platform: Platform,
        query: Arc<dyn QueryGateway>,
        mutation: Arc<dyn MutationGateway>,
        manager_id: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            query,
            mutation,
            manager_id: manager_id.into(),
        }
    }

    /// Submit one invitation as a single CREATE operation.
    pub async fn send_invitation(&self, invitation: &Invitation) -> Result<()> {
        let (kind, payload) = match self.platform {
            Platform::GoogleAds => (
                ResourceKind::CustomerUserAccessInvitation,
                json!({
                    "emailAddress": invitation.target,
                    "accessRole": invitation.role,
                }),
            ),
            Platform::MicrosoftAds => (
                ResourceKind::ClientLink,
                json!({
                    "Type": "AccountLink",
                    "ClientEntityNumber": invitation.target,
                    "ManagingCustomerId": self.manager_id,
                    "IsBillToClient": true,
                    "SuppressNotification": false,
                }),
            ),
        };

        self.mutation
            .apply(&invitation.account_id, kind, vec![Operation::Create(payload)])
            .await?;

        info!(
            platform = %self.platform,
            account_id = %invitation.account_id,
            role = %invitation.role,
            "Invitation sent"
        );
        Ok(())
    }

    /// True when an active link from `manager_id` to `client_id` exists.
    ///
    /// No matching link is a plain `false`, not an error.
    pub async fn can_manage_account(&self, manager_id: &str, client_id: &str) -> Result<bool> {
        match self.platform {
            Platform::GoogleAds => {
                let query = Query::select("customer_client_link.status", "customer_client_link")
                    .filter_eq("customer_client_link.manager_link_id", manager_id)
                    .filter_eq("customer_client_link.client_customer", customer_resource(client_id));

                let rows = self.query.run(manager_id, &query.to_string()).await?;
                let active = rows
                    .iter()
                    .any(|row| link_status(row, "customerClientLink.status") == LinkStatus::Active);

                debug!(manager_id = %manager_id, client_id = %client_id, rows = rows.len(), active, "Checked client link");
                Ok(active)
            }
            Platform::MicrosoftAds => {
                let linked = self.get_linked_accounts(manager_id).await?;
                Ok(linked
                    .iter()
                    .any(|a| a.linked_id == client_id || a.linked_number == client_id))
            }
        }
    }

    /// Every account linked to `manager_id` with an active status, across all
    /// pages.
    ///
    /// Only list-based platforms support this.
    pub async fn get_linked_accounts(&self, manager_id: &str) -> Result<Vec<LinkedAccount>> {
        if self.platform != Platform::MicrosoftAds {
            return Err(AdsError::unsupported(self.platform.as_str(), "get_linked_accounts"));
        }

        let query = Query::select("ClientLink", "ClientLinks").filter_eq("ManagingCustomerId", manager_id);
        let rows = self.query.run(manager_id, &query.to_string()).await?;

        let linked: Vec<LinkedAccount> = rows
            .iter()
            .filter(|row| link_status(row, "ClientLink.Status") == LinkStatus::Active)
            .map(|row| LinkedAccount {
                linked_id: row.get_str("ClientLink.ClientEntityId").unwrap_or_default().to_string(),
                linked_number: row
                    .get_str("ClientLink.ClientEntityNumber")
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();

        debug!(manager_id = %manager_id, rows = rows.len(), active = linked.len(), "Listed client links");
        Ok(linked)
    }
}

fn link_status(row: &Row, path: &str) -> LinkStatus {
    row.get_str(path).map(LinkStatus::parse).unwrap_or(LinkStatus::Unknown)
}
