//! Ad Platform Access Agent Library
//!
//! Reconciles manager access links and IP exclusion lists on Google Ads and
//! Microsoft Advertising. Services talk to a platform only through the
//! [`QueryGateway`] / [`MutationGateway`] pair, so the same logic runs over
//! either transport (or an in-memory fake in tests).

pub mod access;
pub mod config;
pub mod error;
pub mod exclusion;
pub mod gateway;
pub mod google;
pub mod microsoft;
pub mod query;
pub mod session;

pub use access::{AccessLinkService, Invitation, LinkStatus, LinkedAccount, Platform};
pub use config::{AdsConfig, PlatformCredentials};
pub use error::{AdsError, Result};
pub use exclusion::{ExclusionListService, IpExclusionRule, Scope};
pub use gateway::{
    MutationGateway, Operation, PaginatedQueryGateway, QueryGateway, ResourceKind, Row,
    StreamingQueryGateway,
};
pub use google::GoogleAdsClient;
pub use microsoft::MicrosoftAdsClient;
pub use session::{EnvFileSecretSink, OAuthEndpoint, OAuthSession, SecretSink, Session, StaticSession};
