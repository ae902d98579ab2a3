//! Ad Platform Access Agent
//!
//! Sends manager invitations, checks management links and maintains IP
//! exclusion lists on Google Ads and Microsoft Advertising. Credentials come
//! from `GOOGLE_ADS_*` / `BING_ADS_*` environment variables or a `.env` file.
//!
//! # Usage
//! ```bash
//! # Invite a user to a Google Ads account
//! ads-access google invite --customer 1234567890 --email user@example.com
//!
//! # Block an IP on every campaign of an account
//! ads-access google block --customer 123456789 --ip 192.168.1.1
//!
//! # List accounts linked to the Microsoft Advertising manager
//! ads-access microsoft linked-accounts
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ads_access::config::{normalize_customer_id, AdsConfig, PlatformCredentials};
use ads_access::session::{EnvFileSecretSink, OAuthEndpoint, OAuthSession, SecretSink};
use ads_access::{
    AccessLinkService, ExclusionListService, GoogleAdsClient, Invitation, MicrosoftAdsClient,
    MutationGateway, Platform, QueryGateway, Scope,
};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "ads-access")]
#[command(about = "Ad platform access links and IP exclusion lists", long_about = None)]
#[command(version)]
struct Cli {
    /// Dotenv file with platform credentials
    #[arg(long, env = "ADS_ACCESS_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Google Ads operations
    #[command(subcommand)]
    Google(GoogleCommand),

    /// Microsoft Advertising operations
    #[command(subcommand)]
    Microsoft(MicrosoftCommand),
}

#[derive(Subcommand)]
enum GoogleCommand {
    /// Invite a user to a customer account
    Invite {
        /// Customer id (dashes allowed)
        #[arg(long)]
        customer: String,

        /// Email address to invite
        #[arg(long)]
        email: String,

        /// Access role
        #[arg(long, default_value = ads_access::access::DEFAULT_ROLE)]
        role: String,
    },

    /// Check whether the login manager has an active link to a customer
    CanManage {
        #[arg(long)]
        customer: String,
    },

    /// Exclude an IP address
    Block {
        #[arg(long)]
        customer: String,

        /// Restrict the exclusion to one campaign
        #[arg(long)]
        campaign: Option<String>,

        #[arg(long)]
        ip: String,
    },

    /// Remove an IP exclusion
    Unblock {
        #[arg(long)]
        customer: String,

        #[arg(long)]
        campaign: Option<String>,

        #[arg(long)]
        ip: String,
    },

    /// Show exclusions stored for an IP address
    ListBlocks {
        #[arg(long)]
        customer: String,

        #[arg(long)]
        campaign: Option<String>,

        #[arg(long)]
        ip: String,
    },
}

#[derive(Subcommand)]
enum MicrosoftCommand {
    /// Request an account link to a client account
    Invite {
        /// Client account number (e.g. F123456)
        #[arg(long)]
        account_number: String,
    },

    /// Check whether the login manager has an active link to an account
    CanManage {
        /// Account id or account number
        #[arg(long)]
        account: String,
    },

    /// List accounts with an active link to the login manager
    LinkedAccounts,
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json)?;

    info!("🚀 Ads access agent starting...");

    let config = AdsConfig::load(cli.env_file.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Google(command) => run_google(&config, command).await,
        Commands::Microsoft(command) => run_microsoft(&config, command).await,
    }
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    if json {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Exchange the refresh token, persisting a rotated one back to the dotenv
/// file the configuration was loaded from.
async fn connect(
    endpoint: OAuthEndpoint,
    credentials: &PlatformCredentials,
    env_file: Option<&Path>,
    refresh_key: &str,
) -> Result<Arc<OAuthSession>> {
    info!("🔐 Requesting access token ({})", endpoint.token_url);

    let sink = env_file.map(|path| EnvFileSecretSink::new(path, refresh_key));
    if sink.is_none() {
        warn!("No .env file loaded; rotated refresh tokens will not be saved");
    }

    let http = reqwest::Client::new();
    let session = OAuthSession::connect(
        &http,
        &endpoint,
        credentials,
        sink.as_ref().map(|s| s as &dyn SecretSink),
    )
    .await
    .context("Failed to authenticate")?;

    info!("✅ Session established");
    Ok(Arc::new(session))
}

async fn run_google(config: &AdsConfig, command: GoogleCommand) -> Result<()> {
    let credentials = config.google()?;
    let session = connect(
        OAuthEndpoint::google(),
        credentials,
        config.env_file(),
        "GOOGLE_ADS_REFRESH_TOKEN",
    )
    .await?;

    let client = GoogleAdsClient::new(
        session,
        credentials.developer_token.clone(),
        credentials.login_customer_id.clone(),
    )?;
    let (query, mutation) = client.into_gateways();
    let manager_id = credentials.login_customer_id.as_str();

    match command {
        GoogleCommand::Invite { customer, email, role } => {
            let customer = normalize_customer_id(&customer);
            info!("✉️  Inviting {} to {} as {}", email, customer, role);

            let links = AccessLinkService::new(Platform::GoogleAds, query, mutation, manager_id);
            links
                .send_invitation(&Invitation::new(&customer, &email).role(role))
                .await
                .context("Failed to send invitation")?;

            println!("✅ Invitation sent to {}", email);
        }

        GoogleCommand::CanManage { customer } => {
            let customer = normalize_customer_id(&customer);
            let links = AccessLinkService::new(Platform::GoogleAds, query, mutation, manager_id);
            let allowed = links.can_manage_account(manager_id, &customer).await?;
            print_can_manage(manager_id, &customer, allowed);
        }

        GoogleCommand::Block { customer, campaign, ip } => {
            let customer = normalize_customer_id(&customer);
            let service = exclusions(campaign.as_deref(), query, mutation);
            info!("⛔ Blocking {} ({})", ip, service.scope());

            service.block_ip(&customer, campaign.as_deref(), &ip).await?;
            println!("✅ Blocked {}", ip);
        }

        GoogleCommand::Unblock { customer, campaign, ip } => {
            let customer = normalize_customer_id(&customer);
            let service = exclusions(campaign.as_deref(), query, mutation);
            warn!("🗑️  Unblocking {} ({})", ip, service.scope());

            let removed = service.unblock_ip(&customer, campaign.as_deref(), &ip).await?;
            if removed == 0 {
                println!("ℹ️  No exclusion found for {}", ip);
            } else {
                println!("✅ Removed {} exclusion(s) for {}", removed, ip);
            }
        }

        GoogleCommand::ListBlocks { customer, campaign, ip } => {
            let customer = normalize_customer_id(&customer);
            let service = exclusions(campaign.as_deref(), query, mutation);
            let rules = service.find_rules(&customer, campaign.as_deref(), &ip).await?;

            println!("\n{:<10} {:<18} {:<60}", "SCOPE", "IP", "RESOURCE");
            println!("{}", "-".repeat(90));
            for rule in &rules {
                println!(
                    "{:<10} {:<18} {:<60}",
                    rule.scope,
                    rule.ip_address,
                    rule.resource_handle.as_deref().unwrap_or("-")
                );
            }

            info!("✅ Listed {} exclusions", rules.len());
        }
    }

    Ok(())
}

async fn run_microsoft(
    config: &AdsConfig,
    command: MicrosoftCommand,
) -> Result<()> {
    let credentials = config.microsoft()?;
    let session = connect(
        OAuthEndpoint::microsoft(),
        credentials,
        config.env_file(),
        "BING_ADS_REFRESH_TOKEN",
    )
    .await?;

    let client = MicrosoftAdsClient::new(session, credentials.developer_token.clone())?;
    let (query, mutation) = client.into_gateways();
    let manager_id = credentials.login_customer_id.as_str();
    let links = AccessLinkService::new(Platform::MicrosoftAds, query, mutation, manager_id);

    match command {
        MicrosoftCommand::Invite { account_number } => {
            info!("✉️  Requesting account link to {}", account_number);
            links
                .send_invitation(&Invitation::new(manager_id, &account_number))
                .await
                .context("Failed to add client link")?;

            println!("✅ Link requested for {}", account_number);
        }

        MicrosoftCommand::CanManage { account } => {
            let allowed = links.can_manage_account(manager_id, &account).await?;
            print_can_manage(manager_id, &account, allowed);
        }

        MicrosoftCommand::LinkedAccounts => {
            let accounts = links.get_linked_accounts(manager_id).await?;

            println!("\n{:<20} {:<20}", "ACCOUNT ID", "ACCOUNT NUMBER");
            println!("{}", "-".repeat(40));
            for account in &accounts {
                println!("{:<20} {:<20}", account.linked_id, account.linked_number);
            }

            info!("✅ Listed {} linked accounts", accounts.len());
        }
    }

    Ok(())
}

fn exclusions(
    campaign: Option<&str>,
    query: Arc<dyn QueryGateway>,
    mutation: Arc<dyn MutationGateway>,
) -> ExclusionListService {
    let scope = if campaign.is_some() {
        Scope::Campaign
    } else {
        Scope::Global
    };
    ExclusionListService::new(scope, query, mutation)
}

fn print_can_manage(manager_id: &str, client_id: &str, allowed: bool) {
    if allowed {
        println!("✅ {} can manage {}", manager_id, client_id);
    } else {
        println!("❌ {} has no active link to {}", manager_id, client_id);
    }
}
