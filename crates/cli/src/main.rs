//! ocspwatch - operator and probe-agent CLI.

mod api_client;

use anyhow::{Context, Result};
use api_client::{ApiClient, StatusReport};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use ocspwatch_core::{Measurement, RegistrationClaims, SubmissionClaims};
use ocspwatch_signer::{AgentKeyPair, KeyAlgorithm, sign_compact};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ocspwatch")]
#[command(about = "Operator and probe-agent CLI for ocspwatch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientConfigArgs {
    /// Client config file path
    #[arg(long, env = "OCSPWATCH_CLIENT_CONFIG")]
    client_config: Option<String>,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL (overrides client config)
    #[arg(long)]
    server: Option<String>,

    /// Admin token (overrides client config)
    #[arg(long)]
    token: Option<String>,

    /// Server profile to use from client config (default: default_profile)
    #[arg(long)]
    profile: Option<String>,

    #[command(flatten)]
    client: ClientConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a server profile to the client config
    Login {
        /// Profile alias
        alias: String,
        /// Server URL
        url: String,
        /// Admin token
        #[arg(long, conflicts_with = "token_stdin")]
        token: Option<String>,
        /// Read the admin token from stdin
        #[arg(long)]
        token_stdin: bool,
        /// Make this the default profile
        #[arg(long)]
        set_default: bool,
        #[command(flatten)]
        client: ClientConfigArgs,
    },
    /// Invite management commands
    Invite {
        #[command(subcommand)]
        command: InviteCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Run a refresh cycle and print its report
    Refresh {
        /// Number of top authorities to refresh
        #[arg(short, long)]
        n: Option<u32>,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Print the work manifest as NDJSON
    Manifest {
        /// Number of top authorities to include
        #[arg(short, long)]
        n: Option<u32>,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show responder health per location
    Status {
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Probe-agent commands
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
}

#[derive(Subcommand)]
enum InviteCommands {
    /// Invite a new probe location and print its one-time token
    Create {
        /// Location name
        name: String,
    },
    /// List invited and registered locations
    List,
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Generate a new agent signing key
    Genkey {
        /// Key algorithm (ed25519 or p256)
        #[arg(short, long, default_value = "ed25519")]
        algorithm: String,
        /// Output file for the PKCS#8 PEM private key
        #[arg(short, long)]
        output: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the key id of an agent key
    KeyId {
        /// Path to the PKCS#8 PEM private key
        #[arg(short, long)]
        key: String,
    },
    /// Register this agent's key with an invite token
    Register {
        /// Invite token printed by `invite create`
        invite_token: String,
        /// Path to the PKCS#8 PEM private key
        #[arg(short, long)]
        key: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Sign and submit measurements read as a JSON array
    Submit {
        /// Path to the PKCS#8 PEM private key
        #[arg(short, long)]
        key: String,
        /// Measurements file (default: stdin)
        #[arg(short, long)]
        input: Option<String>,
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Login {
            alias,
            url,
            token,
            token_stdin,
            set_default,
            client,
        } => handle_login_command(&alias, &url, token, token_stdin, set_default, &client).await,
        Commands::Invite { command, api } => handle_invite_command(command, &api).await,
        Commands::Refresh { n, api } => handle_refresh_command(n, &api).await,
        Commands::Manifest { n, api } => handle_manifest_command(n, &api).await,
        Commands::Status { json, api } => handle_status_command(json, &api).await,
        Commands::Health { api } => handle_health_command(&api).await,
        Commands::Agent { command } => handle_agent_command(command).await,
    }
}

// =============================================================================
// Client config
// =============================================================================

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
struct ClientConfig {
    default_profile: Option<String>,
    profiles: BTreeMap<String, ServerProfile>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
struct ServerProfile {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

/// Server URL and optional admin token for a command.
struct ApiTarget {
    server: String,
    token: Option<String>,
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = std::env::var_os("OCSPWATCH_CLIENT_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set OCSPWATCH_CLIENT_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("ocspwatch").join("client.toml"))
}

async fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("OCSPWATCH_CLIENT_").split("__"));

    match figment.extract() {
        Ok(config) => Ok(config),
        Err(_) if !path.exists() => Ok(ClientConfig::default()),
        Err(err) => Err(anyhow::anyhow!(err).context("failed to load client configuration")),
    }
}

async fn save_client_config(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;

    tokio::fs::write(path, contents).await?;

    // The file may hold the admin token.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

/// Resolve the target server: flags first, then `OCSPWATCH_SERVER` /
/// `OCSPWATCH_ADMIN_TOKEN`, then the selected client config profile.
async fn resolve_api_target(api: &ApiArgs) -> Result<ApiTarget> {
    let env_server = std::env::var("OCSPWATCH_SERVER").ok();
    let env_token = std::env::var("OCSPWATCH_ADMIN_TOKEN").ok();

    let mut server = api.server.clone().or(env_server);
    let mut token = api.token.clone().or(env_token);

    if server.is_none() || token.is_none() {
        let config_path = client_config_path(api.client.client_config.as_deref())?;
        let config = load_client_config(&config_path).await?;
        let profile_name = api.profile.as_ref().or(config.default_profile.as_ref());

        if let Some(name) = profile_name {
            let profile = config.profiles.get(name).ok_or_else(|| {
                anyhow::anyhow!("profile '{}' not found in client config", name)
            })?;
            if server.is_none() {
                server = Some(profile.url.clone());
                // A profile's token only applies to its own server.
                if token.is_none() {
                    token = profile.token.clone();
                }
            }
        }
    }

    let server = server.ok_or_else(|| {
        anyhow::anyhow!("no server configured: use --server, OCSPWATCH_SERVER, or `ocspwatch login`")
    })?;
    Ok(ApiTarget {
        server: normalize_base_url(&server)?,
        token,
    })
}

async fn get_api_client(api: &ApiArgs) -> Result<ApiClient> {
    let target = resolve_api_target(api).await?;
    ApiClient::new(&target.server, target.token.as_deref())
}

async fn get_admin_client(api: &ApiArgs) -> Result<ApiClient> {
    let target = resolve_api_target(api).await?;
    let token = target.token.ok_or_else(|| {
        anyhow::anyhow!("admin token required: use --token, OCSPWATCH_ADMIN_TOKEN, or a profile")
    })?;
    ApiClient::new(&target.server, Some(&token))
}

fn read_token(token: Option<String>, token_stdin: bool) -> Result<Option<String>> {
    if let Some(token) = token {
        return Ok(Some(token));
    }
    if token_stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        let token = buf.trim().to_string();
        if token.is_empty() {
            anyhow::bail!("token read from stdin is empty");
        }
        return Ok(Some(token));
    }
    Ok(None)
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}

// =============================================================================
// Operator commands
// =============================================================================

async fn handle_login_command(
    alias: &str,
    url: &str,
    token: Option<String>,
    token_stdin: bool,
    set_default: bool,
    client: &ClientConfigArgs,
) -> Result<()> {
    let token = read_token(token, token_stdin)?;
    let base_url = normalize_base_url(url)?;
    let config_path = client_config_path(client.client_config.as_deref())?;

    let health = ApiClient::new(&base_url, None)?
        .health()
        .await
        .context("server health check failed")?;

    let mut config = load_client_config(&config_path).await?;
    config.profiles.insert(
        alias.to_string(),
        ServerProfile {
            url: base_url.clone(),
            token,
        },
    );
    if set_default || config.default_profile.is_none() {
        config.default_profile = Some(alias.to_string());
    }

    save_client_config(&config_path, &config).await?;

    println!("Saved profile '{alias}'");
    println!("  URL: {base_url}");
    println!("  Server version: {}", health.version);
    println!("Client config: {}", config_path.display());
    Ok(())
}

async fn handle_invite_command(command: InviteCommands, api: &ApiArgs) -> Result<()> {
    let client = get_admin_client(api).await?;
    match command {
        InviteCommands::Create { name } => {
            let invite = client.create_invite(&name).await?;
            println!("Location: {} ({})", invite.name, invite.location_id);
            println!("Invite token: {}", invite.invite_token);
            println!("\nThe token is shown only once. On the agent host run:");
            println!(
                "  ocspwatch agent register {} --key <key.pem>",
                invite.invite_token
            );
        }
        InviteCommands::List => {
            let locations = client.list_locations().await?;
            if locations.is_empty() {
                println!("No locations.");
            }
            for location in locations {
                let state = if location.registered {
                    "registered"
                } else {
                    "invited"
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    location.name,
                    state,
                    location.key_id.as_deref().unwrap_or("-"),
                    location.location_id
                );
            }
        }
    }
    Ok(())
}

async fn handle_refresh_command(n: Option<u32>, api: &ApiArgs) -> Result<()> {
    let client = get_admin_client(api).await?;
    let report = client.refresh(n).await?;

    println!("Authorities updated: {}", report.authorities);
    println!("Responders updated:  {}", report.responders);
    println!("Chains fetched:      {}", report.chains_fetched);
    println!("Chains reused:       {}", report.chains_reused);
    println!("Chains missing:      {}", report.chains_missing);
    Ok(())
}

async fn handle_manifest_command(n: Option<u32>, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let body = client.manifest(n).await?;
    print!("{body}");
    Ok(())
}

async fn handle_status_command(json: bool, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let report = client.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render_status(&report);
    }
    Ok(())
}

fn render_status(report: &StatusReport) {
    if report.authorities.is_empty() {
        println!("No authorities tracked yet. Run `ocspwatch refresh`.");
        return;
    }
    for authority in &report.authorities {
        println!("{} ({} certificates)", authority.name, authority.cardinality);
        for responder in &authority.responders {
            let current = if responder.current { "" } else { " [no current chain]" };
            println!("  {}{}", responder.url, current);
            if responder.locations.is_empty() {
                println!("    no results");
            }
            for location in &responder.locations {
                println!(
                    "    {:<24} {:<12} ping={} ocsp={} at {}",
                    location.name,
                    location.status,
                    location.ping,
                    location.ocsp,
                    location.retrieved_at
                );
            }
        }
    }
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let health = client.health().await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

// =============================================================================
// Agent commands
// =============================================================================

async fn handle_agent_command(command: AgentCommands) -> Result<()> {
    match command {
        AgentCommands::Genkey {
            algorithm,
            output,
            force,
        } => {
            let algorithm: KeyAlgorithm = algorithm.parse()?;
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!("{output} already exists; use --force to overwrite");
            }

            let key = AgentKeyPair::generate(algorithm);
            write_private_key(path, &key.to_pkcs8_pem()?).await?;

            println!("Private key written to: {output}");
            println!("Algorithm: {algorithm}");
            println!("Key id: {}", key.public_key().key_id()?);
        }
        AgentCommands::KeyId { key } => {
            let key = load_key(&key)?;
            println!("{}", key.public_key().key_id()?);
        }
        AgentCommands::Register {
            invite_token,
            key,
            api,
        } => {
            let key = load_key(&key)?;
            let envelope = registration_envelope(&key, &invite_token)?;
            let client = get_api_client(&api).await?;
            let registered = client.register(envelope).await?;

            println!("Registered location: {}", registered.name);
            println!("  Location id: {}", registered.location_id);
            println!("  Key id: {}", registered.key_id);
        }
        AgentCommands::Submit { key, input, api } => {
            let key = load_key(&key)?;
            let raw = match input {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {path}"))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let measurements: Vec<Measurement> =
                serde_json::from_str(&raw).context("measurements must be a JSON array")?;

            let envelope = submission_envelope(&key, measurements)?;
            let client = get_api_client(&api).await?;
            let receipt = client.submit(envelope).await?;

            println!("Accepted: {}", receipt.accepted);
            println!("Skipped:  {}", receipt.skipped);
        }
    }
    Ok(())
}

fn load_key(path: &str) -> Result<AgentKeyPair> {
    AgentKeyPair::from_pem_file(path).with_context(|| format!("failed to load key from {path}"))
}

async fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, pem)
        .await
        .with_context(|| format!("failed to write key to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }
    Ok(())
}

/// Self-signed registration envelope carrying the public key and the invite.
fn registration_envelope(key: &AgentKeyPair, invite_token: &str) -> Result<String> {
    let claims = RegistrationClaims {
        public_key: key.public_key().to_pem()?,
        invite_token: invite_token.trim().to_string(),
    };
    Ok(sign_compact(key, None, &claims)?)
}

/// Submission envelope whose `kid` names the registered key.
fn submission_envelope(key: &AgentKeyPair, measurements: Vec<Measurement>) -> Result<String> {
    let key_id = key.public_key().key_id()?.to_string();
    let claims = SubmissionClaims::new(measurements);
    Ok(sign_compact(key, Some(&key_id), &claims)?)
}
