use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Confirm, Input, Password};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;

/// Redirect URI used outside production
pub const LOCAL_REDIRECT_URI: &str = "http://127.0.0.1:5173/auth/callback";

/// Spotify auth relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "5001")]
    pub port: u16,

    /// Spotify application client ID
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Spotify application client secret
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Base URL of the accounts service (authorize and token endpoints)
    #[arg(long, env = "SPOTIFY_ACCOUNTS_URL", default_value = "https://accounts.spotify.com")]
    pub accounts_url: String,

    /// Deployment environment (production, development)
    #[arg(short = 'e', long, env = "APP_ENV", default_value = "development")]
    pub app_env: String,

    /// Explicit OAuth redirect URI, overrides environment-based selection
    #[arg(long, env = "REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Redirect URI used when APP_ENV=production
    #[arg(long, env = "PRODUCTION_REDIRECT_URI")]
    pub production_redirect_uri: Option<String>,

    /// Where the browser lands after a successful login
    #[arg(
        long,
        env = "FRONTEND_SUCCESS_URL",
        default_value = "http://localhost:5173/?spotify=connected"
    )]
    pub frontend_success_url: String,

    /// Path to the token file
    #[arg(short = 't', long, env = "TOKEN_FILE", default_value = ".spotify_tokens.json")]
    pub token_file: String,

    /// Comma-separated list of allowed CORS origins
    #[arg(long, env = "CORS_ORIGINS", default_value = "http://localhost:5173")]
    pub cors_origins: String,

    /// Key guarding POST /setup-token; the route is disabled when unset
    #[arg(long, env = "SETUP_TOKEN_KEY", hide_env_values = true)]
    pub setup_token_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Token endpoint request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "10")]
    pub http_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Provider credentials
    pub client_id: String,
    pub client_secret: String,
    pub accounts_url: String,

    // OAuth flow
    pub environment: Environment,
    pub redirect_uri: String,
    pub frontend_success_url: String,
    pub verify_state: bool,

    // Token storage
    pub token_file: PathBuf,

    // Refresh timing (seconds)
    pub token_refresh_interval: u64,
    pub token_refresh_lead: u64,

    // HTTP
    pub http_request_timeout: u64,
    pub cors_origins: Vec<String>,

    // Manual override
    pub setup_token_key: Option<String>,

    // Logging
    pub log_level: String,
    pub log_json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Environment {
    Production,
    Development,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
        }
    }
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Parse CLI arguments
        let args = CliArgs::parse();
        let environment = parse_environment(&args.app_env);

        let config = Config {
            server_host: args.host,
            server_port: args.port,

            client_id: args
                .client_id
                .filter(|s| !s.is_empty())
                .context("SPOTIFY_CLIENT_ID is required (use --client-id or set SPOTIFY_CLIENT_ID env var)")?,

            client_secret: args
                .client_secret
                .filter(|s| !s.is_empty())
                .context("SPOTIFY_CLIENT_SECRET is required (use --client-secret or set SPOTIFY_CLIENT_SECRET env var)")?,

            accounts_url: args.accounts_url,

            redirect_uri: resolve_redirect_uri(
                environment,
                args.redirect_uri,
                args.production_redirect_uri,
            )?,

            environment,

            frontend_success_url: args.frontend_success_url,

            verify_state: std::env::var("VERIFY_OAUTH_STATE")
                .ok()
                .map(|s| parse_bool(&s))
                .unwrap_or(true),

            token_file: expand_tilde(&args.token_file),

            token_refresh_interval: std::env::var("TOKEN_REFRESH_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600),

            token_refresh_lead: std::env::var("TOKEN_REFRESH_LEAD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600),

            http_request_timeout: args.http_timeout,

            cors_origins: parse_origins(&args.cors_origins),

            setup_token_key: args.setup_token_key.filter(|s| !s.is_empty()),

            log_level: args.log_level,

            log_json: args.log_format.eq_ignore_ascii_case("json"),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.token_refresh_interval == 0 {
            anyhow::bail!("TOKEN_REFRESH_INTERVAL must be greater than zero");
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        reqwest::Url::parse(&self.accounts_url)
            .with_context(|| format!("SPOTIFY_ACCOUNTS_URL is not a valid URL: {}", self.accounts_url))?;

        reqwest::Url::parse(&self.redirect_uri)
            .with_context(|| format!("Redirect URI is not a valid URL: {}", self.redirect_uri))?;

        for origin in &self.cors_origins {
            axum::http::HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid CORS origin: {}", origin))?;
        }

        Ok(())
    }
}

/// Pick the redirect URI: explicit override, then the production URI in
/// production, then the local callback.
pub fn resolve_redirect_uri(
    environment: Environment,
    explicit: Option<String>,
    production: Option<String>,
) -> Result<String> {
    if let Some(uri) = explicit.filter(|s| !s.is_empty()) {
        return Ok(uri);
    }

    match environment {
        Environment::Production => production.filter(|s| !s.is_empty()).context(
            "PRODUCTION_REDIRECT_URI (or REDIRECT_URI) is required when APP_ENV=production",
        ),
        Environment::Development => Ok(LOCAL_REDIRECT_URI.to_string()),
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse environment from string
fn parse_environment(s: &str) -> Environment {
    match s.to_lowercase().as_str() {
        "production" | "prod" => Environment::Production,
        _ => Environment::Development,
    }
}

fn parse_bool(s: &str) -> bool {
    !matches!(s.to_lowercase().as_str(), "false" | "0" | "no" | "off")
}

fn parse_origins(s: &str) -> Vec<String> {
    s.split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}


// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file, missing client
/// credentials, and someone at the terminal to answer)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();

    let has_client_id = std::env::var("SPOTIFY_CLIENT_ID").is_ok();
    let has_client_secret = std::env::var("SPOTIFY_CLIENT_SECRET").is_ok();

    !env_file_exists && (!has_client_id || !has_client_secret) && std::io::stdin().is_terminal()
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub server_port: String,
}

/// Run interactive setup to collect the client credentials
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("Spotify auth relay - first time setup");
    println!();
    println!("No configuration found. Create an app at https://developer.spotify.com/dashboard");
    println!("and enter its credentials below.");
    println!();

    let client_id: String = Input::new()
        .with_prompt("Client ID (SPOTIFY_CLIENT_ID)")
        .interact_text()
        .context("Failed to read SPOTIFY_CLIENT_ID")?;

    let client_secret: String = Password::new()
        .with_prompt("Client secret (SPOTIFY_CLIENT_SECRET)")
        .interact()
        .context("Failed to read SPOTIFY_CLIENT_SECRET")?;

    if client_id.trim().is_empty() || client_secret.is_empty() {
        anyhow::bail!("Client ID and client secret cannot be empty");
    }

    let server_port: String = Input::new()
        .with_prompt("Server port")
        .default("5001".to_string())
        .interact_text()
        .context("Failed to read server port")?;

    let config = InteractiveConfig {
        client_id: client_id.trim().to_string(),
        client_secret,
        server_port,
    };

    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!("Configuration saved to .env file");
    }

    println!();
    Ok(config)
}

/// Save configuration to .env file
fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# Spotify auth relay configuration
# Generated by interactive setup

# Spotify application credentials (required)
SPOTIFY_CLIENT_ID={}
SPOTIFY_CLIENT_SECRET={}

# Server settings
SERVER_HOST=0.0.0.0
SERVER_PORT={}

# development uses http://127.0.0.1:5173/auth/callback
# production requires PRODUCTION_REDIRECT_URI
APP_ENV=development

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info
"#,
        config.client_id, config.client_secret, config.server_port,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
