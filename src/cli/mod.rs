//! Command-line interface.
//!
//! Without a subcommand the binary runs the server. The subcommands talk to a
//! running server through [`ApiClient`]:
//! - `status` - Server health and airport count
//! - `airports` - Search airports and print a table
//! - `metar <ICAO...>` - Latest observations for stations
//! - `decode <raw>` - Decode a METAR locally and print it as JSON
//! - `import <file>` - Upload a JSON array of airports
//! - `config check` - Validate the configuration file

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::client::{ApiClient, ClientError};
use crate::config::Config;
use crate::db::{Airport, AirportQuery};
use crate::weather::Metar;

#[derive(Parser, Debug)]
#[command(name = "aviation")]
#[command(author, version, about = "Airport and METAR map service", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "aviation.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// API URL to connect to
    #[arg(long, env = "AVIATION_API_URL", default_value = "http://localhost:5000")]
    pub api_url: String,

    /// Session token for authenticated commands
    #[arg(long, env = "AVIATION_TOKEN")]
    pub token: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show server health and airport count
    Status,

    /// Search airports
    Airports {
        /// Bounding box as ne_lat,ne_lon,sw_lat,sw_lon
        #[arg(long)]
        bounds: Option<String>,
        /// Comma separated categories (e.g. large_airport,heliport)
        #[arg(long)]
        categories: Option<String>,
        /// Name or ICAO fragment
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long, default_value = "1")]
        page: u32,
        /// Include the latest METAR flight category
        #[arg(long)]
        metars: bool,
    },

    /// Latest METARs for one or more stations
    Metar {
        #[arg(required = true)]
        icaos: Vec<String>,
        /// Print decoded JSON instead of raw reports
        #[arg(long)]
        json: bool,
    },

    /// Decode a raw METAR without contacting the server
    Decode {
        #[arg(required = true, num_args = 1..)]
        raw: Vec<String>,
    },

    /// Import airports from a JSON file (admin)
    Import { file: PathBuf },

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Run a CLI command
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Status) => cmd_status(cli).await,
        Some(Commands::Airports {
            bounds,
            categories,
            name,
            limit,
            page,
            metars,
        }) => {
            let query = AirportQuery {
                bounds: bounds.clone(),
                categories: categories.clone(),
                name: name.clone(),
                limit: Some(*limit),
                page: Some(*page),
                metars: metars.then_some(true),
                ..AirportQuery::default()
            };
            cmd_airports(cli, &query).await
        }
        Some(Commands::Metar { icaos, json }) => cmd_metar(cli, icaos, *json).await,
        Some(Commands::Decode { raw }) => cmd_decode(&raw.join(" ")),
        Some(Commands::Import { file }) => cmd_import(cli, file).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(&cli.config),
        None => {
            // No subcommand means start the server - this is handled in main.rs
            Ok(())
        }
    }
}

fn create_client(cli: &Cli) -> Result<ApiClient> {
    let client = ApiClient::new(&cli.api_url).context("Failed to create HTTP client")?;
    Ok(match &cli.token {
        Some(token) => client.with_token(token),
        None => client,
    })
}

/// Friendlier wording for the errors a user can act on.
fn explain(error: ClientError) -> anyhow::Error {
    match error {
        ClientError::Api { status: 401, .. } => anyhow::anyhow!(
            "Authentication required. Use --token or set AVIATION_TOKEN environment variable."
        ),
        ClientError::Api { status: 403, .. } => {
            anyhow::anyhow!("This command requires an administrator account.")
        }
        ClientError::Transport(e) => {
            anyhow::Error::new(e).context("Failed to connect to server. Is aviation running?")
        }
        other => anyhow::Error::new(other),
    }
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let client = create_client(cli)?;
    println!("Connecting to {}...", client.base_url());

    let health = client.health().await.map_err(explain)?;
    let airports = client
        .airports(&AirportQuery {
            limit: Some(1),
            ..AirportQuery::default()
        })
        .await
        .ok();

    println!();
    println!("=== Aviation Server Status ===");
    println!();
    let healthy = health.trim() == "OK";
    println!(
        "Status:     {} {}",
        if healthy { "[OK]" } else { "[!!]" },
        if healthy { "Healthy" } else { health.trim() }
    );
    match airports {
        Some(page) => println!("Airports:   {}", page.meta.total),
        None => println!("Airports:   unavailable"),
    }
    println!();
    Ok(())
}

async fn cmd_airports(cli: &Cli, query: &AirportQuery) -> Result<()> {
    let client = create_client(cli)?;
    let page = client.airports(query).await.map_err(explain)?;

    if page.data.is_empty() {
        println!("No airports found.");
        return Ok(());
    }

    println!();
    print!("{}", airport_table(&page.data));
    println!();
    println!(
        "Page {} of {} ({} airports)",
        page.meta.page,
        total_pages(page.meta.total, page.meta.limit),
        page.meta.total
    );
    println!();
    Ok(())
}

fn airport_table(airports: &[Airport]) -> String {
    let mut out = format!(
        "{:<6}  {:<40}  {:<15}  {:<8}  {:>9}  {:>10}  {:<5}\n",
        "ICAO", "NAME", "TYPE", "REGION", "LAT", "LON", "CAT"
    );
    out.push_str(&"-".repeat(105));
    out.push('\n');

    for airport in airports {
        let category = airport
            .latest_metar
            .as_ref()
            .map(|m| m.flight_category.as_str())
            .unwrap_or("-");
        out.push_str(&format!(
            "{:<6}  {:<40}  {:<15}  {:<8}  {:>9.4}  {:>10.4}  {:<5}\n",
            airport.icao,
            truncate(&airport.name, 40),
            airport.category.as_str(),
            airport.iso_region,
            airport.latitude,
            airport.longitude,
            category
        ));
    }
    out
}

fn total_pages(total: i64, limit: u32) -> i64 {
    if total <= 0 || limit == 0 {
        return 1;
    }
    (total + limit as i64 - 1) / limit as i64
}

async fn cmd_metar(cli: &Cli, icaos: &[String], json: bool) -> Result<()> {
    let client = create_client(cli)?;
    let metars = client.metars(icaos).await.map_err(explain)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metars)?);
        return Ok(());
    }

    if metars.is_empty() {
        println!("No observations available.");
        return Ok(());
    }
    for metar in &metars {
        println!("{}", metar_summary(metar));
    }
    Ok(())
}

fn metar_summary(metar: &Metar) -> String {
    format!(
        "[{:<4}] {}",
        metar.flight_category.as_str(),
        metar.raw_text
    )
}

fn cmd_decode(raw: &str) -> Result<()> {
    let metar = Metar::parse(raw, Utc::now()).context("Failed to decode METAR")?;
    println!("{}", serde_json::to_string_pretty(&metar)?);
    Ok(())
}

async fn cmd_import(cli: &Cli, file: &Path) -> Result<()> {
    let contents = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    // Catch malformed files before uploading them
    let airports: Vec<Airport> = serde_json::from_slice(&contents)
        .with_context(|| format!("{} is not a JSON array of airports", file.display()))?;
    println!("Importing {} airports from {}...", airports.len(), file.display());

    let client = create_client(cli)?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "airports.json".to_string());
    let imported = client
        .import_airports_file(&file_name, contents)
        .await
        .map_err(explain)?;

    println!("[OK] Imported {} airports", imported);
    Ok(())
}

fn cmd_config_check(config_path: &Path) -> Result<()> {
    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        println!("To create a custom configuration, copy aviation.example.toml to aviation.toml");
        return Ok(());
    }

    let config = match Config::load(config_path).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            anyhow::bail!("Invalid configuration file");
        }
    };

    println!("[OK] Configuration file is valid!");
    println!();
    println!("Server:");
    println!("  Listen:       {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!();
    println!("Weather:");
    println!("  Upstream:     {}", config.weather.base_url);
    println!("  Stale After:  {}s", config.weather.stale_after_seconds);
    println!(
        "  Refresh:      {}",
        if config.refresh.enabled {
            "Enabled"
        } else {
            "Disabled"
        }
    );
    println!(
        "  Rate Limit:   {}",
        if config.rate_limit.enabled {
            "Enabled"
        } else {
            "Disabled"
        }
    );
    println!();

    let warnings = config_warnings(&config);
    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  [!] {}", warning);
        }
        println!();
    }
    Ok(())
}

fn config_warnings(config: &Config) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.auth.admin_email.is_none() {
        warnings.push("No admin account configured - airport data cannot be edited");
    }
    if !config.auth.secure_cookies && config.server.host != "127.0.0.1" {
        warnings.push("Session cookies are not marked Secure - enable auth.secure_cookies behind HTTPS");
    }
    if config.server.cors_origins.is_empty() {
        warnings.push("No CORS origins configured - any origin may send credentialed requests");
    }
    warnings
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
