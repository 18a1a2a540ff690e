//! storekit-token - issue App Store Server API credentials and verify signed payloads

use std::io::{self, Read};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use storekit_jws::{CredentialIssuer, IssuerConfig, JwsVerifier, VerifiedClaims};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// App Store JWS tooling
#[derive(Parser)]
#[command(name = "storekit-token", version, about)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a credential using STOREKIT_* environment variables
    Issue,

    /// Verify a signed payload against the Apple root
    Verify {
        /// Signed payload (read from stdin when omitted)
        token: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storekit=info"));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only command output
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn issue() -> Result<()> {
    let config = IssuerConfig::from_env().context("failed to load issuer configuration")?;
    let issuer = CredentialIssuer::new(config).context("failed to load signing key")?;
    let credential = issuer.get().context("failed to sign credential")?;

    println!("{}", credential.token());
    eprintln!("expires at {}", credential.expires_at().to_rfc3339());
    Ok(())
}

fn verify(token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read signed payload from stdin")?;
            buf
        }
    };

    let verifier = JwsVerifier::new().context("failed to load trust anchor")?;
    let verified: VerifiedClaims<serde_json::Value> = verifier
        .verify(token.trim())
        .context("signed payload rejected")?;

    println!("{}", serde_json::to_string_pretty(&verified)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Issue => issue(),
        Commands::Verify { token } => verify(token),
    }
}
