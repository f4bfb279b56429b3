//! CLI entry point for langchef-auth.

pub mod auth;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::auth::{AuthController, ManualEntry, SystemBrowser, VerificationOpener};
use crate::config::AuthConfig;
use crate::error::Result;

/// LangChef sign-in helper
#[derive(Parser, Debug)]
#[command(
    name = "langchef-auth",
    version,
    about = "Sign in to LangChef with AWS SSO"
)]
pub struct Cli {
    /// LangChef API base URL (overrides LANGCHEF_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Credential profile (overrides LANGCHEF_AUTH_PROFILE)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in with the device-code flow
    Login(LoginArgs),
    /// Show authentication status
    Status,
    /// Fetch the signed-in user's profile
    Whoami,
    /// Renew the session now
    Refresh,
    /// Sign out and revoke the session
    Logout,
}

/// Arguments for `langchef-auth login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Print the verification URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Use the AWS credentials configured on the server instead of SSO
    #[arg(long)]
    pub aws_credentials: bool,
}

impl Cli {
    /// Layer command-line overrides on top of file and environment config.
    pub fn config(&self) -> Result<AuthConfig> {
        let mut config = AuthConfig::load()?;
        if let Some(url) = &self.api_url {
            config = config.with_api_base_url(url.clone());
        }
        if let Some(profile) = &self.profile {
            config = config.with_profile(profile.clone());
        }
        Ok(config)
    }

    /// Controller for this invocation; `login` opens the system browser
    /// unless `--no-browser` was given.
    pub fn controller(&self) -> Result<AuthController> {
        let opener: Arc<dyn VerificationOpener> = match &self.command {
            Commands::Login(args) if !args.no_browser => Arc::new(SystemBrowser),
            _ => Arc::new(ManualEntry),
        };
        Ok(AuthController::from_config(self.config()?)?
            .with_opener(opener)
            .build())
    }
}
