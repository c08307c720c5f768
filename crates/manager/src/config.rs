// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

/// Manager gateway for warren actors.
#[derive(Debug, Clone, Parser)]
#[command(name = "warrenmgr", version, about)]
pub struct ManagerConfig {
    /// Host address to bind to.
    #[arg(long, env = "WARRENMGR_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "WARRENMGR_PORT", default_value = "6420")]
    pub port: u16,

    /// Bearer token for API authentication (unset = open).
    #[arg(long, env = "WARRENMGR_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Base URL of the remote runner to proxy to (e.g.
    /// "http://10.0.0.4:6421"). Unset = inline mode (embedding
    /// applications provide the runner).
    #[arg(long, env = "WARRENMGR_RUNNER_URL")]
    pub runner_url: Option<String>,

    /// Serverless mode: enables `GET /start` worker registration.
    #[arg(long, env = "WARRENMGR_SERVERLESS")]
    pub serverless: bool,

    /// Always close proxied client WebSockets with code 1000 after the
    /// upstream closes (works around Cloudflare's close-code handling).
    #[arg(long, env = "WARRENMGR_CLOUDFLARE_COMPAT")]
    pub cloudflare_compat: bool,

    /// Endpoint advertised to clients in `/metadata` (unset = omitted).
    #[arg(long, env = "WARRENMGR_CLIENT_ENDPOINT")]
    pub client_endpoint: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "WARRENMGR_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WARRENMGR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ManagerConfig {
    /// Validate the configuration after parsing. The standalone binary is
    /// proxy-only: inline mode requires an embedding application to supply
    /// actor definitions.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_url.is_none() {
            anyhow::bail!("--runner-url must be specified (the binary runs in proxy mode)");
        }
        if let Some(url) = &self.runner_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("--runner-url must be an http(s) URL");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
