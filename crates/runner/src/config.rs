// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use crate::definition::ActorOptions;

/// Runner process configuration.
///
/// Embedding applications parse this (flags or `WARREN_*` env vars) and
/// hand it to [`spawn_server`](crate::transport::spawn_server); the
/// timeout and limit fields become the process-wide [`ActorOptions`]
/// defaults, overridable per definition.
#[derive(Debug, Clone, Parser)]
#[command(name = "warren", version, about = "Stateful-actor runtime runner.")]
pub struct RunnerConfig {
    /// Host address to bind to.
    #[arg(long, env = "WARREN_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// TCP port (0 = OS-assigned).
    #[arg(long, env = "WARREN_PORT", default_value = "0")]
    pub port: u16,

    /// Timeout for the `create_vars` hook, in milliseconds.
    #[arg(long, env = "WARREN_CREATE_VARS_TIMEOUT_MS", default_value = "5000")]
    pub create_vars_timeout_ms: u64,

    /// Timeout for the `create_conn_state` hook, in milliseconds.
    #[arg(long, env = "WARREN_CREATE_CONN_STATE_TIMEOUT_MS", default_value = "5000")]
    pub create_conn_state_timeout_ms: u64,

    /// Timeout for the `on_before_connect`/`on_connect` hooks, in
    /// milliseconds.
    #[arg(long, env = "WARREN_ON_CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub on_connect_timeout_ms: u64,

    /// Timeout for the `on_stop` hook, in milliseconds.
    #[arg(long, env = "WARREN_ON_STOP_TIMEOUT_MS", default_value = "5000")]
    pub on_stop_timeout_ms: u64,

    /// Deadline for one action handler, in milliseconds.
    #[arg(long, env = "WARREN_ACTION_TIMEOUT_MS", default_value = "60000")]
    pub action_timeout_ms: u64,

    /// Drain window for `wait_until` background futures at stop, in
    /// milliseconds.
    #[arg(long, env = "WARREN_WAIT_UNTIL_TIMEOUT_MS", default_value = "15000")]
    pub wait_until_timeout_ms: u64,

    /// How long a socketless connection may linger before the liveness
    /// sweep reaps it, in milliseconds.
    #[arg(long, env = "WARREN_CONNECTION_LIVENESS_TIMEOUT_MS", default_value = "2500")]
    pub connection_liveness_timeout_ms: u64,

    /// How often the liveness sweep runs, in milliseconds.
    #[arg(long, env = "WARREN_CONNECTION_LIVENESS_INTERVAL_MS", default_value = "5000")]
    pub connection_liveness_interval_ms: u64,

    /// Idle window before an actor goes to sleep, in milliseconds.
    #[arg(long, env = "WARREN_SLEEP_TIMEOUT_MS", default_value = "30000")]
    pub sleep_timeout_ms: u64,

    /// Debounce interval of the throttled state writer, in milliseconds.
    #[arg(long, env = "WARREN_STATE_SAVE_INTERVAL_MS", default_value = "10000")]
    pub state_save_interval_ms: u64,

    /// Maximum size of connection params, in bytes.
    #[arg(long, env = "WARREN_MAX_CONNECTION_PARAMS_SIZE", default_value = "4096")]
    pub max_connection_params_size: usize,

    /// Maximum size of one incoming message, in bytes.
    #[arg(long, env = "WARREN_MAX_INCOMING_MESSAGE_SIZE", default_value = "65536")]
    pub max_incoming_message_size: usize,

    /// Disable sleeping entirely; actors stay loaded while the process
    /// runs.
    #[arg(long, env = "WARREN_NO_SLEEP")]
    pub no_sleep: bool,

    /// Send internal error messages to clients unredacted.
    #[arg(long, env = "WARREN_EXPOSE_INTERNAL_ERROR")]
    pub expose_internal_error: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::parse_from(["warren"])
    }
}

impl RunnerConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("--host must not be empty");
        }
        for (name, value) in [
            ("--create-vars-timeout-ms", self.create_vars_timeout_ms),
            ("--create-conn-state-timeout-ms", self.create_conn_state_timeout_ms),
            ("--on-connect-timeout-ms", self.on_connect_timeout_ms),
            ("--on-stop-timeout-ms", self.on_stop_timeout_ms),
            ("--action-timeout-ms", self.action_timeout_ms),
            ("--wait-until-timeout-ms", self.wait_until_timeout_ms),
            ("--connection-liveness-timeout-ms", self.connection_liveness_timeout_ms),
            ("--connection-liveness-interval-ms", self.connection_liveness_interval_ms),
            ("--sleep-timeout-ms", self.sleep_timeout_ms),
            ("--state-save-interval-ms", self.state_save_interval_ms),
        ] {
            if value == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.max_connection_params_size == 0 {
            anyhow::bail!("--max-connection-params-size must be greater than zero");
        }
        if self.max_incoming_message_size == 0 {
            anyhow::bail!("--max-incoming-message-size must be greater than zero");
        }
        Ok(())
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The process-wide actor option defaults this config describes.
    /// Definitions that set their own [`ActorOptions`] override these.
    pub fn actor_options(&self) -> ActorOptions {
        use std::time::Duration;
        ActorOptions {
            create_vars_timeout: Duration::from_millis(self.create_vars_timeout_ms),
            create_conn_state_timeout: Duration::from_millis(self.create_conn_state_timeout_ms),
            on_connect_timeout: Duration::from_millis(self.on_connect_timeout_ms),
            on_stop_timeout: Duration::from_millis(self.on_stop_timeout_ms),
            action_timeout: Duration::from_millis(self.action_timeout_ms),
            wait_until_timeout: Duration::from_millis(self.wait_until_timeout_ms),
            connection_liveness_timeout: Duration::from_millis(
                self.connection_liveness_timeout_ms,
            ),
            connection_liveness_interval: Duration::from_millis(
                self.connection_liveness_interval_ms,
            ),
            sleep_timeout: Duration::from_millis(self.sleep_timeout_ms),
            state_save_interval: Duration::from_millis(self.state_save_interval_ms),
            max_connection_params_size: self.max_connection_params_size,
            max_incoming_message_size: self.max_incoming_message_size,
            no_sleep: self.no_sleep,
            expose_internal_error: self.expose_internal_error,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
