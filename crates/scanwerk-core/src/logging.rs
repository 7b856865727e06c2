// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Logging bootstrap for applications embedding Scanwerk.

use tracing_subscriber::EnvFilter;

use crate::config::ClientConfig;
use crate::error::{Result, ScanwerkError};

/// Build the `EnvFilter` for a configuration.
///
/// `RUST_LOG` wins over `log_filter`; the debug switches always add their
/// directives on top.
pub fn env_filter(config: &ClientConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ScanwerkError::Config(format!("log filter '{}': {e}", config.log_filter)))?;

    if config.debug_engine {
        filter = filter.add_directive(parse_directive("scanwerk_engine=trace")?);
    }
    if config.debug_calls {
        filter = filter.add_directive(parse_directive("scanwerk_engine::handle=debug")?);
    }
    Ok(filter)
}

/// Install a global fmt subscriber.
///
/// Fails with `Config` if a global subscriber is already installed.
pub fn init_logging(config: &ClientConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config)?)
        .try_init()
        .map_err(|e| ScanwerkError::Config(format!("logging already initialised: {e}")))
}

fn parse_directive(directive: &str) -> Result<tracing_subscriber::filter::Directive> {
    directive
        .parse()
        .map_err(|e| ScanwerkError::Config(format!("log directive '{directive}': {e}")))
}
