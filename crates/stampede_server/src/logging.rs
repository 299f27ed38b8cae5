// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide log subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the process-wide `tracing` subscriber.
///
/// `filter` uses `EnvFilter` directive syntax, e.g. `info,stampede=debug`.
///
/// # Errors
///
/// Returns an error if `filter` does not parse or a global subscriber is already set.
pub fn init(filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}
