//! # JogKit
//!
//! A host-side streaming console for firmware motor driver boards:
//! - LF-framed serial line transport with soft-timeout polling
//! - Background reader loop and wait-for-line correlator
//! - Single-writer send gate for all outbound traffic
//! - Self-paced oscillating jog loop driven by physical motion parameters
//!
//! ## Architecture
//!
//! JogKit is organized as a workspace:
//!
//! 1. **jogkit-core** - Error taxonomy, console listener contract, shutdown primitive
//! 2. **jogkit-link** - Transport, reader loop, send gate, correlator, pacer
//! 3. **jogkit** - This binary: configuration, logging, and the command REPL

pub mod config;

pub use config::{AppConfig, ConnectionSettings};

pub use jogkit_core::{
    ConsoleListener, ConsoleListenerHandle, Error, LinkError, PacerError, Result,
};

pub use jogkit_link::{
    list_ports, DeviceController, LinkParams, LinkPortInfo, PacerConfig, SerialLink,
};

/// Initialize tracing with an env-filter, INFO by default
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
