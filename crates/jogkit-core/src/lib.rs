//! # JogKit Core
//!
//! Core types, errors, and task primitives for JogKit.
//! Provides the error taxonomy shared by the link and front-end crates,
//! the console-sink listener contract, and the cooperative shutdown
//! primitive used by the long-lived link loops.

pub mod console;
pub mod error;
pub mod shutdown;

pub use console::{ConsoleListener, ConsoleListenerHandle};
pub use error::{Error, LinkError, PacerError, Result};
pub use shutdown::{shutdown_pair, ShutdownSignal, ShutdownToken};
