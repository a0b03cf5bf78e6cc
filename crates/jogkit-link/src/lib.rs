//! # JogKit Link
//!
//! The transport and pacing core for JogKit:
//! - LF-framed line transport over a serial byte channel with a
//!   soft-timeout read discipline
//! - A background reader loop feeding an inbox of received lines
//! - A single-writer send gate serializing all outbound traffic
//! - A wait-for-line correlator with caller deadlines
//! - The self-paced oscillating jog loop
//!
//! The wire protocol is opaque ASCII text lines; nothing here interprets
//! G-code or negotiates firmware capabilities.

pub mod controller;
pub mod inbox;
pub mod pacer;
pub mod ports;
pub mod transport;

pub use controller::{DeviceController, SEND_DEADLINE};
pub use inbox::{Inbox, INBOX_CAPACITY};
pub use pacer::{move_duration_ms, pace_delay_ms, PacerConfig};
pub use ports::{list_ports, LinkPortInfo};
pub use transport::{LinkParams, LinkPort, SerialLink, BAUD_RATE, MAX_LINE_LEN};
