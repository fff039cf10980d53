//! rollcall-client — HTTP client for the roster backend.
//!
//! Implements the workflow's [`Identifier`](rollcall_core::Identifier) and
//! [`AttendanceMarker`](rollcall_core::AttendanceMarker) seams, plus the
//! enrollment and roster calls used by operator tooling.

mod client;
pub mod wire;

pub use client::{ClientError, IdentifyScope, RosterClient};
pub use wire::{EnrollRequest, RosterEntry};
