//! Shared data model for the xray-guard concurrent-IP enforcer.
//!
//! This crate groups the strongly-typed values passed between the panel
//! client, the log stream subscriber, the violation detector, and the
//! limit resolver. It provides:
//!
//! * [`node`] — the `Node` record describing a single Xray proxy worker.
//! * [`panel`] — the panel session and wire DTOs exchanged with the
//!   control panel's HTTP API.
//! * [`observation`] — [`observation::UserObservation`], a single parsed
//!   log line lifted to a typed record.
//! * [`limit`] — [`limit::UserLimit`], the resolved per-user IP limit.

pub mod limit;
pub mod node;
pub mod observation;
pub mod panel;

pub use limit::UserLimit;
pub use node::{Node, NodeDto, NodeListResponse};
pub use observation::UserObservation;
pub use panel::{PanelSession, PanelType, TokenRequest, TokenResponse, UserRecord};
