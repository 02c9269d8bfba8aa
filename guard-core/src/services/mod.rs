//! The eight components (C1-C8) that make up the enforcement pipeline.

pub mod active_users;
pub mod ban_dispatcher;
pub mod check_service;
pub mod fleet_supervisor;
pub mod limit_resolver;
pub mod log_queue;
pub mod log_stream;
pub mod panel_client;
