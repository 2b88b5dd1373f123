//! Imaging Triage Job Tracker
//!
//! This library submits medical images to a remote AI inference service,
//! tracks each analysis job through polling until it completes, fails or
//! times out, turns completed results into prioritized case records, and
//! raises notifications when a job reaches a terminal state.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
