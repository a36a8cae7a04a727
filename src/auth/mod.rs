//! Google zkLogin authentication bridge
//!
//! Orchestrates the Google authorization-code popup flow, exchanges the
//! code at the backend for an identity token, derives a deterministic
//! wallet address from the token and a per-user salt, and persists the
//! resulting session.

pub mod http_client;
pub mod jwt;
pub mod manager;
pub mod provider;
pub mod storage;
pub mod types;
pub mod zklogin;
