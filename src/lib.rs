//! entity_db: generic multi-tenant record store over HTTP
//!
//! Named collections of schema-less JSON records with uniform
//! list/get/filter/create/update/delete, bearer-token authentication with
//! role checks, and a pass-through gateway to an OpenAI-compatible
//! text-generation service.
//!
//! All state is in memory and lives for the process lifetime.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod gate;
// Content generation gateway (reqwest client behind a trait seam)
pub mod generation;
pub mod models;
// REST API module: Axum HTTP handlers and router state
pub mod rest;
pub mod storage;
