//! Core data models for the image hosting service.
//!
//! These entities represent catalog records and recorded views.
//! They map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod image;
pub mod visitor;
