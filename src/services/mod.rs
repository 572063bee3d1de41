//! Core identifier, storage and catalog services.

pub mod catalog;
pub mod content_store;
pub mod error;
pub mod identifier;
pub mod image_service;
pub mod visitor_log;

#[cfg(test)]
pub mod testing;
