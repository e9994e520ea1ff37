//! Image Resize Pipeline
//!
//! This library provides the ingress handler that stores uploaded originals
//! and enqueues resize jobs, and the queue-driven worker that produces resized
//! JPEG derivatives with retry and dead-letter handling.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
