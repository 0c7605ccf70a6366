//! Kotoscan - scan images of Japanese text and annotate selected spans.
//!
//! Upload an image, let the vision model extract the text in a detached
//! background job, then ask for explanations of selected spans. Scans
//! move through a small status lifecycle that clients poll.

pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod repository;
pub mod schema;
pub mod server;
pub mod services;
pub mod storage;
