//! Settlement Service - VisaNet / FAC settlement reconciliation.

pub mod config;
pub mod error;
pub mod extraction;
pub mod handlers;
pub mod matching;
pub mod models;
pub mod orchestrator;
pub mod reports;
pub mod services;
pub mod startup;
pub mod workers;
