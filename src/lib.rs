// Secret encryption at rest
pub mod crypto;

// SQLite persistence
pub mod store;

// Provider capability table
pub mod provider;

// OAuth authorization flow
pub mod oauth;

// Access-token vending and refresh
pub mod broker;

// Push-subscription lifecycle
pub mod subscription;

// Webhook notification ingestion
pub mod webhook;

// Background event processing
pub mod worker;

// HTTP APIs
pub mod api;

// Request authentication helpers
pub mod auth;

// Configuration
pub mod config;

// Error taxonomy
pub mod error;
