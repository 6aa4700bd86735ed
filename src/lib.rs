// HTTP APIs: route table, authentication gates, handlers
pub mod api;

// Session identity asserted by the hosting runtime
pub mod auth;

// Event and user-action seams to the outer subsystems
pub mod collaborators;

// Configuration loading and atomic snapshots
pub mod config;

// Encrypted per-user token storage
pub mod credentials;

// Webhook signature verification
pub mod webhook;
