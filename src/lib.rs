// Core layer - shared types and configuration
pub mod config;
pub mod error;

// Stat engine
pub mod database;
pub mod dispatcher;
pub mod leaderboard;
pub mod metrics;
pub mod scope;
pub mod workflow;

// UI components
pub mod message_components;

// Application layer
pub mod command_handler;
pub mod commands;

pub use config::Config;
pub use database::Database;
pub use dispatcher::Dispatcher;
pub use error::{StatError, StatResult};
pub use workflow::WorkflowManager;
