pub mod activity;
pub mod agents;
pub mod cli;
pub mod communication;
pub mod config;
pub mod context;
pub mod error;
pub mod handoff;
pub mod llm;
pub mod memory;
pub mod parallel;
pub mod provider;
pub mod registry;
pub mod service;
pub mod session;
pub mod state;
