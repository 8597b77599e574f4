pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod orchestration;
pub mod provider;
pub mod registry;
pub mod safety;
pub mod tools;
