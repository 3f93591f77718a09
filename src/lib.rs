pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod matcher;
pub mod model;
pub mod namer;
pub mod notification;
pub mod orchestrator;
pub mod retry;
