// Library surface shared by the `relay-server` and `worker` binaries.
pub mod collaborators;
pub mod config;
pub mod data_model;
pub mod error;
pub mod executor;
pub mod messaging;
pub mod notifications;
pub mod path_strategy;
pub mod services;
pub mod utils;

pub mod server;
pub mod worker_logic;

pub use error::{RelayError, Result};
