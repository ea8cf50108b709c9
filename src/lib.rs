pub mod config;
pub mod contracts;
pub mod db;
pub mod health;
pub mod monitor;
pub mod outbox_relay;
pub mod processor;
pub mod repos;
pub mod retry;
pub mod routes;
pub mod services;
pub mod workers;

pub use monitor::start_instance_monitor;
pub use outbox_relay::start_link_relay;
