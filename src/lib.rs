pub mod api_connection;
pub mod cli;
pub mod config;
pub mod error;
pub mod nutrients;
pub mod optim;
pub mod recipe;
pub mod recipe_aggregator;
pub mod recipe_io;
