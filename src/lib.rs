pub mod app;
pub mod auth;
pub mod catalogue;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod store;
pub mod tmdb;
pub mod watchlist;
