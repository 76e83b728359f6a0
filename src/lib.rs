// Spotify auth relay - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
