// src/lib.rs
pub mod api;
pub mod auth;
pub mod chart;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod stocks;
