//! Core of the collaborative notes service

pub mod auth;
pub mod collab;
pub mod config;
pub mod db;
#[cfg(test)]
mod tests;
