//! Collab Notes - real-time collaborative note editing
//!
//! A WebSocket coordinator that lets several users view a note at once
//! while a single edit lock decides who may change it.

pub mod core;
