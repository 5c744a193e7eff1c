//! Adventurer registration against the guild backend.
//!
//! This module provides:
//! - `RegistrationClient`: posts the registration form and reports where to go next
//! - `LocalStorage`: a small persistent key-value store for page-local values
//!
//! On success the adventurer name is saved under `aventureiroNome` so the
//! next page can greet the adventurer.

pub mod client;
pub mod local;

pub use client::{Registered, RegistrationClient, RegistrationError};
pub use local::LocalStorage;
