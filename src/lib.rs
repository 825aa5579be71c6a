//! StudentBazaar: a campus marketplace where students list, sell and rent
//! products, chat with buyers, and check out with several payment methods,
//! overseen by an admin back office.

pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod logging;
pub mod metrics;
pub mod services;
pub mod storage;
pub mod web;

pub use error::{BazaarError, Result};
