//! Classification-and-migration core.

pub mod class;
pub mod config;
pub mod controller;
pub mod histogram;
pub mod migrate;
pub mod selector;
pub mod threshold;
