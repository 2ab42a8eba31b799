//! Pipeline tests over in-memory and on-disk Unicorn trees.

mod config;
mod driver;
mod e2e;
mod fixture;
mod properties;
