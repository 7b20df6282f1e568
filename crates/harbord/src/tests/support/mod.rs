//! Shared fixtures for the daemon test suites.

mod config;
mod launch_world;

pub(crate) use config::{ConfigFixture, quiet_config, quiet_context};
pub(crate) use launch_world::{LaunchWorld, wait_for, world};
