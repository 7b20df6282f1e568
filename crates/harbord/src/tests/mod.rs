//! Test suites for the harbor daemon.

pub(crate) mod support;
