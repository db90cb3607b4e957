pub mod agent;
pub mod config;
pub mod error;
pub mod sandbox;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
