pub mod claude;
pub mod engine;
pub mod graph;
pub mod nodes;
pub mod payload;
pub mod prompt;
pub mod proposer;
pub mod state;
pub mod tools;
