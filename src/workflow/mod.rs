pub mod repair;
pub mod types;

pub use repair::run_repair;
pub use types::RunReport;
