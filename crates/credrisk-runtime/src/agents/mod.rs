//! Business-analysis branch agents.
//!
//! Each agent turns one slice of the request into a typed report through a
//! single dispatcher call. The pipeline runs all three concurrently.

mod behavioral;
mod financial;
mod reputational;
mod traits;

pub use behavioral::BehavioralAgent;
pub use financial::FinancialAgent;
pub use reputational::ReputationalAgent;
pub use traits::BranchAgent;
