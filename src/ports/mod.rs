//! Port traits at the boundary of the domain.

pub mod chart_port;
pub mod config_port;
pub mod data_port;
pub mod llm_port;
pub mod output_port;
pub mod query_port;
