//! Concrete adapter implementations for ports.

#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
#[cfg(feature = "openai")]
pub mod openai_llm_adapter;
#[cfg(feature = "png")]
pub mod png_chart_adapter;
pub mod chart_overlay;
pub mod csv_adapter;
pub mod file_config_adapter;
pub mod file_output_adapter;
pub mod svg_chart_adapter;
