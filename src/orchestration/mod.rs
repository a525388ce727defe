//! # Orchestration
//!
//! Ordered, resumable step execution for long multi-stage pipelines.
//!
//! ## Core Components
//!
//! - **Step**: a named stage with a mandatory doc text and a declared handler contract
//! - **StepPipelineRunner**: range selection, timing, fail-fast abort and documentation mode
//! - **Notifier**: injectable status channel, a no-op unless configured
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use geo_pipeline::config::ConfigLoader;
//! use geo_pipeline::database::{DatabaseConnection, PgConnectionFactory};
//! use geo_pipeline::orchestration::{Step, StepPipelineRunner};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! let factory = Arc::new(PgConnectionFactory::new(config.database.clone()));
//! let runner = StepPipelineRunner::from_config(&config, factory);
//!
//! let steps = vec![
//!     Step::with_connection("step_create_schema", "Create the output schema.", |conn: &mut DatabaseConnection| {
//!         conn.create_schema("tza", Some("settlement extents"))?;
//!         Ok(())
//!     }),
//!     Step::with_step_number("step_debug", "Print the step number.", |n| {
//!         println!("at step {n}");
//!         Ok(())
//!     }),
//! ];
//!
//! let (start, stop) = config.run.range();
//! runner.run_or_exit(steps, start, stop);
//! # }
//! ```

pub mod notifier;
pub mod runner;
pub mod step;

pub use notifier::{NoopNotifier, Notifier, TracingNotifier};
pub use runner::{RunOutcome, StepPipelineRunner};
pub use step::{Step, StepHandler};
