//! # recipe_runner
//!
//! External process execution for the recipe engine.
//!
//! Every tool the engine drives (the IaC binary itself, `kubectl` for the
//! state backend) is launched through the [`CommandRunner`] trait, so the
//! orchestration layers can be exercised against [`MockRunner`] without
//! spawning anything.
//!
//! # Features
//!
//! - **Explicit environments**: a [`CommandSpec`] can run with a cleared
//!   environment, receiving only the variables the caller composed
//! - **Timeouts**: child processes are killed when the deadline passes
//! - **Mock Runner**: scripted responses keyed by subcommand, with captured calls
//!
//! # Example
//!
//! ```rust,no_run
//! use recipe_runner::{CommandRunner, CommandSpec, ProcessRunner, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::new();
//!
//!     let spec = CommandSpec::new("terraform")
//!         .arg("version")
//!         .workdir("/tmp/recipe")
//!         .isolated_env()
//!         .env("PATH", "/usr/bin:/bin");
//!
//!     let result = runner.run(&spec, &RunConfig::default().timeout(30)).await?;
//!     println!("Exit code: {}", result.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod mock;
pub mod process;
pub mod runner;

pub use config::{CommandSpec, RunConfig};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use process::ProcessRunner;
pub use runner::{CommandResult, CommandRunner};
