//! Deploy command - Apply a recipe and print its output.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{interrupt_cancellation, load_options, print_json, Cli};

#[derive(Args)]
pub struct DeployArgs {
    /// Execution options file (YAML)
    #[arg(short, long)]
    options: PathBuf,
}

pub async fn execute(cli: &Cli, args: &DeployArgs) -> Result<()> {
    let options = load_options(&args.options)?;
    info!(
        "Deploying recipe {} for {}",
        options.recipe_name(),
        options.resource_id()
    );

    let output = cli
        .driver()?
        .execute(options, &interrupt_cancellation())
        .await?;

    print_json(&output)
}
