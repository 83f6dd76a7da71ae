//! Delete command - Destroy a deployed recipe.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tracing::info;

use super::{interrupt_cancellation, load_options, print_json, Cli};

#[derive(Args)]
pub struct DeleteArgs {
    /// Execution options file (YAML)
    #[arg(short, long)]
    options: PathBuf,
}

pub async fn execute(cli: &Cli, args: &DeleteArgs) -> Result<()> {
    let options = load_options(&args.options)?;
    let resource_id = options.resource_id().to_string();
    info!("Deleting recipe {} for {}", options.recipe_name(), resource_id);

    let destroyed = cli
        .driver()?
        .delete(options, &interrupt_cancellation())
        .await?;

    if !destroyed {
        info!("No state found for {}, nothing was destroyed", resource_id);
    }
    print_json(&json!({ "resourceId": resource_id, "destroyed": destroyed }))
}
