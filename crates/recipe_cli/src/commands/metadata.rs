//! Metadata command - Show the parameters a recipe accepts.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{interrupt_cancellation, load_options, print_json, Cli};

#[derive(Args)]
pub struct MetadataArgs {
    /// Execution options file (YAML)
    #[arg(short, long)]
    options: PathBuf,

    /// Only list required parameters
    #[arg(long)]
    required_only: bool,
}

pub async fn execute(cli: &Cli, args: &MetadataArgs) -> Result<()> {
    let options = load_options(&args.options)?;

    let mut parameters = cli
        .driver()?
        .get_metadata(options, &interrupt_cancellation())
        .await?;

    if args.required_only {
        parameters.retain(|_, p| p.required);
    }
    print_json(&parameters)
}
