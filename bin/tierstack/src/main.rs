//! tierstack assembles the deployment topology of a two-tier web application
//! from a single TOML definition.

mod cli;
mod report;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, OutputFormat};
use tierstack_topology::{StackAssembler, TopologyDocument};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.load_stack_config()?;
    let parameters = cli.load_parameters()?;
    let inventory = cli.load_inventory()?;

    let assembly = StackAssembler::new(&parameters, &inventory)
        .assemble(&config)
        .await
        .context(format!("Failed to assemble topology for {}", config.app_name))?;

    let document = TopologyDocument::new(&assembly.topology)?;

    match cli.format {
        OutputFormat::Table => {
            println!("{}", report::resource_table(&document));
            if let Some(pipeline) = assembly.topology.pipeline() {
                println!("{}", report::pipeline_summary(pipeline)?);
            }
            for warning in &assembly.warnings {
                println!("warning: {warning}");
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&document)
                .context("Failed to serialize topology document")?;
            println!("{json}");
        }
    }

    if let Some(output) = &cli.output {
        document.save_to_file(output)?;
    }

    Ok(())
}
