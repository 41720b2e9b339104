//! HF Endpoint Stack - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hf_endpoint_stack::{DeployConfig, compose, synth};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hf-endpoint-stack")]
#[command(about = "Compose CloudFormation for HuggingFace SageMaker endpoints", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose the stack and write the template and manifest
    Synth {
        /// Output directory
        #[arg(short, long, default_value = "stack.out")]
        out_dir: PathBuf,

        /// Print the template to stdout instead of writing files
        #[arg(long)]
        stdout: bool,

        /// Override the target region
        #[arg(long)]
        region: Option<String>,

        /// Leave out the API Gateway route
        #[arg(long)]
        no_gateway: bool,
    },
    /// Print the container repository account for a region
    Resolve {
        region: String,
    },
    /// List the region account table
    Regions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for template output
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
    }

    let mut config = DeployConfig::load(cli.config)?;

    match cli.command {
        Command::Synth {
            out_dir,
            stdout,
            region,
            no_gateway,
        } => {
            // CLI overrides
            if let Some(region) = region {
                config.region = region;
            }
            if no_gateway {
                config.gateway.enabled = false;
            }

            tracing::info!(
                stack = %config.stack_name,
                region = %config.region,
                model = %config.model.name,
                gateway = config.gateway.enabled,
                "Configuration loaded"
            );

            let stack = compose(&config).context("Invalid deployment configuration")?;

            if stdout {
                println!("{}", synth::render_template(&stack)?);
            } else {
                let output = synth::write_stack(&stack, &out_dir)?;
                println!("{}", output.template.display());
            }
        }
        Command::Resolve { region } => {
            let table = config.region_table();
            let target = table.resolve_target(&region)?;
            let repository = target.repository(&config.image.repository);
            println!("{}", target.account);
            tracing::info!(
                region = %target.region,
                partition = %target.partition,
                repository_arn = %repository.repository_arn(),
                "Resolved region"
            );
        }
        Command::Regions => {
            let table = config.region_table();
            println!("{:<20} {:<14}", "Region", "Account");
            for (region, account) in table.entries() {
                println!("{:<20} {:<14}", region, account);
            }
        }
    }

    Ok(())
}
