//! TEMAKI CLI
//!
//! Command-line interface for the TEMAKI FSH compiler

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use temaki_core::init_tracing;
use tracing::error;

#[derive(Parser)]
#[command(name = "temaki")]
#[command(about = "TEMAKI: FSH compiler for FHIR Implementation Guides")]
#[command(version = temaki_core::VERSION)]
#[command(
    long_about = "TEMAKI compiles FHIR Shorthand (FSH) projects into FHIR conformance\n\
artifacts: StructureDefinitions, ValueSets, CodeSystems, example instances,\n\
and the IG publisher's ig.ini.\n\
\n\
Examples:\n  \
temaki build                 # Build the project in the current directory\n  \
temaki build path/to/project # Build another project\n  \
temaki build -o out          # Write artifacts somewhere else"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an FSH project to FHIR resources
    Build {
        /// Path to the FSH project directory
        #[arg(help = "Path to FSH project (default: current directory)")]
        project_path: Option<PathBuf>,

        /// Output directory for generated resources
        #[arg(short, long, help = "Output directory (default: fsh-generated)")]
        output: Option<PathBuf>,

        /// Directory with unpacked FHIR core definitions
        #[arg(
            long,
            env = "TEMAKI_FHIR_DEFS",
            help = "Directory containing the FHIR core definitions"
        )]
        defs: PathBuf,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            project_path,
            output,
            defs,
        } => commands::build::run(project_path, output, defs),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
