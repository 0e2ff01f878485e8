use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mlagdl::archive;
use mlagdl::error::MlagError;
use mlagdl::output::{JsonOutput, UnpackResult};

#[derive(Parser)]
#[command(name = "mlag")]
#[command(about = "Inspect and unpack .mlag chapter archives")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the validated manifest of an archive")]
    Info(InfoArgs),
    #[command(about = "Extract an archive into a directory")]
    Unpack(UnpackArgs),
}

#[derive(Args)]
struct InfoArgs {
    archive: Utf8PathBuf,
}

#[derive(Args)]
struct UnpackArgs {
    archive: Utf8PathBuf,

    #[arg(long)]
    out: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(mlag) = report.downcast_ref::<MlagError>() {
            return ExitCode::from(map_exit_code(mlag));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MlagError) -> u8 {
    match error {
        MlagError::NotMlag(_) | MlagError::CorruptedMlag { .. } => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info(args) => {
            let manifest = archive::open(&args.archive)?;
            JsonOutput::print_manifest(&manifest).into_diagnostic()?;
            Ok(())
        }
        Commands::Unpack(args) => {
            // Validate the manifest before touching the filesystem.
            archive::open(&args.archive)?;
            let target = match args.out {
                Some(out) => out,
                None => args.archive.with_extension(""),
            };
            let extracted = archive::extract(&args.archive, &target)?;
            JsonOutput::print_unpack(&UnpackResult {
                archive: args.archive.to_string(),
                target: target.to_string(),
                extracted,
            })
            .into_diagnostic()?;
            Ok(())
        }
    }
}
