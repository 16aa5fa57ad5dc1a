use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Workspace tasks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every workspace member
    Build,
    /// Run the full test suite
    Test,
    /// Print the routing state of a device
    Discover {
        /// Provider host
        host: String,
        /// Provider port
        #[arg(default_value_t = 9000)]
        port: u16,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => run("cargo", &["build", "--workspace"]),
        Commands::Test => run("cargo", &["test", "--workspace"]),
        Commands::Discover { host, port } => {
            let port = port.to_string();
            run(
                "cargo",
                &[
                    "run",
                    "-p",
                    "vpro-cli",
                    "--",
                    "discover",
                    "--host",
                    host.as_str(),
                    "--port",
                    &port,
                ],
            )
        }
    }
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(program).args(args).status()?;
    if !status.success() {
        anyhow::bail!("{program} {} failed", args.join(" "));
    }
    Ok(())
}
