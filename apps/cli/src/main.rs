use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use ember_core::{Session, SessionConfig, SessionError, TcpTransport, TreeNode};
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Lawo VPRO matrix control over Ember+", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Lawo VPRO host IP address
    #[arg(short = 'H', long)]
    host: String,

    /// Lawo VPRO port
    #[arg(short, long)]
    port: u16,

    /// Load session settings (timeouts) from a TOML file
    #[arg(long)]
    config: Option<String>,

    /// Matrix node: identifier path (a/b/c) or dotted numbers (1.10.1.3)
    #[arg(long, default_value = "pro8/Video-Matrix/Matrix")]
    matrix: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current routing state with target and source labels
    Discover {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Node holding the target labels
        #[arg(long, default_value = "1.10.1.1")]
        target_labels: String,

        /// Node holding the source labels
        #[arg(long, default_value = "1.10.1.2")]
        source_labels: String,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Route a single source to a target
    Connect {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Source to connect
        #[arg(short, long)]
        source: u32,

        /// Target to connect
        #[arg(short, long)]
        target: u32,
    },
}

#[derive(Serialize)]
struct LabeledIndex {
    index: u32,
    label: String,
}

#[derive(Serialize)]
struct RouteEntry {
    target: LabeledIndex,
    sources: Vec<LabeledIndex>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match &cli.command {
        Commands::Discover {
            connection,
            target_labels,
            source_labels,
            json,
        } => run_discover(connection, target_labels, source_labels, *json),
        Commands::Connect {
            connection,
            source,
            target,
        } => run_connect(connection, *source, *target),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Distinct exit codes per error kind, for scripting around the tool.
fn exit_code(err: &SessionError) -> u8 {
    match err {
        SessionError::Connection(_) => 2,
        SessionError::Timeout { .. } => 3,
        SessionError::NodeNotFound { .. } | SessionError::InvalidPath(_) => 4,
        SessionError::InvalidRoute { .. } => 5,
        SessionError::Disconnected => 6,
    }
}

fn open_session(connection: &ConnectionArgs) -> Result<Session<TcpTransport>, SessionError> {
    let mut config = match &connection.config {
        Some(path) => SessionConfig::load_from_file(path).unwrap_or_else(|e| {
            error!(path = %path, "Ignoring unreadable config: {}", e);
            SessionConfig::default()
        }),
        None => SessionConfig::default(),
    };
    config.host = connection.host.clone();
    config.port = connection.port;

    Session::connect(config)
}

fn resolve_matrix(
    session: &mut Session<TcpTransport>,
    matrix: &str,
) -> Result<TreeNode, SessionError> {
    if matrix.chars().all(|c| c.is_ascii_digit() || c == '.') {
        session.resolve_path(matrix)
    } else {
        session.resolve_identifier_path(matrix)
    }
}

/// Fetch the labels under a label node: child number -> identifier.
///
/// Missing label nodes are tolerated; callers fall back to numbered
/// placeholders the way the original tooling did.
fn fetch_labels(session: &mut Session<TcpTransport>, base: &str) -> BTreeMap<u32, String> {
    let mut labels = BTreeMap::new();
    let base_node = match session.resolve_path(base) {
        Ok(node) => node,
        Err(e) => {
            info!(path = %base, "No label node: {}", e);
            return labels;
        }
    };
    if let Err(e) = session.get_directory(&base_node.path) {
        info!(path = %base, "Label listing failed: {}", e);
    }
    for child in session.tree().children(&base_node.path) {
        if let Some(identifier) = &child.identifier {
            labels.insert(child.number(), identifier.clone());
        }
    }
    labels
}

fn labeled(index: u32, labels: &BTreeMap<u32, String>, fallback: &str) -> LabeledIndex {
    LabeledIndex {
        index,
        label: labels
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("{fallback} {index}")),
    }
}

fn run_discover(
    connection: &ConnectionArgs,
    target_labels: &str,
    source_labels: &str,
    json: bool,
) -> Result<(), SessionError> {
    let mut session = open_session(connection)?;
    info!(host = %connection.host, port = connection.port, "Connected to Lawo VPRO");

    let matrix = resolve_matrix(&mut session, &connection.matrix)?;
    // The listing of the matrix itself brings the connection tallies in.
    session.get_directory(&matrix.path)?;

    let target_labels = fetch_labels(&mut session, target_labels);
    let source_labels = fetch_labels(&mut session, source_labels);

    let connections = session
        .tree()
        .connections(&matrix.path)
        .cloned()
        .unwrap_or_default();

    let routes: BTreeMap<String, RouteEntry> = connections
        .iter()
        .map(|(&target, sources)| {
            (
                target.to_string(),
                RouteEntry {
                    target: labeled(target, &target_labels, "Target"),
                    sources: sources
                        .iter()
                        .map(|&s| labeled(s, &source_labels, "Source"))
                        .collect(),
                },
            )
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&routes).expect("route map serializes")
        );
    } else {
        for entry in routes.values() {
            let sources: Vec<String> = entry
                .sources
                .iter()
                .map(|s| format!("{} ({})", s.label, s.index))
                .collect();
            println!(
                "{} ({}) <- {}",
                entry.target.label,
                entry.target.index,
                if sources.is_empty() {
                    "-".to_string()
                } else {
                    sources.join(", ")
                }
            );
        }
    }

    session.close();
    Ok(())
}

fn run_connect(connection: &ConnectionArgs, source: u32, target: u32) -> Result<(), SessionError> {
    let mut session = open_session(connection)?;
    info!(host = %connection.host, port = connection.port, "Connected to Lawo VPRO");

    let matrix = resolve_matrix(&mut session, &connection.matrix)?;

    info!(source, target, "Connecting source to target");
    session.matrix_connect(&matrix.path, target, &[source])?;
    println!("Connected source {source} to target {target}");

    session.close();
    Ok(())
}
