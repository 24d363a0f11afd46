//! Command-line front end for archivist.

mod commands;
mod exit_codes;
mod file_selector;
mod logger;
mod output;
mod password;
mod progress;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use archivist::CancellationToken;
use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};

use exit_codes::ExitCode;

/// List, extract and edit archives through pluggable backends
#[derive(Parser)]
#[command(name = "archivist")]
#[command(author, version, about = "List, extract and edit archives", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value = "human", global = true)]
    format: OutputFormat,

    /// Suppress progress output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Show library diagnostics (-v debug, -vv trace)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Password for encrypted archives (prompts when needed and not given)
    #[arg(long, short = 'p', env = "ARCHIVIST_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Parent directory for temporary files
    #[arg(long, env = "ARCHIVIST_TMPDIR", global = true)]
    tmpdir: Option<PathBuf>,

    /// Plugin to leave out of backend selection (repeatable)
    #[arg(long = "disable-plugin", value_name = "ID", global = true)]
    disabled_plugins: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List archive contents (alias: l)
    #[command(alias = "l")]
    List {
        /// Archive to list
        archive: PathBuf,

        /// Show compressed sizes and member properties
        #[arg(long)]
        technical: bool,
    },

    /// Show archive information (alias: i)
    #[command(alias = "i")]
    Info {
        /// Archive to inspect
        archive: PathBuf,
    },

    /// Extract members (alias: x)
    #[command(alias = "x")]
    Extract {
        /// Archive to extract
        archive: PathBuf,

        /// Output directory
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,

        /// Member patterns to extract (glob patterns supported)
        #[arg(short = 'i', long)]
        include: Vec<String>,

        /// Member patterns to skip
        #[arg(short = 'e', long)]
        exclude: Vec<String>,

        /// Drop member directories and write every file into the output directory
        #[arg(long)]
        flat: bool,

        /// How unsafe member paths are handled
        #[arg(long, value_enum, default_value = "strict")]
        path_safety: PathSafetyMode,
    },

    /// Add files to an archive, creating it if needed (alias: a)
    #[command(alias = "a")]
    Add {
        /// Archive to add to
        archive: PathBuf,

        /// Files and directories to add
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory inside the archive to add below
        #[arg(long, value_name = "DIR")]
        to: Option<String>,

        /// Compression level passed to the backend
        #[arg(short = 'l', long)]
        level: Option<u32>,

        /// Encrypt the member list too (needs a password)
        #[arg(long)]
        encrypt_headers: bool,
    },

    /// Delete members (alias: d)
    #[command(alias = "d")]
    Delete {
        /// Archive to edit
        archive: PathBuf,

        /// Member patterns to delete (glob patterns supported)
        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Move or rename members inside an archive (alias: mv)
    #[command(alias = "mv")]
    Move {
        /// Archive to edit
        archive: PathBuf,

        /// Member patterns to move (glob patterns supported)
        #[arg(required = true)]
        members: Vec<String>,

        /// Target directory, or the new name when moving a single member
        #[arg(long, value_name = "PATH")]
        to: String,
    },

    /// Compress files into a new archive (alias: c)
    #[command(alias = "c")]
    Compress {
        /// Files and directories to compress
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Archive to create
        #[arg(short = 'o', long, conflicts_with = "suffix")]
        output: Option<PathBuf>,

        /// Derive the archive name from the inputs and use this extension
        #[arg(short = 's', long, default_value = "tar.gz")]
        suffix: String,

        /// Store inputs relative to the first input's directory
        #[arg(long)]
        change_to_first_path: bool,

        /// Compression level passed to the backend
        #[arg(short = 'l', long)]
        level: Option<u32>,

        /// Encrypt the new archive (prompts for a password if none was given)
        #[arg(long)]
        encrypt: bool,

        /// Encrypt the member list too
        #[arg(long)]
        encrypt_headers: bool,
    },

    /// Show the available backends
    Plugins,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PathSafetyMode {
    /// Refuse members that escape the output directory
    Strict,
    /// Strip `..` and leading `/` from member paths
    Sanitize,
    /// Write members where their paths point
    Disabled,
}

impl From<PathSafetyMode> for archivist::PathSafety {
    fn from(mode: PathSafetyMode) -> Self {
        match mode {
            PathSafetyMode::Strict => archivist::PathSafety::Strict,
            PathSafetyMode::Sanitize => archivist::PathSafety::Sanitize,
            PathSafetyMode::Disabled => archivist::PathSafety::Disabled,
        }
    }
}

/// Options every command shares.
pub struct GlobalOptions {
    pub format: OutputFormat,
    pub quiet: bool,
    pub password: Option<String>,
    pub tmpdir: Option<PathBuf>,
    pub disabled_plugins: Vec<String>,
    /// Token of the job currently running, cancelled on Ctrl+C.
    pub running: Arc<Mutex<Option<CancellationToken>>>,
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let running: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let interrupted = running.clone();
    ctrlc::set_handler(move || {
        let token = interrupted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        match token {
            Some(token) if !token.is_cancelled() => {
                eprintln!("\nInterrupted, cancelling...");
                token.cancel();
            }
            _ => {
                eprintln!("\nInterrupted");
                std::process::exit(exit_codes::USER_INTERRUPT);
            }
        }
    })
    .ok();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start the async runtime: {e}");
            std::process::exit(exit_codes::FATAL_ERROR);
        }
    };

    let global = GlobalOptions {
        format: cli.format,
        quiet: cli.quiet,
        password: cli.password,
        tmpdir: cli.tmpdir,
        disabled_plugins: cli.disabled_plugins,
        running,
    };

    let exit_code = runtime.block_on(async {
        match cli.command {
            Commands::List { archive, technical } => {
                commands::list(&global, &archive, technical).await
            }

            Commands::Info { archive } => commands::info(&global, &archive).await,

            Commands::Extract {
                archive,
                output,
                include,
                exclude,
                flat,
                path_safety,
            } => {
                commands::extract(
                    &global,
                    &commands::ExtractConfig {
                        archive_path: &archive,
                        output_dir: &output,
                        include: &include,
                        exclude: &exclude,
                        preserve_paths: !flat,
                        path_safety: path_safety.into(),
                    },
                )
                .await
            }

            Commands::Add {
                archive,
                files,
                to,
                level,
                encrypt_headers,
            } => {
                commands::add(
                    &global,
                    &commands::AddConfig {
                        archive_path: &archive,
                        files: &files,
                        destination: to.as_deref(),
                        level,
                        encrypt_headers,
                    },
                )
                .await
            }

            Commands::Delete { archive, members } => {
                commands::delete(&global, &archive, &members).await
            }

            Commands::Move {
                archive,
                members,
                to,
            } => commands::move_members(&global, &archive, &members, &to).await,

            Commands::Compress {
                inputs,
                output,
                suffix,
                change_to_first_path,
                level,
                encrypt,
                encrypt_headers,
            } => {
                commands::compress(
                    &global,
                    &commands::CompressConfig {
                        inputs: &inputs,
                        output: output.as_deref(),
                        suffix: &suffix,
                        change_to_first_path,
                        level,
                        encrypt: encrypt || encrypt_headers,
                        encrypt_headers,
                    },
                )
                .await
            }

            Commands::Plugins => commands::plugins(&global),

            Commands::Completions { shell } => {
                let mut cmd = Cli::command();
                let name = cmd.get_name().to_string();
                generate(shell, &mut cmd, name, &mut std::io::stdout());
                ExitCode::Success
            }
        }
    });

    drop(runtime);
    std::process::exit(exit_code.code());
}
