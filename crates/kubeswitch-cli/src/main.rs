//! Kubeswitch CLI - search kubeconfigs across stores and switch contexts

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

mod commands;
mod error;
mod exit_codes;
mod logging;
mod picker;
mod settings;

use error::{CliError, Result};
use settings::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "switcher")]
#[command(author = "Kubeswitch Contributors")]
#[command(version)]
#[command(
    about = "Search kubeconfigs across stores and switch the shell's Kubernetes context",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    /// Context or alias to switch to; `-` for the previous context, `.` for the last one
    #[arg(value_name = "NAME")]
    name: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Configuration file (default: ~/.kube/switch-config.yaml)
    #[arg(long, global = true, env = "KUBESWITCH_CONFIG_PATH")]
    config_path: Option<String>,

    /// Directory holding search indices, aliases and the namespace cache
    #[arg(long, global = true)]
    state_directory: Option<String>,

    /// Directory or file to search for kubeconfigs (repeatable)
    #[arg(long = "kubeconfig-path", global = true)]
    kubeconfig_path: Vec<String>,

    /// Glob matched against kubeconfig file names
    #[arg(long, global = true)]
    kubeconfig_name: Option<String>,

    /// Search every store live, ignoring fresh search indices
    #[arg(long, global = true)]
    no_index: bool,

    /// Deadline of the search, e.g. `30s` or `2m`
    #[arg(long, global = true)]
    search_timeout: Option<humantime::Duration>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

impl From<GlobalArgs> for Overrides {
    fn from(args: GlobalArgs) -> Self {
        Overrides {
            config_path: args.config_path,
            state_directory: args.state_directory,
            kubeconfig_paths: args.kubeconfig_path,
            kubeconfig_name: args.kubeconfig_name,
            no_index: args.no_index,
            search_timeout: args.search_timeout.map(Into::into),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print every discovered context
    #[command(name = "list-contexts", visible_alias = "ls")]
    ListContexts,

    /// Change the namespace of the current context
    #[command(visible_alias = "ns")]
    Namespace {
        /// Namespace to switch to (interactive when omitted)
        name: Option<String>,
    },

    /// Manage context aliases
    Alias {
        /// Alias definition, ALIAS=CONTEXT
        definition: Option<String>,

        #[command(subcommand)]
        action: Option<AliasAction>,
    },

    /// Pick a context from the switch history
    #[command(visible_alias = "h")]
    History,

    /// Run a command against every context matching a pattern
    Exec {
        /// Shell-style pattern matched against context names
        pattern: String,

        /// Command to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print the kubeconfig of a context
    Show {
        /// Context or alias
        name: String,
    },

    /// Remove temporary kubeconfigs, cached kubeconfigs and search indices
    Clean,
}

#[derive(Subcommand)]
enum AliasAction {
    /// List aliases
    Ls,

    /// Remove an alias
    Rm {
        /// Alias to remove
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version requests are not failures
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code as u8);
        }
    };
    logging::setup_logging(cli.global.debug);

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(e) => {
            let code = e.exit_code();
            eprintln!("{:?}", miette::Report::new(e));
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    check_name(&cli)?;
    let settings = Settings::load(cli.global.into())?;

    match cli.command {
        None => commands::switch::run(&settings, cli.name.as_deref()).await,

        Some(Commands::ListContexts) => commands::list_contexts::run(&settings).await,

        Some(Commands::Namespace { name }) => {
            commands::namespace::run(&settings, name.as_deref()).await
        }

        Some(Commands::Alias { definition, action }) => match (action, definition) {
            (Some(AliasAction::Rm { name }), None) => commands::alias::remove(&settings, &name),
            (Some(AliasAction::Ls), None) | (None, None) => commands::alias::list(&settings),
            (Some(_), Some(definition)) => Err(CliError::usage_with_help(
                format!("unexpected alias definition '{}'", definition),
                "Use `switcher alias NAME=CONTEXT`, `switcher alias ls` or `switcher alias rm NAME`",
            )),
            (None, Some(definition)) => commands::alias::set(&settings, &definition).await,
        },

        Some(Commands::History) => commands::history::run(&settings).await,

        Some(Commands::Exec { pattern, command }) => {
            commands::exec::run(&settings, &pattern, &command).await
        }

        Some(Commands::Show { name }) => commands::show::run(&settings, &name).await,

        Some(Commands::Clean) => commands::clean::run(&settings),
    }
}

/// A context NAME only goes with the default command
fn check_name(cli: &Cli) -> Result<()> {
    match (&cli.name, &cli.command) {
        (Some(name), Some(_)) => Err(CliError::usage_with_help(
            format!("unexpected argument '{}' before the subcommand", name),
            "Switch with `switcher NAME`, or run a subcommand without a context name",
        )),
        _ => Ok(()),
    }
}
