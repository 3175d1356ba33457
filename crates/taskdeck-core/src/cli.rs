use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "taskdeck: personal task lists with categories, priorities and due dates",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Filter and page selection shared by every command that addresses rows of
/// the visible list.
#[derive(Args, Debug, Clone, Default)]
pub struct ViewArgs {
    /// Case- and accent-insensitive title search.
    #[arg(short = 's', long)]
    pub search: Option<String>,

    /// all, pending or completed.
    #[arg(long)]
    pub status: Option<String>,

    /// Category name or id, or `all`.
    #[arg(short = 'c', long)]
    pub category: Option<String>,

    /// low, medium, high or all.
    #[arg(short = 'p', long)]
    pub priority: Option<String>,

    /// manual, due, priority, title or created.
    #[arg(long)]
    pub sort: Option<String>,

    /// 1-based page of the visible list.
    #[arg(long)]
    pub page: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an account and sign in.
    Register {
        email: String,
        /// Read from stdin when omitted.
        password: Option<String>,
        #[arg(long = "first")]
        first_name: Option<String>,
        #[arg(long = "last")]
        last_name: Option<String>,
    },
    /// Sign in with email and password.
    Login {
        email: String,
        password: Option<String>,
    },
    Logout,
    Whoami,
    /// Create a task.
    Add {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[arg(short = 'd', long)]
        description: Option<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(short = 'p', long)]
        priority: Option<String>,
        #[arg(short = 'c', long)]
        category: Option<String>,
    },
    /// Show the visible list.
    List {
        #[command(flatten)]
        view: ViewArgs,
    },
    Show {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Change fields of a task.
    Edit {
        task: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short = 'd', long)]
        description: Option<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(long = "set-priority")]
        set_priority: Option<String>,
        #[arg(long = "set-category")]
        set_category: Option<String>,
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,
        #[arg(long, conflicts_with = "due")]
        clear_due: bool,
        #[arg(long, conflicts_with = "set_category")]
        clear_category: bool,
        #[command(flatten)]
        view: ViewArgs,
    },
    Done {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    Undone {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    Toggle {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    Delete {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Move row FROM of the visible list to row TO (1-based).
    Move {
        from: usize,
        to: usize,
        #[command(flatten)]
        view: ViewArgs,
    },
    #[command(subcommand)]
    Category(CategoryCommand),
    /// Print the effective configuration.
    Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    Add {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    List,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&os(&["taskdeck", "rc.color=off", "list", "rc.backend:remote"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["taskdeck", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.backend".to_string(), "remote".to_string()),
            ]
        );
    }

    #[test]
    fn parses_move_with_filters() {
        let cli = GlobalCli::parse_from(os(&[
            "taskdeck", "move", "4", "2", "--status", "pending", "-v",
        ]));
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Move { from, to, view } => {
                assert_eq!((from, to), (4, 2));
                assert_eq!(view.status.as_deref(), Some("pending"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn add_joins_title_words() {
        let cli = GlobalCli::parse_from(os(&[
            "taskdeck", "add", "Buy", "groceries", "--due", "tomorrow",
        ]));
        match cli.command {
            Command::Add { title, due, .. } => {
                assert_eq!(title.join(" "), "Buy groceries");
                assert_eq!(due.as_deref(), Some("tomorrow"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
