//! Purpose: `filestate` CLI entry point.
//! Role: Binary crate root; parses args, opens the coordinator, emits JSON on stdout.
//! Invariants: Commands emit JSON on stdout (pretty on a TTY, compact otherwise).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All label reads and writes go through `api::StateCoordinator`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod color_json;
mod command_dispatch;

use color_json::colorize_json;
use filestate::api::{
    EngineConfig, Error, ErrorKind, LockMode, PathPolicy, StateRecord, ValidationReport,
    ValidationStatus, to_exit_code,
};
use filestate::core::timestamp::now_rfc3339;
use filestate::notice::{Notice, notice_json};
use filestate::store_paths::default_state_dir;

const LOG_ENV: &str = "FILESTATE_LOG";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();

    let color_mode = cli.color;
    let state_dir = cli.dir.unwrap_or_else(default_state_dir);
    let config = EngineConfig::new()
        .with_state_dir(&state_dir)
        .with_path_policy(cli.path_policy.into())
        .with_lock_mode(if cli.wait {
            LockMode::Wait
        } else {
            LockMode::FailFast
        });

    command_dispatch::dispatch_command(cli.command, &config, color_mode)
        .map_err(add_schema_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "filestate",
    version,
    about = "Durable per-file labels that survive renames",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Labels are keyed by each file's normalized absolute path.

Mental model:
  - `set` records a label for one or more files
  - `get` reads labels back (untracked files read as null)
  - `rename` carries a label to a file's new path
"#,
    after_help = r#"EXAMPLES
  $ filestate set pending notes.txt draft.md
  $ filestate get notes.txt
  $ filestate rename --move notes.txt archive/notes.txt
  $ filestate list --label pending
  $ filestate cleanup --dry-run

LEARN MORE
  $ filestate <command> --help
  Log verbosity: FILESTATE_LOG=debug"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        help = "State directory holding state.db (default: $FILESTATE_DIR or ~/.filestate)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
    )]
    color: ColorMode,
    #[arg(
        long,
        help = "Wait for another process to release the store instead of failing with Busy"
    )]
    wait: bool,
    #[arg(
        long,
        default_value = "native",
        value_enum,
        help = "Path identity rules: native|posix|macos|windows"
    )]
    path_policy: PathPolicyCli,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PathPolicyCli {
    Native,
    Posix,
    Macos,
    Windows,
}

impl From<PathPolicyCli> for PathPolicy {
    fn from(value: PathPolicyCli) -> Self {
        match value {
            PathPolicyCli::Native => PathPolicy::native(),
            PathPolicyCli::Posix => PathPolicy::posix(),
            PathPolicyCli::Macos => PathPolicy::macos(),
            PathPolicyCli::Windows => PathPolicy::windows(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Read the label of one or more files",
        after_help = r#"EXAMPLES
  $ filestate get notes.txt
  $ filestate get a.txt b.txt

NOTES
  - Untracked or unresolvable paths report `"label": null`."#
    )]
    Get {
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },
    #[command(
        about = "Record a label for one or more files",
        after_help = r#"EXAMPLES
  $ filestate set pending notes.txt
  $ filestate set reviewed a.txt b.txt c.txt

NOTES
  - Multiple paths are written atomically: all of them or none."#
    )]
    Set {
        #[arg(help = "Label to record (non-empty, at most 128 bytes)")]
        label: String,
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },
    #[command(about = "Forget the label of one or more files")]
    Clear {
        #[arg(required = true, value_hint = ValueHint::AnyPath)]
        paths: Vec<PathBuf>,
    },
    #[command(
        about = "Carry a file's label to its new path",
        after_help = r#"EXAMPLES
  $ mv notes.txt archive/notes.txt && filestate rename notes.txt archive/notes.txt
  $ filestate rename --move notes.txt archive/notes.txt"#
    )]
    Rename {
        #[arg(value_hint = ValueHint::AnyPath)]
        from: PathBuf,
        #[arg(value_hint = ValueHint::AnyPath)]
        to: PathBuf,
        #[arg(long = "move", help = "Also move the file on disk before updating state")]
        move_file: bool,
    },
    #[command(about = "List tracked files")]
    List {
        #[arg(long, help = "Only show files with this label")]
        label: Option<String>,
    },
    #[command(
        about = "Forget files that no longer exist on disk",
        after_help = r#"NOTES
  - `--dry-run` reports what would be removed without touching the store."#
    )]
    Cleanup {
        #[arg(long)]
        dry_run: bool,
    },
    #[command(about = "Check the state store for schema or integrity problems")]
    Doctor {
        #[arg(long, help = "Emit a JSON report")]
        json: bool,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

/// Absolute, UTF-8 form of a CLI path argument. Nothing is required to exist.
fn absolute_path_arg(path: &Path) -> Result<String, Error> {
    let absolute = std::path::absolute(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to resolve path")
            .with_path(path)
            .with_source(err)
    })?;
    absolute.into_os_string().into_string().map_err(|raw| {
        Error::new(ErrorKind::IdentityResolution)
            .with_message("path is not valid UTF-8")
            .with_path(PathBuf::from(raw))
    })
}

fn record_json(record: &StateRecord) -> Value {
    serde_json::to_value(record).unwrap_or_else(|_| json!({ "key": record.key.as_str() }))
}

fn report_json(report: &ValidationReport) -> Value {
    let issues = report
        .issues
        .iter()
        .map(|issue| {
            json!({
                "code": issue.code,
                "message": issue.message,
            })
        })
        .collect::<Vec<_>>();
    json!({
        "path": report.path.to_string_lossy(),
        "status": match report.status {
            ValidationStatus::Ok => "ok",
            ValidationStatus::Corrupt => "corrupt",
        },
        "schema_version": report.schema_version,
        "record_count": report.record_count,
        "issue_count": report.issue_count,
        "issues": issues,
        "remediation_hints": report.remediation_hints,
    })
}

fn emit_doctor_human(report: &ValidationReport) {
    let label = report.path.display();
    match report.status {
        ValidationStatus::Ok => {
            println!("{label}: healthy");
            if let Some(count) = report.record_count {
                println!("  records:   {count}");
            }
            if let Some(version) = report.schema_version {
                println!("  schema:    v{version}");
            }
        }
        ValidationStatus::Corrupt => {
            let issue = report
                .issues
                .first()
                .map(|value| value.message.clone())
                .unwrap_or_else(|| "corruption detected".to_string());
            println!("{label}: corrupt");
            println!("  issues:    {}", report.issue_count);
            println!("  detail:    {issue}");
        }
    }
    for hint in &report.remediation_hints {
        println!("  hint:      {hint}");
    }
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check directory permissions or use --dir to a writable location.",
        ),
        ErrorKind::Busy => err.with_hint("State store is busy. Retry with --wait."),
        ErrorKind::StoreUnavailable => {
            err.with_hint("State store unavailable. Check the path, filesystem, and disk space.")
        }
        _ => err,
    }
}

fn add_schema_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Schema || err.hint().is_some() {
        return err;
    }
    err.with_hint("State store is unreadable. Run `filestate doctor` for details.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with FILESTATE_LOG=debug and share command/context if it persists.",
    )
}

fn emit_version_output(color_mode: ColorMode) {
    if io::stdout().is_terminal() {
        println!("filestate {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(
            json!({
                "name": "filestate",
                "version": env!("CARGO_PKG_VERSION"),
            }),
            color_mode,
        );
    }
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let use_color = color_mode.use_color(is_tty);
    let json = if is_tty || use_color {
        colorize_json(&value, use_color)
    } else {
        serde_json::to_string(&value)
            .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    };
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice(
    kind: &str,
    cmd: &str,
    store: &Path,
    message: String,
    details: Map<String, Value>,
) -> Notice {
    Notice {
        kind: kind.to_string(),
        time: now_rfc3339(),
        cmd: cmd.to_string(),
        store: store.display().to_string(),
        message,
        details,
    }
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {}", notice.message);
        return;
    }

    let json = serde_json::to_string(&notice_json(notice)).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "state store is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Schema => "state store schema is unreadable".to_string(),
        ErrorKind::StoreUnavailable => "state store unavailable".to_string(),
        ErrorKind::IdentityResolution => "path cannot be resolved".to_string(),
        ErrorKind::Validation => "invalid input".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    json!({ "error": Value::Object(inner) })
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `filestate --help`.".to_string();
    };
    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "filestate") else {
        return "Try `filestate --help`.".to_string();
    };
    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `filestate --help`.".to_string();
    }
    format!("Try `filestate {} --help`.", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, absolute_path_arg, clap_error_hint, error_json, error_text};
    use super::Cli;
    use clap::Parser;
    use std::path::Path;

    #[test]
    fn error_text_respects_color_flag() {
        let err = Error::new(ErrorKind::Busy)
            .with_message("state store is owned by another process")
            .with_hint("Retry with --wait.");
        let plain = error_text(&err, false);
        assert!(plain.starts_with("error: state store is owned by another process"));
        assert!(plain.contains("hint: Retry with --wait."));
        assert!(!plain.contains("\u{1b}["));

        let colored = error_text(&err, true);
        assert!(colored.contains("\u{1b}[31merror:\u{1b}[0m"));
    }

    #[test]
    fn error_json_carries_kind_and_path() {
        let err = Error::new(ErrorKind::Validation)
            .with_message("label must not be empty")
            .with_path("/tmp/a.txt");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Validation");
        assert_eq!(value["error"]["message"], "label must not be empty");
        assert_eq!(value["error"]["path"], "/tmp/a.txt");
    }

    #[test]
    fn relative_path_args_become_absolute() {
        let resolved = absolute_path_arg(Path::new("notes.txt")).expect("absolute");
        assert!(Path::new(&resolved).is_absolute());
        assert!(resolved.ends_with("notes.txt"));
    }

    #[test]
    fn clap_hint_points_at_subcommand_help() {
        let err = match Cli::try_parse_from(["filestate", "set", "pending"]) {
            Ok(_) => panic!("expected missing path error"),
            Err(err) => err,
        };
        assert_eq!(clap_error_hint(&err), "Try `filestate set --help`.");
    }
}
