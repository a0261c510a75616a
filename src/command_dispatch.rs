//! Purpose: Hold top-level CLI command dispatch for `filestate`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command opens at most one coordinator and releases it before returning.
//! Invariants: Helpers in `main.rs` own output envelopes and error rendering.

use std::sync::{Arc, Mutex};

use filestate::api::{StateCoordinator, validate_store};

use super::*;

pub(super) fn dispatch_command(
    command: Command,
    config: &EngineConfig,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "filestate", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Get { paths } => {
            let coordinator = StateCoordinator::open_or_degraded(config);
            if coordinator.is_degraded() {
                emit_notice(
                    &notice(
                        "degraded",
                        "get",
                        config.store_path(),
                        "state store unavailable; reporting every file as untracked".to_string(),
                        Map::new(),
                    ),
                    color_mode,
                );
            }
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                let label = match absolute_path_arg(path) {
                    Ok(absolute) => coordinator.get_file_state(&absolute),
                    Err(err) => {
                        let mut details = Map::new();
                        details.insert("path".to_string(), json!(path.display().to_string()));
                        emit_notice(
                            &notice(
                                "invalid_path",
                                "get",
                                config.store_path(),
                                error_message(&err),
                                details,
                            ),
                            color_mode,
                        );
                        None
                    }
                };
                files.push(json!({
                    "path": path.display().to_string(),
                    "label": label.as_ref().map(|label| label.as_str()),
                }));
            }
            emit_json(json!({ "files": files }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Set { label, paths } => {
            let absolute = absolute_paths(&paths)?;
            let coordinator = StateCoordinator::open(config)?;
            let result = coordinator.set_files_state(&absolute, &label);
            if let Some(err) = result.error {
                return Err(err);
            }
            emit_json(
                json!({
                    "label": label.trim(),
                    "committed": result.committed,
                    "paths": absolute,
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Clear { paths } => {
            let absolute = absolute_paths(&paths)?;
            let coordinator = StateCoordinator::open(config)?;
            let mut files = Vec::with_capacity(absolute.len());
            for path in &absolute {
                let cleared = coordinator.clear_file_state(path)?;
                files.push(json!({ "path": path, "cleared": cleared }));
            }
            emit_json(json!({ "files": files }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Rename {
            from,
            to,
            move_file,
        } => {
            let old_path = absolute_path_arg(&from)?;
            let new_path = absolute_path_arg(&to)?;
            let coordinator = StateCoordinator::open(config)?;
            if move_file {
                std::fs::rename(&from, &to).map_err(|err| move_error(err, &from))?;
            }
            let carried = coordinator.rename(&old_path, &new_path)?;
            emit_json(
                json!({
                    "from": old_path,
                    "to": new_path,
                    "moved": move_file,
                    "carried": carried,
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::List { label } => {
            let coordinator = StateCoordinator::open(config)?;
            let wanted = label.as_deref().map(str::trim);
            let files = coordinator
                .tracked_files()?
                .iter()
                .filter(|record| match wanted {
                    Some(wanted) => record.label.as_ref().is_some_and(|label| label == wanted),
                    None => true,
                })
                .map(record_json)
                .collect::<Vec<_>>();
            emit_json(json!({ "files": files }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Cleanup { dry_run } => {
            let coordinator = StateCoordinator::open(config)?;
            let records = coordinator.tracked_files()?;
            let (existing, missing): (Vec<&StateRecord>, Vec<&StateRecord>) = records
                .iter()
                .partition(|record| record.path.as_deref().is_some_and(|p| Path::new(p).exists()));
            let missing_paths = missing
                .iter()
                .map(|record| record.path.clone().unwrap_or_else(|| record.key.to_string()))
                .collect::<Vec<_>>();

            if dry_run {
                emit_json(
                    json!({
                        "dry_run": true,
                        "removed": 0,
                        "missing": missing_paths,
                    }),
                    color_mode,
                );
                return Ok(RunOutcome::ok());
            }

            let removed_paths = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&removed_paths);
            let subscription = coordinator.subscribe(move |path, label| {
                if label.is_none() {
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(path.to_string());
                }
            });
            let removed = coordinator
                .cleanup_missing_files(existing.iter().filter_map(|record| record.path.as_deref()));
            subscription.unsubscribe();

            if removed < missing.len() {
                let mut details = Map::new();
                details.insert("removed".to_string(), json!(removed));
                details.insert("missing".to_string(), json!(missing.len()));
                emit_notice(
                    &notice(
                        "cleanup_partial",
                        "cleanup",
                        config.store_path(),
                        format!(
                            "removed {removed} of {} records for missing files",
                            missing.len()
                        ),
                        details,
                    ),
                    color_mode,
                );
            }

            let removed_paths = removed_paths
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            emit_json(
                json!({
                    "dry_run": false,
                    "removed": removed,
                    "paths": removed_paths,
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Doctor { json } => {
            let report = validate_store(config.store_path(), config.lock_mode())?;
            if json {
                emit_json(report_json(&report), color_mode);
            } else {
                emit_doctor_human(&report);
            }
            let exit_code = if report.is_ok() {
                0
            } else {
                to_exit_code(ErrorKind::Schema)
            };
            Ok(RunOutcome::with_code(exit_code))
        }
    }
}

fn absolute_paths(paths: &[PathBuf]) -> Result<Vec<String>, Error> {
    paths.iter().map(|path| absolute_path_arg(path)).collect()
}

fn move_error(err: io::Error, from: &Path) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Internal,
    };
    Error::new(kind)
        .with_message("failed to move file")
        .with_path(from)
        .with_hint("State was left unchanged.")
        .with_source(err)
}
