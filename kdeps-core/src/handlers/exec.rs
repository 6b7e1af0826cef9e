//! Exec handler (§4.3): runs `decl.command` in a shell, optionally in background mode.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::resource::{ResourceKind, ResultPayload, RunSpec};

use super::{load_dotenv, DispatchContext, HandlerError, ResourceHandler};

#[derive(Default)]
pub struct ExecHandler;

async fn run_shell(
    command: &str,
    env: &HashMap<String, String>,
    workspace: &std::path::Path,
) -> std::io::Result<std::process::Output> {
    let dotenv = load_dotenv(workspace).await;
    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.arg("-c").arg(command).current_dir(workspace);
    for (k, v) in dotenv.iter().chain(env.iter()) {
        cmd.env(k, v);
    }
    cmd.output().await
}

#[async_trait]
impl ResourceHandler for ExecHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Exec
    }

    async fn dispatch(
        &self,
        spec: &RunSpec,
        ctx: &DispatchContext<'_>,
    ) -> Result<ResultPayload, HandlerError> {
        let RunSpec::Exec {
            command,
            env,
            background,
        } = spec
        else {
            unreachable!("ExecHandler dispatched with a non-Exec RunSpec");
        };

        if *background {
            let command = command.clone();
            let env = env.clone();
            let workspace = ctx.workspace.to_path_buf();
            let action_id = ctx.action_id.to_string();
            tokio::spawn(async move {
                match run_shell(&command, &env, &workspace).await {
                    Ok(out) if out.status.success() => {
                        info!(action_id, "background exec completed successfully")
                    }
                    Ok(out) => warn!(
                        action_id,
                        code = out.status.code(),
                        "background exec exited non-zero"
                    ),
                    Err(e) => warn!(action_id, error = %e, "background exec failed to launch"),
                }
            });
            return Ok(ResultPayload::Exec {
                command: command.clone(),
                env: env.clone(),
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                file: None,
            });
        }

        let run = run_shell(command, env, ctx.workspace);
        let spawned = match ctx.deadline {
            Some(d) => tokio::time::timeout(d, run)
                .await
                .map_err(|_| HandlerError::ExecTimeout)?,
            None => run.await,
        };

        // A process that never even launches (e.g. `/bin/sh` missing) is reported in
        // the record itself rather than as a handler error: the taxonomy has no
        // separate "exec launch failed" code, and an unreachable exit status already
        // conveys failure to the caller.
        let (stdout, stderr, exit_code) = match spawned {
            Ok(out) => (
                String::from_utf8_lossy(&out.stdout).into_owned(),
                String::from_utf8_lossy(&out.stderr).into_owned(),
                out.status.code().unwrap_or(-1),
            ),
            Err(e) => (String::new(), e.to_string(), -1),
        };

        Ok(ResultPayload::Exec {
            command: command.clone(),
            env: env.clone(),
            stdout,
            stderr,
            exit_code,
            file: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(workspace: &'a std::path::Path) -> DispatchContext<'a> {
        DispatchContext {
            action_id: "a",
            request_id: "r1",
            workspace,
            deadline: None,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ExecHandler;
        let spec = RunSpec::Exec {
            command: "echo hello".into(),
            env: HashMap::new(),
            background: false,
        };
        let payload = handler.dispatch(&spec, &ctx(dir.path())).await.unwrap();
        match payload {
            ResultPayload::Exec { stdout, exit_code, .. } => {
                assert_eq!(stdout.trim(), "hello");
                assert_eq!(exit_code, 0);
            }
            _ => panic!("expected Exec payload"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ExecHandler;
        let spec = RunSpec::Exec {
            command: "exit 7".into(),
            env: HashMap::new(),
            background: false,
        };
        let payload = handler.dispatch(&spec, &ctx(dir.path())).await.unwrap();
        match payload {
            ResultPayload::Exec { exit_code, .. } => assert_eq!(exit_code, 7),
            _ => panic!("expected Exec payload"),
        }
    }

    #[tokio::test]
    async fn background_mode_returns_immediately_with_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ExecHandler;
        let spec = RunSpec::Exec {
            command: "sleep 5".into(),
            env: HashMap::new(),
            background: true,
        };
        let payload = handler.dispatch(&spec, &ctx(dir.path())).await.unwrap();
        match payload {
            ResultPayload::Exec { stdout, exit_code, .. } => {
                assert!(stdout.is_empty());
                assert_eq!(exit_code, 0);
            }
            _ => panic!("expected Exec payload"),
        }
    }

    #[tokio::test]
    async fn deadline_exceeded_is_exec_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ExecHandler;
        let spec = RunSpec::Exec {
            command: "sleep 5".into(),
            env: HashMap::new(),
            background: false,
        };
        let mut c = ctx(dir.path());
        c.deadline = Some(std::time::Duration::from_millis(50));
        let err = handler.dispatch(&spec, &c).await;
        assert!(matches!(err, Err(HandlerError::ExecTimeout)));
    }
}
