//! Python handler (§4.3): as Exec, but the command is a script body run through an
//! interpreter, optionally inside a named environment.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::resource::{ResourceKind, ResultPayload, RunSpec};

use super::{load_dotenv, DispatchContext, HandlerError, ResourceHandler};

#[derive(Default)]
pub struct PythonHandler;

fn interpreter_command(script_path: &std::path::Path, environment: Option<&str>) -> String {
    match environment {
        Some(name) => format!("conda run -n {name} python3 {}", script_path.display()),
        None => format!("python3 {}", script_path.display()),
    }
}

async fn run_script(
    script: &str,
    env: &HashMap<String, String>,
    environment: Option<&str>,
    workspace: &std::path::Path,
    action_id: &str,
) -> std::io::Result<std::process::Output> {
    let script_path = workspace.join(format!("{action_id}.py"));
    tokio::fs::write(&script_path, script).await?;

    let dotenv = load_dotenv(workspace).await;
    let command = interpreter_command(&script_path, environment);
    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.arg("-c").arg(command).current_dir(workspace);
    for (k, v) in dotenv.iter().chain(env.iter()) {
        cmd.env(k, v);
    }
    cmd.output().await
}

#[async_trait]
impl ResourceHandler for PythonHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Python
    }

    async fn dispatch(
        &self,
        spec: &RunSpec,
        ctx: &DispatchContext<'_>,
    ) -> Result<ResultPayload, HandlerError> {
        let RunSpec::Python {
            script,
            env,
            environment,
            background,
        } = spec
        else {
            unreachable!("PythonHandler dispatched with a non-Python RunSpec");
        };

        if *background {
            let script = script.clone();
            let env = env.clone();
            let environment = environment.clone();
            let workspace = ctx.workspace.to_path_buf();
            let action_id = ctx.action_id.to_string();
            tokio::spawn(async move {
                match run_script(&script, &env, environment.as_deref(), &workspace, &action_id).await
                {
                    Ok(out) if out.status.success() => {
                        info!(action_id, "background python completed successfully")
                    }
                    Ok(out) => warn!(
                        action_id,
                        code = out.status.code(),
                        "background python exited non-zero"
                    ),
                    Err(e) => warn!(action_id, error = %e, "background python failed to launch"),
                }
            });
            return Ok(ResultPayload::Python {
                script: script.clone(),
                env: env.clone(),
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                file: None,
            });
        }

        let run = run_script(script, env, environment.as_deref(), ctx.workspace, ctx.action_id);
        let spawned = match ctx.deadline {
            Some(d) => tokio::time::timeout(d, run)
                .await
                .map_err(|_| HandlerError::ExecTimeout)?,
            None => run.await,
        };

        let (stdout, stderr, exit_code) = match spawned {
            Ok(out) => (
                String::from_utf8_lossy(&out.stdout).into_owned(),
                String::from_utf8_lossy(&out.stderr).into_owned(),
                out.status.code().unwrap_or(-1),
            ),
            Err(e) => (String::new(), e.to_string(), -1),
        };

        if exit_code != 0 {
            return Err(HandlerError::PythonExecution(exit_code));
        }

        Ok(ResultPayload::Python {
            script: script.clone(),
            env: env.clone(),
            stdout,
            stderr,
            exit_code,
            file: None,
        })
    }
}
