use async_trait::async_trait;
use std::process::Stdio;
use tokio::fs::File;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::{ExternalJobHandle, ExternalProcessRequest, ExternalProcessRunner, JobOutcome};
use crate::computation::{ComputationError, ComputationResult};
use crate::models::ProcessingLocation;

/// Runs scripts as child processes of the engine
#[derive(Debug, Clone)]
pub struct LocalProcessRunner {
    shell: String,
}

impl Default for LocalProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProcessRunner {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

async fn capture_file(service: &str, path: &std::path::Path) -> ComputationResult<Stdio> {
    let file = File::create(path).await.map_err(|e| ComputationError::Processing {
        service: service.to_string(),
        reason: format!("cannot create {}: {e}", path.display()),
    })?;
    Ok(Stdio::from(file.into_std().await))
}

#[async_trait]
impl ExternalProcessRunner for LocalProcessRunner {
    fn name(&self) -> &str {
        "local"
    }

    fn supports(&self, location: ProcessingLocation) -> bool {
        location == ProcessingLocation::Local
    }

    async fn run(
        &self,
        request: ExternalProcessRequest,
    ) -> ComputationResult<Box<dyn ExternalJobHandle>> {
        let stdout = capture_file(&request.service, &request.stdout_path).await?;
        let stderr = capture_file(&request.service, &request.stderr_path).await?;

        let child = Command::new(&self.shell)
            .arg(&request.script_path)
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ComputationError::Processing {
                service: request.service.clone(),
                reason: format!("cannot launch {}: {e}", request.script_path.display()),
            })?;

        info!(
            service = %request.service,
            pid = child.id(),
            script = %request.script_path.display(),
            "🔧 Launched local process"
        );
        Ok(Box::new(LocalJob {
            service: request.service,
            child,
        }))
    }
}

struct LocalJob {
    service: String,
    child: Child,
}

#[async_trait]
impl ExternalJobHandle for LocalJob {
    async fn poll(&mut self) -> ComputationResult<Option<JobOutcome>> {
        let status = self
            .child
            .try_wait()
            .map_err(|e| ComputationError::Processing {
                service: self.service.clone(),
                reason: format!("cannot check process status: {e}"),
            })?;
        Ok(status.map(|status| JobOutcome {
            exit_code: status.code(),
        }))
    }

    async fn terminate(&mut self) -> ComputationResult<()> {
        debug!(service = %self.service, "Terminating local process");
        self.child
            .kill()
            .await
            .map_err(|e| ComputationError::Processing {
                service: self.service.clone(),
                reason: format!("cannot terminate process: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_script_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("job.sh");
        tokio::fs::write(&script_path, "echo \"hello $GREETING\"\necho oops >&2\nexit 3\n")
            .await
            .unwrap();

        let runner = LocalProcessRunner::new();
        assert!(runner.supports(ProcessingLocation::Local));
        assert!(!runner.supports(ProcessingLocation::Cluster));

        let request = ExternalProcessRequest {
            service: "job#1".to_string(),
            script_path,
            working_dir: dir.path().to_path_buf(),
            env: HashMap::from([("GREETING".to_string(), "world".to_string())]),
            stdout_path: dir.path().join("out.txt"),
            stderr_path: dir.path().join("err.txt"),
        };
        let mut job = runner.run(request).await.unwrap();

        let outcome = loop {
            if let Some(outcome) = job.poll().await.unwrap() {
                break outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
        let stdout = tokio::fs::read_to_string(dir.path().join("out.txt")).await.unwrap();
        assert_eq!(stdout, "hello world\n");
        let stderr = tokio::fs::read_to_string(dir.path().join("err.txt")).await.unwrap();
        assert_eq!(stderr, "oops\n");
    }
}
