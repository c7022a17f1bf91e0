//! Container runtime backed by the docker CLI

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use openapi_client::models::ContainerSpec;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::reconcile::runtime::{ContainerRuntime, ManagedContainer, MANAGED_LABEL, SPEC_HASH_LABEL};

/// Runs docker commands through the CLI binary
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn exec(&self, args: &[String]) -> Result<String, AgentError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(command_error(&self.binary, args, stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn spawn_error(&self, e: std::io::Error) -> AgentError {
        if e.kind() == std::io::ErrorKind::NotFound {
            AgentError::RuntimeUnavailable(format!("{} not found", self.binary))
        } else {
            AgentError::IoError(e)
        }
    }
}

fn command_error(binary: &str, args: &[String], stderr: String) -> AgentError {
    if stderr.contains("Cannot connect to the Docker daemon") {
        return AgentError::RuntimeUnavailable(stderr);
    }
    let command = args.first().map(String::as_str).unwrap_or_default();
    AgentError::RuntimeError(format!("{} {} failed: {}", binary, command, stderr))
}

fn is_missing_container(err: &AgentError) -> bool {
    matches!(err, AgentError::RuntimeError(msg) if msg.contains("No such container"))
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, AgentError> {
        let args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={}=true", MANAGED_LABEL),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        let stdout = self.exec(&args).await?;
        stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }

    async fn pull_image(&self, image: &str, timeout: Duration) -> Result<(), AgentError> {
        info!(image, "Pulling image...");

        let mut child = Command::new(&self.binary)
            .args(["pull", image])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let image_name = image.to_string();
        let pull = async move {
            let progress = async {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Some(line) = lines.next_line().await? {
                        debug!(image = %image_name, progress = %line.trim(), "pull progress");
                    }
                }
                Ok::<(), std::io::Error>(())
            };
            let errors = async {
                let mut buf = String::new();
                if let Some(mut stderr) = stderr {
                    stderr.read_to_string(&mut buf).await?;
                }
                Ok::<String, std::io::Error>(buf)
            };

            // a full stderr pipe blocks the child, so both drain together
            let (progress, errors) = tokio::join!(progress, errors);
            progress?;
            let errors = errors?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, errors))
        };

        // dropping the future on timeout kills the pull
        let (status, errors) = match tokio::time::timeout(timeout, pull).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(AgentError::PullTimeout(format!(
                    "{} after {:?}",
                    image, timeout
                )))
            }
        };

        if !status.success() {
            return Err(command_error(
                &self.binary,
                &["pull".to_string()],
                errors.trim().to_string(),
            ));
        }
        info!(image, "Image pulled");
        Ok(())
    }

    async fn start_container(
        &self,
        spec: &ContainerSpec,
        spec_hash: &str,
    ) -> Result<(), AgentError> {
        let container_id = self.exec(&run_args(spec, spec_hash)).await?;
        debug!(
            container = %spec.name,
            id = %container_id.trim(),
            "container started"
        );
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), AgentError> {
        for command in ["stop", "rm"] {
            match self.exec(&[command.to_string(), name.to_string()]).await {
                Ok(_) => {}
                Err(e) if is_missing_container(&e) => {
                    debug!(container = name, "container already gone");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// `docker run` arguments for a spec
pub fn run_args(spec: &ContainerSpec, spec_hash: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--label".to_string(),
        format!("{}=true", MANAGED_LABEL),
        "--label".to_string(),
        format!("{}={}", SPEC_HASH_LABEL, spec_hash),
        "--restart".to_string(),
        spec.restart_policy.as_docker_arg().to_string(),
    ];

    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(format!("{}:{}/{}", port.host, port.container, port.protocol.as_str()));
    }

    for volume in &spec.volumes {
        let mut mount = format!("{}:{}", volume.source, volume.target);
        if volume.read_only {
            mount.push_str(":ro");
        }
        args.push("--volume".to_string());
        args.push(mount);
    }

    if let Some(memory_mb) = spec.resources.memory_mb {
        args.push("--memory".to_string());
        args.push(format!("{}m", memory_mb));
    }
    if let Some(cpu_millis) = spec.resources.cpu_millis {
        args.push("--cpus".to_string());
        args.push(format!("{:.3}", f64::from(cpu_millis) / 1000.0));
    }

    args.push(spec.image.clone());
    args
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

/// Parse one line of `docker ps --format '{{json .}}'`
fn parse_ps_line(line: &str) -> Result<ManagedContainer, AgentError> {
    let entry: PsEntry = serde_json::from_str(line)?;
    let spec_hash = entry
        .labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == SPEC_HASH_LABEL)
        .map(|(_, value)| value.to_string());

    Ok(ManagedContainer {
        name: entry.names.split(',').next().unwrap_or_default().to_string(),
        image: entry.image,
        spec_hash,
        state: entry.state,
    })
}
