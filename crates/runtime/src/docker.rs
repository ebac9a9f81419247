//! Container runtime abstraction for testability.
//!
//! The [`ContainerRuntime`] trait abstracts the bollard Docker API, allowing
//! production code to use [`BollardRuntime`] while tests use `MockRuntime`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ StackBuilder │
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────────┐
//! │ ContainerRuntime │ (trait)
//! └──────────────────┘
//!        │     │
//!        ▼     ▼
//!   ┌───────┐ ┌──────┐
//!   │Bollard│ │ Mock │
//!   └───┬───┘ └──────┘
//!       │
//!       ▼
//!   Docker Daemon
//! ```
//!
//! # Container ID Validation
//!
//! Methods of [`BollardRuntime`] that accept container IDs validate them first:
//! 1-64 ASCII hex digits, nothing else.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::logs::{LogStream, forward_container_logs};

/// Validates a container ID before it reaches the Docker API.
fn validate_container_id(id: &str) -> Result<(), RuntimeError> {
    if id.is_empty() || id.len() > 64 {
        return Err(RuntimeError::DockerApi(format!(
            "invalid container ID: length {} (must be 1-64)",
            id.len()
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RuntimeError::DockerApi(
            "invalid container ID: contains non-hex characters".to_owned(),
        ));
    }
    Ok(())
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image reference (`image[:tag]`)
    pub image: String,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Container ports published to random host ports
    pub exposed_ports: Vec<u16>,
    /// Network the container joins
    pub network: String,
    /// Run with extended privileges
    pub privileged: bool,
}

/// Trait abstracting container runtime operations.
///
/// All Docker API calls go through this trait, enabling testability via mocking.
/// The trait is `Send + Sync + 'static`, allowing safe sharing across async contexts.
///
/// # Error Handling
///
/// - **404 errors**: Converted to `RuntimeError::ContainerNotFound`
/// - **Connection errors**: Wrapped as `RuntimeError::DockerConnection`
/// - **Everything else**: Wrapped as `RuntimeError::DockerApi`
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Creates a bridge network.
    fn create_network(&self, name: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Removes a network by name.
    fn remove_network(&self, name: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Pulls the image if needed, then creates and starts a container.
    ///
    /// Returns the container ID.
    fn run_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// Returns the container's name without the leading slash.
    fn container_name(&self, id: &str) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// Returns the container's IP address on `network`.
    ///
    /// Used for inter-container traffic; nothing goes through host port forwarding.
    fn container_ip(
        &self,
        id: &str,
        network: &str,
    ) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// Host through which published ports are reachable.
    fn host(&self) -> String;

    /// Host port that `container_port` is published on.
    fn mapped_port(
        &self,
        id: &str,
        container_port: u16,
    ) -> impl Future<Output = Result<u16, RuntimeError>> + Send;

    /// Runs a command inside the container and returns its exit code.
    fn exec(
        &self,
        id: &str,
        cmd: &[String],
    ) -> impl Future<Output = Result<i64, RuntimeError>> + Send;

    /// Returns everything the container has logged so far.
    fn logs(&self, id: &str) -> impl Future<Output = Result<String, RuntimeError>> + Send;

    /// Starts forwarding the container's log output to `tracing`.
    fn stream_logs(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<LogStream, RuntimeError>> + Send;

    /// Stops a container, killing it after `timeout`.
    fn stop_container(
        &self,
        id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Removes a container and its anonymous volumes.
    fn remove_container(&self, id: &str) -> impl Future<Output = Result<(), RuntimeError>> + Send;

    /// Checks Docker daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

/// Production runtime implementation using `bollard`.
///
/// Internally uses `Arc<bollard::Docker>` for safe sharing across async tasks,
/// including the log forwarding task.
pub struct BollardRuntime {
    docker: Arc<bollard::Docker>,
    host: String,
}

impl BollardRuntime {
    /// Connects to Docker using the local defaults (`DOCKER_HOST` or the platform socket).
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::DockerConnection` if the connection fails
    /// (e.g., socket not found, permission denied, daemon not running).
    pub fn connect_local() -> Result<Self, RuntimeError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            RuntimeError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
            host: docker_host(std::env::var("DOCKER_HOST").ok().as_deref()),
        })
    }

    /// Connects to Docker using a specific socket path.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, RuntimeError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    RuntimeError::DockerConnection(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
            host: "localhost".to_owned(),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        use bollard::image::CreateImageOptions;

        let (from_image, tag) = split_image_reference(image);
        debug!(image, "pulling image");

        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: from_image.to_owned(),
                    tag: tag.to_owned(),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| RuntimeError::DockerApi(format!("pull {image} failed: {e}")))?;
        Ok(())
    }

    async fn inspect(
        &self,
        id: &str,
    ) -> Result<bollard::models::ContainerInspectResponse, RuntimeError> {
        validate_container_id(id)?;

        self.docker
            .inspect_container(id, None)
            .await
            .map_err(|e| map_container_error(id, "inspect container", e))
    }
}

/// Extracts the host part of a `tcp://host:port` `DOCKER_HOST`.
///
/// Unix sockets and unset values map to `localhost`.
fn docker_host(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|value| value.strip_prefix("tcp://"))
        .and_then(|rest| rest.split(':').next())
        .filter(|host| !host.is_empty())
        .unwrap_or("localhost")
        .to_owned()
}

/// Splits `repo[:tag]` at the last colon that is not part of a registry port.
fn split_image_reference(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

fn map_container_error(id: &str, action: &str, e: bollard::errors::Error) -> RuntimeError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::ContainerNotFound(id.to_owned()),
        other => RuntimeError::DockerApi(format!("{action} failed: {other}")),
    }
}

/// Awaits `start`; if it fails, removes the created container with `remove`
/// and returns the start error.
async fn start_or_discard<S, R, RF>(id: &str, start: S, remove: R) -> Result<(), RuntimeError>
where
    S: Future<Output = Result<(), RuntimeError>>,
    R: FnOnce() -> RF,
    RF: Future<Output = Result<(), RuntimeError>>,
{
    let Err(start_error) = start.await else {
        return Ok(());
    };
    match remove().await {
        Ok(()) => debug!(container_id = id, "removed container that failed to start"),
        Err(e) => warn!(
            container_id = id,
            error = %e,
            "failed to remove container that failed to start"
        ),
    }
    Err(start_error)
}

impl ContainerRuntime for BollardRuntime {
    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        use bollard::network::CreateNetworkOptions;

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_owned(),
                driver: "bridge".to_owned(),
                ..Default::default()
            })
            .await
            .map_err(|e| RuntimeError::DockerApi(format!("create network '{name}' failed: {e}")))?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| RuntimeError::DockerApi(format!("remove network '{name}' failed: {e}")))
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        use bollard::container::{Config, CreateContainerOptions, StartContainerOptions};
        use bollard::models::HostConfig;

        self.pull_image(&spec.image).await?;

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                network_mode: Some(spec.network.clone()),
                privileged: Some(spec.privileged),
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| {
                RuntimeError::DockerApi(format!("create container '{}' failed: {e}", spec.name))
            })?;

        let start = async {
            self.docker
                .start_container(&created.id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| map_container_error(&created.id, "start container", e))
        };
        start_or_discard(&created.id, start, || self.remove_container(&created.id)).await?;

        debug!(
            container_id = created.id.as_str(),
            name = spec.name.as_str(),
            image = spec.image.as_str(),
            "container started"
        );
        Ok(created.id)
    }

    async fn container_name(&self, id: &str) -> Result<String, RuntimeError> {
        let details = self.inspect(id).await?;
        Ok(details
            .name
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_default())
    }

    async fn container_ip(&self, id: &str, network: &str) -> Result<String, RuntimeError> {
        let details = self.inspect(id).await?;
        details
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|mut networks| networks.remove(network))
            .and_then(|endpoint| endpoint.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| RuntimeError::AddressNotFound {
                container_id: id.to_owned(),
                network: network.to_owned(),
            })
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn mapped_port(&self, id: &str, container_port: u16) -> Result<u16, RuntimeError> {
        let details = self.inspect(id).await?;
        let key = format!("{container_port}/tcp");

        details
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&key))
            .flatten()
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()))
            })
            .ok_or_else(|| RuntimeError::PortNotMapped {
                container_id: id.to_owned(),
                port: container_port,
            })
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<i64, RuntimeError> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        validate_container_id(id)?;

        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_container_error(id, "create exec", e))?;

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::DockerApi(format!("start exec failed: {e}")))?
        {
            StartExecResults::Attached { output, .. } => {
                // drain until the command exits
                output
                    .try_for_each(|_| async { Ok(()) })
                    .await
                    .map_err(|e| RuntimeError::DockerApi(format!("exec output failed: {e}")))?;
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::DockerApi(format!("inspect exec failed: {e}")))?;

        inspect.exit_code.ok_or_else(|| {
            RuntimeError::DockerApi(format!("exec in container '{id}' reported no exit code"))
        })
    }

    async fn logs(&self, id: &str) -> Result<String, RuntimeError> {
        use bollard::container::LogsOptions;

        validate_container_id(id)?;

        let chunks: Vec<_> = self
            .docker
            .logs(
                id,
                Some(LogsOptions::<String> {
                    follow: false,
                    stdout: true,
                    stderr: true,
                    tail: "all".to_owned(),
                    ..Default::default()
                }),
            )
            .try_collect()
            .await
            .map_err(|e| map_container_error(id, "read logs", e))?;

        Ok(chunks.iter().map(ToString::to_string).collect())
    }

    async fn stream_logs(&self, id: &str) -> Result<LogStream, RuntimeError> {
        validate_container_id(id)?;
        let name = self.container_name(id).await?;
        Ok(forward_container_logs(
            Arc::clone(&self.docker),
            id.to_owned(),
            name,
        ))
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        use bollard::container::StopContainerOptions;

        validate_container_id(id)?;

        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
                }),
            )
            .await
            .map_err(|e| map_container_error(id, "stop container", e))
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        use bollard::container::RemoveContainerOptions;

        validate_container_id(id)?;

        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: true,
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_container_error(id, "remove container", e))
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RuntimeError::DockerConnection(format!("ping failed: {e}")))?;
        Ok(())
    }
}
