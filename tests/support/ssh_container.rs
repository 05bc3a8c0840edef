// ABOUTME: Disposable OpenSSH server for live integration tests.
// ABOUTME: Starts one linuxserver/openssh-server container per test binary and removes it at exit.

use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use futures::TryStreamExt;
use sshman::config::ClientConfig;
use sshman::ssh::{AuthSession, DialSettings, RusshTransport, Transport};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const IMAGE: &str = "lscr.io/linuxserver/openssh-server:latest";
const SSHD_PORT: &str = "2222/tcp";
const TEST_USER: &str = "testuser";
const TEST_PASSWORD: &str = "hunter2-live";
const KEY_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/id_ed25519");

static CONTAINER_ID: OnceLock<String> = OnceLock::new();
static SHARED: tokio::sync::OnceCell<SshServer> = tokio::sync::OnceCell::const_new();

#[ctor::dtor]
fn remove_container() {
    let Some(id) = CONTAINER_ID.get() else {
        return;
    };
    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    rt.block_on(async {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            let _ = docker.remove_container(id, Some(options)).await;
        }
    });
}

/// The server shared by every test in this binary.
pub async fn shared_container() -> &'static SshServer {
    SHARED
        .get_or_init(|| async { SshServer::start().await.expect("start SSH server container") })
        .await
}

/// A running server reachable on a Docker-assigned localhost port.
pub struct SshServer {
    port: u16,
}

impl SshServer {
    async fn start() -> Result<Self, BoxError> {
        let docker = Docker::connect_with_local_defaults()?;
        let public_key = std::fs::read_to_string(format!("{KEY_PATH}.pub"))?;

        docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: Some(IMAGE.to_string()),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await?;

        // An empty host port lets Docker pick a free one.
        let bindings = HashMap::from([(
            SSHD_PORT.to_string(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: None,
            }]),
        )]);
        let body = ContainerCreateBody {
            image: Some(IMAGE.to_string()),
            env: Some(vec![
                format!("USER_NAME={TEST_USER}"),
                "PASSWORD_ACCESS=true".to_string(),
                format!("USER_PASSWORD={TEST_PASSWORD}"),
                format!("PUBLIC_KEY={}", public_key.trim()),
            ]),
            host_config: Some(HostConfig {
                port_bindings: Some(bindings),
                ..Default::default()
            }),
            ..Default::default()
        };
        let name = format!("sshman-live-{}", std::process::id());
        let created = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name),
                    ..Default::default()
                }),
                body,
            )
            .await?;
        let _ = CONTAINER_ID.set(created.id.clone());

        docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await?;

        let port = published_port(&docker, &created.id).await?;
        wait_for_key_exchange(port).await?;
        Ok(Self { port })
    }

    /// Config pointed at this server with no credentials.
    ///
    /// The image's sshd has no AcceptEnv, so the default env is dropped.
    pub fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new("127.0.0.1")
            .port(self.port)
            .username(TEST_USER)
            .timeout(Duration::from_secs(10));
        config.env.clear();
        config
    }

    pub fn password_config(&self) -> ClientConfig {
        self.base_config().password(TEST_PASSWORD)
    }

    pub fn key_config(&self) -> ClientConfig {
        self.base_config().private_key(KEY_PATH)
    }

    pub fn password(&self) -> &'static str {
        TEST_PASSWORD
    }
}

async fn published_port(docker: &Docker, id: &str) -> Result<u16, BoxError> {
    let inspected = docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await?;
    let port = inspected
        .network_settings
        .and_then(|settings| settings.ports)
        .and_then(|mut ports| ports.remove(SSHD_PORT).flatten())
        .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
        .ok_or("sshd port was not published")?;
    Ok(port.parse()?)
}

/// Poll until a dial completes key exchange; sshd accepts TCP before it is ready.
async fn wait_for_key_exchange(port: u16) -> Result<(), BoxError> {
    let settings = DialSettings::new("127.0.0.1", port, Duration::from_secs(2));
    for _ in 0..60 {
        if let Ok(mut session) = RusshTransport.dial(&settings).await {
            let _ = session.close().await;
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("sshd did not finish key exchange in time".into())
}
