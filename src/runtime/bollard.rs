// ABOUTME: Bollard-based daemon image implementation.
// ABOUTME: Supports both Docker and Podman via Docker-compatible API.

use crate::credentials::RegistryAuth;
use crate::runtime::error::{ConnectionSnafu, RuntimeError};
use crate::runtime::traits::{DaemonError, DaemonImages, LocalImage, PullProgress, PullStream};
use crate::runtime::types::{RuntimeConfig, RuntimeInfo, RuntimeType};
use crate::types::ImageRef;
use async_trait::async_trait;
use base64::Engine;
use bollard::Docker;
use bollard::models::CreateImageInfo;
use bollard::query_parameters::CreateImageOptionsBuilder;
use futures::{Stream, StreamExt};
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::net::UnixStream;

/// Seconds before a request to the daemon socket times out.
const CONNECT_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_pull_error(e: bollard::errors::Error, image_name: &str) -> DaemonError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => DaemonError::NotFound(format!("{}: {}", image_name, message)),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 401 | 403,
            message,
        } => DaemonError::AuthenticationFailed(format!("{}: {}", image_name, message)),
        bollard::errors::Error::DockerResponseServerError { message, .. } => {
            DaemonError::from_message(image_name, message)
        }
        bollard::errors::Error::DockerStreamError { error } => {
            DaemonError::from_message(image_name, error)
        }
        other => DaemonError::Runtime(format!("failed to pull {}: {}", image_name, other)),
    }
}

fn progress_from_info(info: CreateImageInfo, image_name: &str) -> Result<PullProgress, DaemonError> {
    if let Some(message) = info.error_detail.and_then(|detail| detail.message) {
        return Err(DaemonError::from_message(image_name, message));
    }

    let (current, total) = info
        .progress_detail
        .map(|detail| {
            (
                detail.current.and_then(|c| u64::try_from(c).ok()),
                detail.total.and_then(|t| u64::try_from(t).ok()),
            )
        })
        .unwrap_or_default();

    Ok(PullProgress {
        id: info.id,
        status: info.status.unwrap_or_default(),
        current,
        total,
    })
}

fn docker_credentials(auth: &RegistryAuth) -> bollard::auth::DockerCredentials {
    bollard::auth::DockerCredentials {
        username: Some(auth.username.clone()),
        password: Some(auth.password.clone()),
        serveraddress: Some(auth.server.clone()),
        ..Default::default()
    }
}

// =============================================================================
// BollardDaemon
// =============================================================================

/// Daemon image store accessed through bollard.
///
/// Supports both Docker and Podman via Docker-compatible API. When TLS
/// verification is disabled for Podman, pulls go through the native libpod
/// endpoint, which accepts `tlsVerify=false`.
pub struct BollardDaemon {
    client: Docker,
    runtime_type: RuntimeType,
    socket_path: Option<String>,
    tls_verify: bool,
}

impl BollardDaemon {
    /// Create a new BollardDaemon from a Docker client.
    pub fn new(client: Docker, runtime_type: RuntimeType) -> Self {
        Self {
            client,
            runtime_type,
            socket_path: None,
            tls_verify: true,
        }
    }

    /// Connect to a container runtime using detected runtime info.
    ///
    /// Use with `detect_local()` or `detect_runtime()` to find the socket.
    pub fn connect(info: &RuntimeInfo, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_unix(
            &info.socket_path,
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .context(ConnectionSnafu {
            socket: info.socket_path.clone(),
        })?;

        Ok(Self {
            client,
            runtime_type: info.runtime_type,
            socket_path: Some(info.socket_path.clone()),
            tls_verify: config.tls_verify,
        })
    }

    /// Get the runtime type (Docker or Podman).
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn uses_libpod(&self) -> bool {
        self.runtime_type.has_libpod_api() && !self.tls_verify && self.socket_path.is_some()
    }

    /// Pull image using Podman's native libpod API with tlsVerify=false.
    /// This allows pulling from insecure (HTTP) registries.
    async fn pull_image_libpod(
        &self,
        image_name: &str,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, DaemonError> {
        let socket_path = self.socket_path.as_ref().ok_or_else(|| {
            DaemonError::Runtime("socket path not available for libpod API".to_string())
        })?;

        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| DaemonError::Runtime(format!("failed to connect to socket: {}", e)))?;

        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| DaemonError::Runtime(format!("HTTP handshake failed: {}", e)))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!("libpod connection error: {}", e);
            }
        });

        let uri = libpod_pull_uri(image_name, platform);
        let mut req = hyper::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("Host", "localhost");
        if let Some(auth) = auth {
            req = req.header("X-Registry-Auth", libpod_auth_header(auth)?);
        }
        let req = req
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| DaemonError::Runtime(format!("failed to build request: {}", e)))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| DaemonError::Runtime(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.into_body().collect().await.map_err(|e| {
                DaemonError::Runtime(format!("failed to read error response: {}", e))
            })?;
            let body_bytes = body.to_bytes();
            let message = libpod_error_message(&body_bytes);
            if status == hyper::StatusCode::NOT_FOUND {
                return Err(DaemonError::NotFound(format!("{}: {}", image_name, message)));
            }
            return Err(DaemonError::from_message(image_name, message));
        }

        let chunks = resp
            .into_body()
            .into_data_stream()
            .map(|chunk| chunk.map_err(|e| e.to_string()));
        Ok(Box::pin(libpod_progress(chunks, image_name.to_string())))
    }
}

#[async_trait]
impl DaemonImages for BollardDaemon {
    async fn lookup_image(&self, reference: &ImageRef) -> Result<Option<LocalImage>, DaemonError> {
        let image_name = reference.to_string();

        match self.client.inspect_image(&image_name).await {
            Ok(inspect) => Ok(Some(LocalImage {
                id: inspect.id.unwrap_or_default(),
                repo_digests: inspect.repo_digests.unwrap_or_default(),
                os: inspect.os.unwrap_or_default(),
                architecture: inspect.architecture.unwrap_or_default(),
            })),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(DaemonError::Runtime(format!(
                "failed to inspect {}: {}",
                image_name, e
            ))),
        }
    }

    async fn pull_image_stream(
        &self,
        reference: &ImageRef,
        platform: Option<&str>,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, DaemonError> {
        let image_name = reference.to_string();

        if self.uses_libpod() {
            return self.pull_image_libpod(&image_name, platform, auth).await;
        }

        // Docker-compatible API (works for Docker and Podman with HTTPS registries)
        let mut opts = CreateImageOptionsBuilder::default().from_image(&image_name);
        if let Some(platform) = platform {
            opts = opts.platform(platform);
        }

        let credentials = auth.map(docker_credentials);

        let stream = self
            .client
            .create_image(Some(opts.build()), None, credentials)
            .map(move |result| match result {
                Ok(info) => progress_from_info(info, &image_name),
                Err(e) => Err(map_pull_error(e, &image_name)),
            });

        Ok(Box::pin(stream))
    }
}

// =============================================================================
// libpod helpers
// =============================================================================

/// One line of the libpod pull response.
#[derive(Debug, Deserialize)]
struct LibpodPullReport {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Serialize)]
struct LibpodAuth<'a> {
    username: &'a str,
    password: &'a str,
    serveraddress: &'a str,
}

fn libpod_pull_uri(image_name: &str, platform: Option<&str>) -> String {
    let mut uri = format!(
        "/v4.0.0/libpod/images/pull?reference={}&tlsVerify=false",
        urlencoding::encode(image_name)
    );

    if let Some(platform) = platform {
        let mut parts = platform.split('/');
        for key in ["OS", "Arch", "Variant"] {
            match parts.next() {
                Some(value) if !value.is_empty() => {
                    uri.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
                }
                _ => {}
            }
        }
    }

    uri
}

fn libpod_auth_header(auth: &RegistryAuth) -> Result<String, DaemonError> {
    let json = serde_json::to_vec(&LibpodAuth {
        username: &auth.username,
        password: &auth.password,
        serveraddress: &auth.server,
    })
    .map_err(|e| DaemonError::Runtime(format!("failed to encode credentials: {}", e)))?;

    Ok(base64::engine::general_purpose::URL_SAFE.encode(json))
}

fn libpod_error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_slice::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string())
}

fn parse_libpod_line(line: &[u8], image_name: &str) -> Option<Result<PullProgress, DaemonError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    let report: LibpodPullReport = match serde_json::from_slice(line) {
        Ok(report) => report,
        Err(e) => {
            tracing::debug!("Ignoring unparseable libpod progress line: {}", e);
            return None;
        }
    };

    if let Some(error) = report.error.filter(|e| !e.is_empty()) {
        return Some(Err(DaemonError::from_message(image_name, error)));
    }
    if let Some(stream) = report.stream {
        let status = stream.trim();
        if !status.is_empty() {
            return Some(Ok(PullProgress::status(status)));
        }
    }
    report
        .id
        .map(|id| Ok(PullProgress::status(format!("Digest: {}", id))))
}

struct LineReader<S> {
    chunks: S,
    buf: Vec<u8>,
    done: bool,
    image_name: String,
}

/// Split the libpod response body into JSON lines and map each to progress.
fn libpod_progress<S>(
    chunks: S,
    image_name: String,
) -> impl Stream<Item = Result<PullProgress, DaemonError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, String>> + Send + Unpin,
{
    let reader = LineReader {
        chunks,
        buf: Vec::new(),
        done: false,
        image_name,
    };

    futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buf.drain(..=pos).collect();
                if let Some(item) = parse_libpod_line(&line, &reader.image_name) {
                    return Some((item, reader));
                }
                continue;
            }

            if reader.done {
                let line = std::mem::take(&mut reader.buf);
                return parse_libpod_line(&line, &reader.image_name).map(|item| (item, reader));
            }

            match reader.chunks.next().await {
                Some(Ok(bytes)) => reader.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    reader.done = true;
                    reader.buf.clear();
                    let err = DaemonError::PullFailed(format!(
                        "{}: failed to read libpod response: {}",
                        reader.image_name, e
                    ));
                    return Some((Err(err), reader));
                }
                None => reader.done = true,
            }
        }
    })
}
