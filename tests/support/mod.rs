// ABOUTME: Test support utilities.
// ABOUTME: In-memory daemon and registry doubles plus ledger fixtures.

use async_trait::async_trait;
use pullwise::credentials::RegistryAuth;
use pullwise::ledger::Ledger;
use pullwise::registry::{
    BlobDescriptor, OCI_IMAGE_MANIFEST_MEDIA_TYPE, RegistryError, RegistryImages, RemoteImage,
    sha256_digest,
};
use pullwise::runtime::{DaemonError, DaemonImages, LocalImage, PullProgress, PullStream};
use pullwise::types::ImageRef;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, Once};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("pullwise=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Ledger at `<dir>/.pack/image.json`.
#[allow(dead_code)]
pub fn ledger_in(dir: &tempfile::TempDir) -> Ledger {
    Ledger::new(dir.path().join(".pack").join("image.json"))
}

#[allow(dead_code)]
pub fn local_image(id: &str) -> LocalImage {
    LocalImage {
        id: id.to_string(),
        repo_digests: Vec::new(),
        os: "linux".to_string(),
        architecture: "amd64".to_string(),
    }
}

/// A recorded pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullCall {
    pub reference: String,
    pub platform: Option<String>,
}

/// Daemon double keyed by canonical reference.
///
/// A successful pull makes the image present. Queued failures are returned,
/// one per pull, as an error inside the progress stream.
#[derive(Default)]
pub struct MockDaemon {
    images: Mutex<HashMap<String, LocalImage>>,
    pulls: Mutex<Vec<PullCall>>,
    failures: Mutex<VecDeque<DaemonError>>,
    lookups: Mutex<usize>,
    hang: bool,
}

#[allow(dead_code)]
impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// A daemon whose pulls never finish.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn with_image(self, reference: &str, id: &str) -> Self {
        self.insert(reference, id);
        self
    }

    pub fn with_failure(self, error: DaemonError) -> Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    pub fn insert(&self, reference: &str, id: &str) {
        let key = ImageRef::parse(reference).unwrap().canonical();
        self.images.lock().unwrap().insert(key, local_image(id));
    }

    pub fn remove(&self, reference: &str) {
        let key = ImageRef::parse(reference).unwrap().canonical();
        self.images.lock().unwrap().remove(&key);
    }

    pub fn pulls(&self) -> Vec<PullCall> {
        self.pulls.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl DaemonImages for MockDaemon {
    async fn lookup_image(&self, reference: &ImageRef) -> Result<Option<LocalImage>, DaemonError> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self
            .images
            .lock()
            .unwrap()
            .get(&reference.canonical())
            .cloned())
    }

    async fn pull_image_stream(
        &self,
        reference: &ImageRef,
        platform: Option<&str>,
        _auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, DaemonError> {
        self.pulls.lock().unwrap().push(PullCall {
            reference: reference.canonical(),
            platform: platform.map(str::to_string),
        });

        if self.hang {
            return Ok(Box::pin(futures::stream::pending()));
        }

        let mut items = vec![Ok(PullProgress::status(format!(
            "Pulling from {}",
            reference.repository()
        )))];

        match self.failures.lock().unwrap().pop_front() {
            Some(error) => items.push(Err(error)),
            None => {
                let id = sha256_digest(reference.canonical().as_bytes());
                self.images
                    .lock()
                    .unwrap()
                    .insert(reference.canonical(), local_image(&id));
                items.push(Ok(PullProgress::layer("a1b2c3", "Downloading").with_progress(5, 10)));
                items.push(Ok(PullProgress::layer("a1b2c3", "Pull complete")));
                items.push(Ok(PullProgress::status(format!("Digest: {}", id))));
            }
        }

        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Build a consistent image: real digests over the given config and layers.
#[allow(dead_code)]
pub fn remote_image(config: &[u8], layers: &[&[u8]]) -> (RemoteImage, Vec<(String, Vec<u8>)>) {
    let config_desc = BlobDescriptor {
        media_type: "application/vnd.oci.image.config.v1+json".to_string(),
        digest: sha256_digest(config),
        size: config.len() as u64,
    };
    let layer_descs: Vec<BlobDescriptor> = layers
        .iter()
        .map(|data| BlobDescriptor {
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
            digest: sha256_digest(data),
            size: data.len() as u64,
        })
        .collect();

    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": OCI_IMAGE_MANIFEST_MEDIA_TYPE,
        "config": config_desc,
        "layers": layer_descs,
    }))
    .unwrap();

    let blobs = layers
        .iter()
        .map(|data| (sha256_digest(data), data.to_vec()))
        .collect();

    let image = RemoteImage {
        digest: sha256_digest(&manifest),
        media_type: OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string(),
        manifest,
        config: config_desc,
        config_data: config.to_vec(),
        layers: layer_descs,
    };
    (image, blobs)
}

/// Registry double keyed by canonical reference.
#[derive(Default)]
pub struct MockRegistry {
    images: HashMap<String, RemoteImage>,
    blobs: HashMap<String, Vec<u8>>,
    resolved: Mutex<Vec<(String, Option<String>)>>,
    fetched: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, reference: &str, config: &[u8], layers: &[&[u8]]) -> Self {
        let (image, blobs) = remote_image(config, layers);
        let key = ImageRef::parse(reference).unwrap().canonical();
        self.images.insert(key, image);
        self.blobs.extend(blobs);
        self
    }

    pub fn image(&self, reference: &str) -> &RemoteImage {
        let key = ImageRef::parse(reference).unwrap().canonical();
        &self.images[&key]
    }

    pub fn resolved(&self) -> Vec<(String, Option<String>)> {
        self.resolved.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryImages for MockRegistry {
    async fn resolve(
        &self,
        reference: &ImageRef,
        platform: Option<&str>,
        _auth: Option<&RegistryAuth>,
    ) -> Result<Option<RemoteImage>, RegistryError> {
        self.resolved
            .lock()
            .unwrap()
            .push((reference.canonical(), platform.map(str::to_string)));
        Ok(self.images.get(&reference.canonical()).cloned())
    }

    async fn fetch_blob(
        &self,
        reference: &ImageRef,
        blob: &BlobDescriptor,
        _auth: Option<&RegistryAuth>,
    ) -> Result<Vec<u8>, RegistryError> {
        self.fetched.lock().unwrap().push(blob.digest.clone());
        self.blobs
            .get(&blob.digest)
            .cloned()
            .ok_or_else(|| RegistryError::Request {
                reference: reference.canonical(),
                message: format!("blob {} unknown", blob.digest),
            })
    }
}
