//! Configuration for the mirror gateway.

use {
    crate::{
        error::{MirrorError, Result},
        target::{parse_addrs, PeerTarget},
    },
    serde::Deserialize,
    std::{collections::HashMap, time::Duration},
    tonic::metadata::AsciiMetadataValue,
};

/// Configuration for one mirror gateway process.
///
/// Controls which addresses identify this node, where its local cluster
/// lives, and how often the two discovery loops run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Name stamped into the `forwarded-for` metadata of broadcast calls.
    /// Usually the pod name.
    pub pod_name: String,

    /// Address of the local cluster's gateway.  Never treated as a mirror
    /// peer.
    pub gateway_addr: String,

    /// Addresses under which other mirrors reach this node.
    pub self_mirror_addrs: Vec<String>,

    /// Interval between gossip advertise rounds (ms).
    pub advertise_interval_ms: u64,

    /// Interval between declarative reconcile passes (ms).
    pub discovery_interval_ms: u64,

    /// Maximum in-flight items per write stream.
    pub stream_concurrency: usize,

    /// Maximum in-flight items per batch write.
    pub multi_concurrency: usize,

    /// Buffer of each background loop's error channel.
    pub error_channel_size: usize,

    /// Namespace of synthesized mirror target resources.
    pub namespace: String,

    /// Labels attached to synthesized mirror target resources.
    pub labels: HashMap<String, String>,

    /// Colocation tag attached to synthesized mirror target resources.
    pub colocation: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        let concurrency = num_cpus::get().saturating_mul(4);
        Self {
            pod_name: "mirror-gateway".to_owned(),
            gateway_addr: "127.0.0.1:8081".to_owned(),
            self_mirror_addrs: Vec::new(),
            advertise_interval_ms: 1_000,
            discovery_interval_ms: 1_000,
            stream_concurrency: concurrency,
            multi_concurrency: concurrency,
            error_channel_size: 100,
            namespace: "default".to_owned(),
            labels: HashMap::new(),
            colocation: String::new(),
        }
    }
}

impl MirrorConfig {
    /// Create a config suitable for local testing with short intervals.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            pod_name: "mirror-dev".to_owned(),
            gateway_addr: "127.0.0.1:8081".to_owned(),
            self_mirror_addrs: vec!["127.0.0.1:8082".to_owned()],
            advertise_interval_ms: 20,
            discovery_interval_ms: 20,
            stream_concurrency: 4,
            multi_concurrency: 4,
            error_channel_size: 10,
            namespace: "default".to_owned(),
            labels: HashMap::new(),
            colocation: "dc1".to_owned(),
        }
    }

    /// Parses a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|err| MirrorError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.forwarded_name()?;
        self.gateway_target()?;
        self.self_targets()?;
        if self.advertise_interval_ms == 0 || self.discovery_interval_ms == 0 {
            return Err(MirrorError::Config("intervals must be non-zero".to_owned()));
        }
        if self.stream_concurrency == 0 || self.multi_concurrency == 0 {
            return Err(MirrorError::Config(
                "concurrency limits must be non-zero".to_owned(),
            ));
        }
        if self.error_channel_size == 0 {
            return Err(MirrorError::Config(
                "error channel size must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// `pod_name` as a metadata value.
    pub fn forwarded_name(&self) -> Result<AsciiMetadataValue> {
        if self.pod_name.is_empty() {
            return Err(MirrorError::Config("pod_name must be set".to_owned()));
        }
        self.pod_name.parse().map_err(|_| {
            let name = &self.pod_name;
            MirrorError::Config(format!("pod_name {name:?} is not ASCII"))
        })
    }

    pub fn gateway_target(&self) -> Result<PeerTarget> {
        PeerTarget::from_addr(&self.gateway_addr)
    }

    pub fn self_targets(&self) -> Result<Vec<PeerTarget>> {
        parse_addrs(&self.self_mirror_addrs)
    }

    pub fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.advertise_interval_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }
}
