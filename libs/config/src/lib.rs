use std::{
    fmt,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use tracing::debug;

pub mod credentials;
pub mod dns;
pub mod host;
pub mod wire;

pub use credentials::{AuthOptions, CredentialCipher, Credentials};
pub use dns::Dns;
pub use wire::{
    DEFAULT_CNI_VERSION, DEFAULT_DATA_DIR, DEFAULT_MAX_ENIS, DEFAULT_MAX_IPS, ReleasePolicy,
    Route as StaticRoute,
};

/// allocation strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// one port per container
    #[default]
    Separate,
    /// one shared host port carrying many fixed ips
    Mix,
    /// `Mix` plus router static routes kept in step with pod placement
    MixRoute,
    /// a dedicated interface attached to the host instance per container
    Eni,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Separate => "separate",
            Mode::Mix => "mix",
            Mode::MixRoute => "mix-route",
            Mode::Eni => "eni",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported mode {0:?}")]
pub struct UnsupportedMode(pub String);

impl FromStr for Mode {
    type Err = UnsupportedMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "separate" => Ok(Mode::Separate),
            "mix" => Ok(Mode::Mix),
            "mix-route" => Ok(Mode::MixRoute),
            "eni" => Ok(Mode::Eni),
            other => Err(UnsupportedMode(other.to_owned())),
        }
    }
}

/// Validated ipam configuration. Loaded once and not changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamConfig {
    cni_version: String,
    mode: Mode,
    networks: Vec<String>,
    host_interface: Option<String>,
    host_addr: Option<IpAddr>,
    data_dir: PathBuf,
    max_ips: usize,
    max_enis: usize,
    release_policy: ReleasePolicy,
    credentials: Credentials,
    cipher: CredentialCipher,
    routes: Vec<StaticRoute>,
    resolv_conf: Option<PathBuf>,
    path: Option<PathBuf>,
}

impl IpamConfig {
    /// config with defaults for everything but the mode, networks and data dir
    pub fn new(mode: Mode, networks: Vec<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            cni_version: DEFAULT_CNI_VERSION.to_owned(),
            mode,
            networks,
            host_interface: None,
            host_addr: None,
            data_dir: data_dir.into(),
            max_ips: DEFAULT_MAX_IPS,
            max_enis: DEFAULT_MAX_ENIS,
            release_policy: ReleasePolicy::default(),
            credentials: Credentials::default(),
            cipher: CredentialCipher::Plain,
            routes: Vec::new(),
            resolv_conf: None,
            path: None,
        }
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::parse_str(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to find config at {}", &path.display()))?,
        )?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let s = s.as_ref();
        let conf = match serde_json::from_str::<wire::NetConf>(s) {
            Ok(conf) => conf,
            Err(_err) => serde_yaml::from_str::<wire::NetConf>(s)
                .context("config is neither valid json nor yaml")?,
        };
        let config = Self::from_wire(conf)?;
        debug!(?config);
        Ok(config)
    }

    pub fn from_wire(conf: wire::NetConf) -> Result<Self> {
        let wire::Ipam {
            neutron,
            openstack,
            credential_key,
            routes,
            resolv_conf,
            ..
        } = conf.ipam;

        let mode = neutron.mode.parse::<Mode>()?;
        let cipher = match credential_key {
            Some(key) => CredentialCipher::from_hex_key(&key)?,
            None => CredentialCipher::Plain,
        };

        Ok(Self {
            cni_version: if conf.cni_version.is_empty() {
                DEFAULT_CNI_VERSION.to_owned()
            } else {
                conf.cni_version
            },
            mode,
            networks: neutron.networks,
            host_interface: neutron.host_interface,
            host_addr: None,
            data_dir: neutron.data_dir,
            max_ips: neutron.max_ips,
            max_enis: neutron.max_enis,
            release_policy: neutron.release_policy,
            credentials: openstack.into(),
            cipher,
            routes,
            resolv_conf,
            path: None,
        })
    }

    pub fn cni_version(&self) -> &str {
        &self.cni_version
    }
    pub fn mode(&self) -> Mode {
        self.mode
    }
    pub fn networks(&self) -> &[String] {
        &self.networks
    }
    /// the network allocations are made on
    pub fn network(&self) -> Option<&str> {
        self.networks.first().map(String::as_str)
    }
    pub fn host_interface(&self) -> Option<&str> {
        self.host_interface.as_deref()
    }
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
    pub fn max_ips(&self) -> usize {
        self.max_ips
    }
    pub fn max_enis(&self) -> usize {
        self.max_enis
    }
    pub fn release_policy(&self) -> ReleasePolicy {
        self.release_policy
    }
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }
    pub fn routes(&self) -> &[StaticRoute] {
        &self.routes
    }
    pub fn resolv_conf(&self) -> Option<&Path> {
        self.resolv_conf.as_deref()
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// keystone options with the password decrypted
    pub fn auth_options(&self) -> Result<AuthOptions> {
        self.credentials.resolve(&self.cipher)
    }

    /// dns settings from `resolv_conf`, if one is configured
    pub fn dns(&self) -> Result<Option<Dns>> {
        self.resolv_conf
            .as_deref()
            .map(Dns::from_resolv_conf)
            .transpose()
    }

    /// The host's own address. A pinned address wins, otherwise it is read
    /// from the configured (or default route) interface.
    pub fn host_addr(&self) -> Result<IpAddr> {
        match self.host_addr {
            Some(addr) => Ok(addr),
            None => host::host_addr(self.host_interface.as_deref()),
        }
    }

    pub fn with_host_interface(mut self, name: impl Into<String>) -> Self {
        self.host_interface = Some(name.into());
        self
    }
    /// pin the host address instead of reading it from an interface
    pub fn with_host_addr(mut self, addr: IpAddr) -> Self {
        self.host_addr = Some(addr);
        self
    }
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
    pub fn with_max_ips(mut self, max: usize) -> Self {
        self.max_ips = max;
        self
    }
    pub fn with_max_enis(mut self, max: usize) -> Self {
        self.max_enis = max;
        self
    }
    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }
    pub fn with_cipher(mut self, cipher: CredentialCipher) -> Self {
        self.cipher = cipher;
        self
    }
    pub fn with_routes(mut self, routes: Vec<StaticRoute>) -> Self {
        self.routes = routes;
        self
    }
}
