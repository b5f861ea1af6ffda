//! OpenStack credentials and the cipher protecting the stored password.
//!
//! Passwords in the config file may be AES-256-CFB ciphertext, hex encoded.
//! The cipher is an ordinary value built from config and handed to whoever
//! resolves credentials, so tests can run with [`CredentialCipher::Plain`].
use std::fmt;

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use anyhow::{Context, Result, anyhow};

use crate::wire;

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
/// iv used for every credential
pub const CREDENTIAL_IV: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];

#[derive(Clone, PartialEq, Eq, Default)]
pub enum CredentialCipher {
    /// passwords are stored as-is
    #[default]
    Plain,
    AesCfb { key: [u8; KEY_LEN] },
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialCipher::Plain => f.write_str("Plain"),
            CredentialCipher::AesCfb { .. } => f.write_str("AesCfb { key: <redacted> }"),
        }
    }
}

impl CredentialCipher {
    pub fn aes_cfb(key: [u8; KEY_LEN]) -> Self {
        CredentialCipher::AesCfb { key }
    }

    /// build an AES cipher from a hex encoded 32 byte key
    pub fn from_hex_key(key: &str) -> Result<Self> {
        let bytes = hex::decode(key.trim()).context("credential key is not valid hex")?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow!("credential key must be {KEY_LEN} bytes, got {}", b.len()))?;
        Ok(Self::aes_cfb(key))
    }

    pub fn encrypt(&self, plain: &str) -> Result<String> {
        match self {
            CredentialCipher::Plain => Ok(plain.to_owned()),
            CredentialCipher::AesCfb { key } => {
                let mut buf = plain.as_bytes().to_vec();
                Aes256CfbEnc::new_from_slices(key, &CREDENTIAL_IV)
                    .map_err(|err| anyhow!("invalid cipher parameters: {err}"))?
                    .encrypt(&mut buf);
                Ok(hex::encode(buf))
            }
        }
    }

    pub fn decrypt(&self, text: &str) -> Result<String> {
        match self {
            CredentialCipher::Plain => Ok(text.to_owned()),
            CredentialCipher::AesCfb { key } => {
                let mut buf = hex::decode(text.trim()).context("password is not hex ciphertext")?;
                Aes256CfbDec::new_from_slices(key, &CREDENTIAL_IV)
                    .map_err(|err| anyhow!("invalid cipher parameters: {err}"))?
                    .decrypt(&mut buf);
                String::from_utf8(buf).context("decrypted password is not utf-8")
            }
        }
    }
}

/// credentials as configured, password still in stored form
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    auth_url: String,
    username: String,
    password: String,
    project: String,
    domain: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("project", &self.project)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// options handed to whatever authenticates against keystone
#[derive(Clone, PartialEq, Eq)]
pub struct AuthOptions {
    pub identity_endpoint: String,
    pub username: String,
    pub password: String,
    pub tenant_name: String,
    /// only set for keystone v3
    pub domain_name: Option<String>,
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("identity_endpoint", &self.identity_endpoint)
            .field("username", &self.username)
            .field("tenant_name", &self.tenant_name)
            .field("domain_name", &self.domain_name)
            .finish_non_exhaustive()
    }
}

impl From<wire::OpenStackConf> for Credentials {
    fn from(conf: wire::OpenStackConf) -> Self {
        Self {
            auth_url: conf.auth_url,
            username: conf.username,
            password: conf.password,
            project: conf.project,
            domain: conf.domain,
        }
    }
}

impl Credentials {
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn is_v3(&self) -> bool {
        self.auth_url.trim_end_matches('/').ends_with("v3")
    }

    /// decrypt the password and pick v2 or v3 style options
    pub fn resolve(&self, cipher: &CredentialCipher) -> Result<AuthOptions> {
        if self.auth_url.is_empty() {
            anyhow::bail!("openstack auth_url is not set");
        }
        Ok(AuthOptions {
            identity_endpoint: self.auth_url.clone(),
            username: self.username.clone(),
            password: cipher.decrypt(&self.password)?,
            tenant_name: self.project.clone(),
            domain_name: if self.is_v3() {
                self.domain.clone()
            } else {
                None
            },
        })
    }
}
