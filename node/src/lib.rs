use commonware_codec::DecodeExt;
use commonware_cryptography::{
    bls12381::primitives::{group, sharing::Sharing, variant::MinSig},
    ed25519::{PrivateKey, PublicKey},
    Signer,
};
use commonware_utils::{from_hex_formatted, hex, quorum};
use lattice_types::Identity;
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

pub mod coin;
pub mod creator;
pub mod driver;
pub mod engine;
pub mod mempool;
pub mod orderer;
pub mod poset;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub mod defaults {
    pub const DEFAULT_LOG_LEVEL: &str = "info";
    pub const DEFAULT_WORKER_THREADS: usize = 2;
    pub const DEFAULT_CREATE_PERIOD_MS: u64 = 500;
    pub const DEFAULT_SYNC_PERIOD_MS: u64 = 500;
    pub const DEFAULT_MAX_INBOUND_SYNCS: usize = 5;
    pub const DEFAULT_MAILBOX_SIZE: usize = 128;
    pub const DEFAULT_MEMPOOL_CAPACITY: usize = 100_000;
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;
    pub const DEFAULT_N_PARENTS: usize = 2;
    pub const DEFAULT_COIN_LEVEL: u64 = 4;
    pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;
}

#[derive(Clone, PartialEq, Eq)]
pub struct HexBytes(Vec<u8>);

impl HexBytes {
    pub fn from_hex_formatted(value: &str) -> Option<Self> {
        from_hex_formatted(value).map(Self)
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for HexBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex(self.as_ref()))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let bytes = from_hex_formatted(&value)
            .ok_or_else(|| serde::de::Error::custom("expected a hex string"))?;
        Ok(Self(bytes))
    }
}

/// The fixed committee: public keys indexed by process id plus the public
/// polynomial of the threshold scheme.
#[derive(Clone)]
pub struct Committee {
    pub publics: Vec<PublicKey>,
    pub polynomial: Sharing<MinSig>,
}

impl Committee {
    pub fn new(publics: Vec<PublicKey>, polynomial: Sharing<MinSig>) -> Self {
        Self {
            publics,
            polynomial,
        }
    }

    pub fn size(&self) -> u32 {
        self.publics.len() as u32
    }

    /// Strictly more than two thirds of the committee.
    pub fn threshold(&self) -> u32 {
        quorum(self.size())
    }

    pub fn public(&self, process: u32) -> &PublicKey {
        &self.publics[process as usize]
    }

    pub fn identity(&self) -> Identity {
        *self.polynomial.public()
    }
}

/// Per-process secret configuration, loaded from a YAML file.
#[derive(Deserialize, Serialize)]
pub struct Config {
    pub private_key: HexBytes,
    pub share: HexBytes,
    pub polynomial: HexBytes,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_create_period_ms")]
    pub create_period_ms: u64,
    #[serde(default = "default_sync_period_ms")]
    pub sync_period_ms: u64,
    #[serde(default = "default_max_inbound_syncs")]
    pub max_inbound_syncs: usize,
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
    #[serde(default = "default_mempool_capacity")]
    pub mempool_capacity: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_n_parents")]
    pub n_parents: usize,
    #[serde(default = "default_coin_level")]
    pub coin_level: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_worker_threads() -> usize {
    defaults::DEFAULT_WORKER_THREADS
}

fn default_create_period_ms() -> u64 {
    defaults::DEFAULT_CREATE_PERIOD_MS
}

fn default_sync_period_ms() -> u64 {
    defaults::DEFAULT_SYNC_PERIOD_MS
}

fn default_max_inbound_syncs() -> usize {
    defaults::DEFAULT_MAX_INBOUND_SYNCS
}

fn default_mailbox_size() -> usize {
    defaults::DEFAULT_MAILBOX_SIZE
}

fn default_mempool_capacity() -> usize {
    defaults::DEFAULT_MEMPOOL_CAPACITY
}

fn default_max_frame_bytes() -> usize {
    defaults::DEFAULT_MAX_FRAME_BYTES
}

fn default_n_parents() -> usize {
    defaults::DEFAULT_N_PARENTS
}

fn default_coin_level() -> u64 {
    defaults::DEFAULT_COIN_LEVEL
}

fn default_shutdown_grace_ms() -> u64 {
    defaults::DEFAULT_SHUTDOWN_GRACE_MS
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be hex: {value}")]
    InvalidHex { field: &'static str, value: String },
    #[error("{field} is invalid: {value}")]
    InvalidDecode {
        field: &'static str,
        value: String,
        #[source]
        source: commonware_codec::Error,
    },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: usize },
    #[error("process id {id} is outside the committee of {size}")]
    UnknownProcess { id: u32, size: u32 },
    #[error("our public key does not match committee member {id}")]
    KeyMismatch { id: u32 },
    #[error("our share is for index {share} but we are process {id}")]
    ShareMismatch { share: u32, id: u32 },
}

pub struct ValidatedConfig {
    pub signer: PrivateKey,
    pub public_key: PublicKey,
    pub share: group::Share,
    pub polynomial: Sharing<MinSig>,
    pub identity: Identity,

    pub log_level: Level,
    pub worker_threads: usize,
    pub create_period: Duration,
    pub sync_period: Duration,
    pub max_inbound_syncs: usize,
    pub mailbox_size: usize,
    pub mempool_capacity: usize,
    pub max_frame: usize,
    pub n_parents: usize,
    pub coin_level: u64,
    pub shutdown_grace: Duration,
}

struct RedactedConfig<'a>(&'a Config);

impl fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = self.0;
        f.debug_struct("Config")
            .field("private_key", &"<redacted>")
            .field("share", &"<redacted>")
            .field("polynomial", &"<redacted>")
            .field("log_level", &cfg.log_level)
            .field("worker_threads", &cfg.worker_threads)
            .field("create_period_ms", &cfg.create_period_ms)
            .field("sync_period_ms", &cfg.sync_period_ms)
            .field("max_inbound_syncs", &cfg.max_inbound_syncs)
            .field("mailbox_size", &cfg.mailbox_size)
            .field("mempool_capacity", &cfg.mempool_capacity)
            .field("max_frame_bytes", &cfg.max_frame_bytes)
            .field("n_parents", &cfg.n_parents)
            .field("coin_level", &cfg.coin_level)
            .field("shutdown_grace_ms", &cfg.shutdown_grace_ms)
            .finish()
    }
}

fn redact_value(field: &'static str, value: String) -> String {
    match field {
        "private_key" | "share" => "<redacted>".to_string(),
        _ => value,
    }
}

fn decode_bytes<T: DecodeExt<()>>(field: &'static str, value: &HexBytes) -> Result<T, ConfigError> {
    T::decode(value.as_ref()).map_err(|source| ConfigError::InvalidDecode {
        field,
        value: redact_value(field, hex(value.as_ref())),
        source,
    })
}

fn ensure_nonzero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Config {
    pub fn redacted_debug(&self) -> impl fmt::Debug + '_ {
        RedactedConfig(self)
    }

    pub fn parse_signer(&self) -> Result<PrivateKey, ConfigError> {
        decode_bytes("private_key", &self.private_key)
    }

    pub fn validate(self, committee_size: u32) -> Result<ValidatedConfig, ConfigError> {
        ensure_nonzero("worker_threads", self.worker_threads)?;
        ensure_nonzero("create_period_ms", self.create_period_ms as usize)?;
        ensure_nonzero("sync_period_ms", self.sync_period_ms as usize)?;
        ensure_nonzero("max_inbound_syncs", self.max_inbound_syncs)?;
        ensure_nonzero("mailbox_size", self.mailbox_size)?;
        ensure_nonzero("mempool_capacity", self.mempool_capacity)?;
        ensure_nonzero("max_frame_bytes", self.max_frame_bytes)?;
        if self.n_parents < 2 {
            return Err(ConfigError::InvalidNonZero {
                field: "n_parents",
                value: self.n_parents,
            });
        }

        let signer = self.parse_signer()?;
        let public_key = signer.public_key();
        let share: group::Share = decode_bytes("share", &self.share)?;

        let threshold = quorum(committee_size);
        let polynomial = poly::Public::<MinSig>::decode_cfg(
            self.polynomial.as_ref(),
            &(threshold as usize),
        )
        .map_err(|source| ConfigError::InvalidDecode {
            field: "polynomial",
            value: hex(self.polynomial.as_ref()),
            source,
        })?;
        let identity = *polynomial.public();

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            signer,
            public_key,
            share,
            polynomial,
            identity,
            log_level,
            worker_threads: self.worker_threads,
            create_period: Duration::from_millis(self.create_period_ms),
            sync_period: Duration::from_millis(self.sync_period_ms),
            max_inbound_syncs: self.max_inbound_syncs,
            mailbox_size: self.mailbox_size,
            mempool_capacity: self.mempool_capacity,
            max_frame: self.max_frame_bytes,
            n_parents: self.n_parents,
            coin_level: self.coin_level,
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        })
    }
}

/// One committee member as listed in the shared committee file.
#[derive(Deserialize, Serialize)]
pub struct Member {
    pub address: SocketAddr,
    pub ingress: SocketAddr,
    pub public_key: String,
}

/// An initial ledger endowment.
#[derive(Deserialize, Serialize)]
pub struct Endowment {
    pub public_key: String,
    pub balance: u64,
}

/// The committee file every process loads: ids are positions in `members`.
#[derive(Deserialize, Serialize)]
pub struct CommitteeFile {
    pub members: Vec<Member>,
    #[serde(default)]
    pub endowments: Vec<Endowment>,
}

fn parse_public_key(field: &'static str, value: &str) -> Result<PublicKey, ConfigError> {
    let bytes = from_hex_formatted(value).ok_or(ConfigError::InvalidHex {
        field,
        value: value.to_string(),
    })?;
    PublicKey::decode(bytes.as_ref()).map_err(|source| ConfigError::InvalidDecode {
        field,
        value: value.to_string(),
        source,
    })
}

impl CommitteeFile {
    pub fn size(&self) -> u32 {
        self.members.len() as u32
    }

    pub fn publics(&self) -> Result<Vec<PublicKey>, ConfigError> {
        self.members
            .iter()
            .map(|member| parse_public_key("member public_key", &member.public_key))
            .collect()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.members.iter().map(|member| member.address).collect()
    }

    pub fn ingress_addresses(&self) -> Vec<SocketAddr> {
        self.members.iter().map(|member| member.ingress).collect()
    }

    pub fn endowments(&self) -> Result<Vec<(PublicKey, u64)>, ConfigError> {
        self.endowments
            .iter()
            .map(|endowment| {
                parse_public_key("endowment public_key", &endowment.public_key)
                    .map(|public| (public, endowment.balance))
            })
            .collect()
    }

    /// Cross-check the local secrets against the committee and produce the
    /// runtime [Committee].
    pub fn into_committee(
        &self,
        id: u32,
        validated: &ValidatedConfig,
    ) -> Result<Committee, ConfigError> {
        let publics = self.publics()?;
        if id >= self.size() {
            return Err(ConfigError::UnknownProcess {
                id,
                size: self.size(),
            });
        }
        if publics[id as usize] != validated.public_key {
            return Err(ConfigError::KeyMismatch { id });
        }
        if validated.share.index != id {
            return Err(ConfigError::ShareMismatch {
                share: validated.share.index,
                id,
            });
        }
        Ok(Committee::new(publics, validated.polynomial.clone()))
    }
}
