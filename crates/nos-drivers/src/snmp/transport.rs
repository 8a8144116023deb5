//! SNMP wire access.
//!
//! [`SnmpTransport`] is the seam between the driver logic and the network;
//! [`Snmp2Transport`] implements it with the `snmp2` crate, opening a UDP
//! session per request from the switch's configured credentials.

use async_trait::async_trait;
use snmp2::v3::{Auth, AuthProtocol, Cipher, Security};
use snmp2::{AsyncSession, Oid, Value};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use nos_fabric_common::{
    FabricError, FabricResult, SnmpAuthProtocol, SnmpPrivProtocol, SnmpVersion, SwitchConnection,
    SwitchInventory, TimeoutConfig,
};

use super::vendor::ObjectId;

/// Owned SNMP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    /// Gauge32 / Unsigned32
    Gauge32(u32),
    Null,
    /// Any other syntax, rendered for diagnostics
    Other(String),
}

impl SnmpValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Gauge32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

/// GET/SET access to a switch agent.
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    /// Reads one object.
    async fn get(&self, switch: &str, oid: &ObjectId) -> FabricResult<SnmpValue>;

    /// Writes a group of objects in one request.
    ///
    /// A PDU error status is returned as `SnmpFailure` with
    /// `error_status`/`error_index` set.
    async fn set(&self, switch: &str, bindings: &[(ObjectId, SnmpValue)]) -> FabricResult<()>;
}

/// Resolved security parameters for one switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityParams {
    /// v1/v2c community
    Community {
        version: SnmpVersion,
        community: String,
    },
    /// v3 user based security
    Usm {
        user: String,
        auth: Option<(SnmpAuthProtocol, String)>,
        privacy: Option<(SnmpPrivProtocol, String)>,
    },
}

/// Derives the security parameters of a switch.
///
/// A missing authentication or privacy key disables that layer. When a key
/// is given without an algorithm, authentication defaults to MD5 in
/// compatibility mode and SHA otherwise; privacy defaults to DES.
pub fn security_params(switch: &str, conn: &SwitchConnection) -> FabricResult<SecurityParams> {
    let snmp = &conn.snmp;
    match snmp.version {
        SnmpVersion::V1 | SnmpVersion::V2c => {
            let community = snmp.community.as_ref().ok_or_else(|| {
                FabricError::invalid_config(
                    format!("switches.{}.snmp.community", switch),
                    "required for SNMP version 1/2c",
                )
            })?;
            Ok(SecurityParams::Community {
                version: snmp.version,
                community: community.expose().to_string(),
            })
        }
        SnmpVersion::V3 => {
            let user = snmp.user.clone().ok_or_else(|| {
                FabricError::invalid_config(
                    format!("switches.{}.snmp.user", switch),
                    "required for SNMP version 3",
                )
            })?;
            let default_auth = if conn.compat_mode {
                SnmpAuthProtocol::Md5
            } else {
                SnmpAuthProtocol::Sha
            };
            let auth = snmp
                .authkey
                .as_ref()
                .map(|key| (snmp.auth.unwrap_or(default_auth), key.expose().to_string()));
            let privacy = snmp.privkey.as_ref().map(|key| {
                (
                    snmp.privacy.unwrap_or(SnmpPrivProtocol::Des),
                    key.expose().to_string(),
                )
            });
            if privacy.is_some() && auth.is_none() {
                return Err(FabricError::invalid_config(
                    format!("switches.{}.snmp.privkey", switch),
                    "privacy requires an authentication key",
                ));
            }
            Ok(SecurityParams::Usm {
                user,
                auth,
                privacy,
            })
        }
    }
}

fn to_oid(oid: &ObjectId) -> FabricResult<Oid<'static>> {
    let arcs: Vec<u64> = oid.arcs().iter().map(|a| u64::from(*a)).collect();
    Oid::from(&arcs[..]).map_err(|e| FabricError::InvalidConfig {
        field: oid.to_string(),
        message: format!("invalid object identifier: {:?}", e),
    })
}

fn to_wire(value: &SnmpValue) -> Option<Value<'_>> {
    match value {
        SnmpValue::Integer(v) => Some(Value::Integer(*v)),
        SnmpValue::OctetString(v) => Some(Value::OctetString(v)),
        SnmpValue::Gauge32(v) => Some(Value::Unsigned32(*v)),
        SnmpValue::Null => Some(Value::Null),
        SnmpValue::Other(_) => None,
    }
}

fn from_wire(value: &Value<'_>) -> SnmpValue {
    match value {
        Value::Integer(v) => SnmpValue::Integer(*v),
        Value::OctetString(v) => SnmpValue::OctetString(v.to_vec()),
        Value::Unsigned32(v) | Value::Counter32(v) => SnmpValue::Gauge32(*v),
        Value::Null => SnmpValue::Null,
        other => SnmpValue::Other(format!("{:?}", other)),
    }
}

/// [`SnmpTransport`] over UDP using `snmp2`.
pub struct Snmp2Transport {
    inventory: Arc<SwitchInventory>,
    timeouts: TimeoutConfig,
    request_id: AtomicI32,
}

impl Snmp2Transport {
    pub fn new(inventory: Arc<SwitchInventory>, timeouts: TimeoutConfig) -> Self {
        Self {
            inventory,
            timeouts,
            request_id: AtomicI32::new(1),
        }
    }

    fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed) & 0x3fff_ffff
    }

    async fn open(&self, switch: &str) -> FabricResult<AsyncSession> {
        let conn = self.inventory.get(switch)?;
        let addr = format!("{}:{}", switch, conn.snmp.port);
        let request_id = self.next_request_id();

        let session = match security_params(switch, conn)? {
            SecurityParams::Community {
                version: SnmpVersion::V1,
                community,
            } => AsyncSession::new_v1(addr.as_str(), community.as_bytes(), request_id)
                .await
                .map_err(|e| FabricError::connect_failed(switch, e))?,
            SecurityParams::Community { community, .. } => {
                AsyncSession::new_v2c(addr.as_str(), community.as_bytes(), request_id)
                    .await
                    .map_err(|e| FabricError::connect_failed(switch, e))?
            }
            SecurityParams::Usm {
                user,
                auth,
                privacy,
            } => {
                let security = match (auth, privacy) {
                    (None, _) => Security::new(user.as_bytes(), b"").with_auth(Auth::NoAuthNoPriv),
                    (Some((protocol, key)), privacy) => {
                        let protocol = match protocol {
                            SnmpAuthProtocol::Md5 => AuthProtocol::Md5,
                            SnmpAuthProtocol::Sha => AuthProtocol::Sha1,
                        };
                        let auth = match privacy {
                            None => Auth::AuthNoPriv,
                            Some((cipher, privacy_key)) => Auth::AuthPriv {
                                cipher: match cipher {
                                    SnmpPrivProtocol::Des => Cipher::Des,
                                    SnmpPrivProtocol::Aes128 => Cipher::Aes128,
                                },
                                privacy_password: privacy_key.into_bytes(),
                            },
                        };
                        Security::new(user.as_bytes(), key.as_bytes())
                            .with_auth_protocol(protocol)
                            .with_auth(auth)
                    }
                };
                let mut session = AsyncSession::new_v3(addr.as_str(), request_id, security)
                    .await
                    .map_err(|e| FabricError::connect_failed(switch, e))?;
                session
                    .init()
                    .await
                    .map_err(|e| FabricError::connect_failed(switch, format!("{:?}", e)))?;
                session
            }
        };
        Ok(session)
    }

    fn request_timeout(&self) -> Duration {
        self.timeouts.request()
    }
}

#[async_trait]
impl SnmpTransport for Snmp2Transport {
    async fn get(&self, switch: &str, oid: &ObjectId) -> FabricResult<SnmpValue> {
        let wire_oid = to_oid(oid)?;
        let request = async {
            let mut session = self.open(switch).await?;
            let mut response = session
                .get(&wire_oid)
                .await
                .map_err(|e| FabricError::snmp(switch, "GET", format!("{:?}", e)))?;

            if response.error_status != 0 {
                return Err(FabricError::SnmpFailure {
                    switch: switch.to_string(),
                    operation: "GET".to_string(),
                    detail: format!("error status {} at {}", response.error_status, oid),
                    error_status: Some(response.error_status),
                    error_index: Some(response.error_index),
                });
            }

            match response.varbinds.next() {
                Some((_, value)) => Ok(from_wire(&value)),
                None => Err(FabricError::snmp(switch, "GET", "empty response")),
            }
        };

        tokio::time::timeout(self.request_timeout(), request)
            .await
            .map_err(|_| FabricError::timeout(switch, "SNMP GET", self.request_timeout()))?
    }

    async fn set(&self, switch: &str, bindings: &[(ObjectId, SnmpValue)]) -> FabricResult<()> {
        if bindings.is_empty() {
            return Ok(());
        }

        let oids = bindings
            .iter()
            .map(|(oid, _)| to_oid(oid))
            .collect::<FabricResult<Vec<_>>>()?;
        let mut varbinds = Vec::with_capacity(bindings.len());
        for (oid, (name, value)) in oids.iter().zip(bindings) {
            let value = to_wire(value).ok_or_else(|| {
                FabricError::snmp(switch, "SET", format!("unsupported value for {}", name))
            })?;
            varbinds.push((oid, value));
        }

        let request = async {
            let mut session = self.open(switch).await?;
            let response = session
                .set(&varbinds)
                .await
                .map_err(|e| FabricError::snmp(switch, "SET", format!("{:?}", e)))?;

            if response.error_status != 0 {
                let index = response.error_index as usize;
                let at = index
                    .checked_sub(1)
                    .and_then(|i| bindings.get(i))
                    .map_or_else(|| "?".to_string(), |(oid, _)| oid.to_string());
                warn!(switch, status = response.error_status, at = %at, "SNMP SET error status");
                return Err(FabricError::SnmpFailure {
                    switch: switch.to_string(),
                    operation: "SET".to_string(),
                    detail: format!("error status {} at {}", response.error_status, at),
                    error_status: Some(response.error_status),
                    error_index: Some(response.error_index),
                });
            }
            debug!(switch, count = bindings.len(), "SNMP SET accepted");
            Ok(())
        };

        tokio::time::timeout(self.request_timeout(), request)
            .await
            .map_err(|_| FabricError::timeout(switch, "SNMP SET", self.request_timeout()))?
    }
}
