//! Security profiles and hot-rotatable TLS material (spec §4.11, §6
//! "TLS profiles").

use std::sync::RwLock;

/// Which combination of transport security and client authentication a
/// listener enforces (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProfile {
    /// No transport security, no authentication.
    None,
    /// Plain WebSocket, HTTP Basic Auth at the handshake.
    BasicAuth,
    /// TLS plus HTTP Basic Auth.
    TlsBasicAuth,
    /// TLS with a required client certificate.
    TlsClientCert,
}

impl SecurityProfile {
    /// Whether this profile requires the transport to be TLS.
    pub fn requires_tls(self) -> bool {
        matches!(self, Self::TlsBasicAuth | Self::TlsClientCert)
    }

    /// Whether this profile requires an `Authorization: Basic` header.
    pub fn requires_basic_auth(self) -> bool {
        matches!(self, Self::BasicAuth | Self::TlsBasicAuth)
    }

    /// Whether this profile requires a client certificate.
    pub fn requires_client_cert(self) -> bool {
        matches!(self, Self::TlsClientCert)
    }
}

/// Opaque TLS material. Kept as raw bytes — this crate doesn't wire up a
/// concrete TLS implementation (the caller terminates TLS and hands
/// `ocpp-server` an already-upgraded `Transport`); `TlsContext` exists so
/// that material can be hot-rotated and the currently active bytes
/// inspected by whatever does the terminating.
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    /// PEM-encoded certificate chain.
    pub cert: Option<Vec<u8>>,
    /// PEM-encoded private key.
    pub key: Option<Vec<u8>>,
    /// PEM-encoded CA bundle, used to verify client certificates under
    /// [`SecurityProfile::TlsClientCert`].
    pub ca: Option<Vec<u8>>,
}

/// A partial update applied to [`TlsContext`] (spec §4.11, "TLS
/// hot-rotate"). Fields left `None` are unchanged.
#[derive(Debug, Clone, Default)]
pub struct TlsUpdate {
    /// Replacement certificate chain, if rotating it.
    pub cert: Option<Vec<u8>>,
    /// Replacement private key, if rotating it.
    pub key: Option<Vec<u8>>,
    /// Replacement CA bundle, if rotating it.
    pub ca: Option<Vec<u8>>,
}

/// Shared, hot-rotatable TLS context for one listener.
pub struct TlsContext {
    profile: SecurityProfile,
    material: RwLock<TlsMaterial>,
}

impl TlsContext {
    /// Build a context for `profile` seeded with `material`.
    pub fn new(profile: SecurityProfile, material: TlsMaterial) -> Self {
        Self {
            profile,
            material: RwLock::new(material),
        }
    }

    /// A snapshot of the currently active material.
    pub fn current(&self) -> TlsMaterial {
        self.material.read().expect("lock poisoned").clone()
    }

    /// Apply a hot-rotate update in place. A no-op on profiles that
    /// don't carry TLS at all (spec §4.11: rotation only applies to
    /// TLS-bearing profiles).
    pub fn update(&self, update: TlsUpdate) {
        if !self.profile.requires_tls() {
            return;
        }
        let mut material = self.material.write().expect("lock poisoned");
        if let Some(cert) = update.cert {
            material.cert = Some(cert);
        }
        if let Some(key) = update.key {
            material.key = Some(key);
        }
        if let Some(ca) = update.ca {
            material.ca = Some(ca);
        }
    }
}
