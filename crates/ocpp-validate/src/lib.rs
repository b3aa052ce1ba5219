//! The validator registry (spec §4.4): JSON-schema validation of inbound
//! and outbound method payloads, keyed by subprotocol and schema id.
//!
//! Grounded on the teacher's layering style in `tor-config`/`fs-mistrust`
//! (a registry of named, independently loaded artifacts looked up by key)
//! rather than any one file; `jsonschema` itself is an enrichment pulled in
//! because the teacher has no JSON-schema validation of its own — arti's
//! RPC layer trusts its typed Rust request structs instead.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::HashMap;

use jsonschema::JSONSchema;
use serde_json::Value;

use ocpp_frame::RpcErrorCode;

/// Which family of CALL/CALLRESULT schema-id naming a subprotocol uses.
///
/// OCPP 1.6 and 2.0.1 name schemas `urn:<action>.req` / `urn:<action>.conf`;
/// OCPP 2.1 switched to `urn:<action>Request` / `urn:<action>Response`
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaNaming {
    /// `urn:<action>.req` / `urn:<action>.conf`.
    Legacy,
    /// `urn:<action>Request` / `urn:<action>Response`.
    Modern,
}

/// Infer the schema-naming convention for a subprotocol string.
///
/// Unrecognized subprotocols default to [`SchemaNaming::Legacy`], the wider
/// of the two conventions in the field.
pub fn naming_for_protocol(protocol: &str) -> SchemaNaming {
    match protocol {
        "ocpp2.1" => SchemaNaming::Modern,
        _ => SchemaNaming::Legacy,
    }
}

/// Which half of a CALL/CALLRESULT pair is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    /// The CALL payload (request).
    Request,
    /// The CALLRESULT payload (response).
    Response,
}

/// The schema id to look up for a given action, facet, and subprotocol.
pub fn schema_id(action: &str, facet: Facet, protocol: &str) -> String {
    match (naming_for_protocol(protocol), facet) {
        (SchemaNaming::Legacy, Facet::Request) => format!("urn:{action}.req"),
        (SchemaNaming::Legacy, Facet::Response) => format!("urn:{action}.conf"),
        (SchemaNaming::Modern, Facet::Request) => format!("urn:{action}Request"),
        (SchemaNaming::Modern, Facet::Response) => format!("urn:{action}Response"),
    }
}

/// Why a payload failed schema validation, and the error code to surface
/// on the wire (spec §4.4).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationFailure {
    /// The RPC error code to report for this failure.
    pub code: RpcErrorCode,
    /// A human-readable description, usually the first `jsonschema` error.
    pub message: String,
}

/// A compiled set of schemas for one subprotocol, keyed by schema id.
#[derive(Default)]
pub struct Validator {
    schemas: HashMap<String, JSONSchema>,
}

impl Validator {
    /// Create an empty validator with no schemas loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a schema under the given schema id.
    ///
    /// Returns an error if the schema document itself is not a valid
    /// JSON Schema.
    pub fn register_schema(
        &mut self,
        schema_id: impl Into<String>,
        schema: &Value,
    ) -> Result<(), jsonschema::ValidationError<'static>> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| e.to_owned())?;
        self.schemas.insert(schema_id.into(), compiled);
        Ok(())
    }

    /// Validate `payload` against the schema registered under `schema_id`.
    ///
    /// If no schema is registered under that id, validation is treated as
    /// passing: the registry only enforces the schemas it was given.
    pub fn validate(&self, schema_id: &str, payload: &Value) -> Result<(), ValidationFailure> {
        let Some(schema) = self.schemas.get(schema_id) else {
            return Ok(());
        };
        let result = schema.validate(payload);
        match result {
            Ok(()) => Ok(()),
            Err(mut errors) => {
                let first = errors.next().expect("non-empty error iterator");
                let code = classify(&first);
                Err(ValidationFailure {
                    code,
                    message: first.to_string(),
                })
            }
        }
    }
}

/// Map a `jsonschema` validation error onto one of our wire error codes,
/// by which schema keyword it violates (spec §4.4: "depending on schema
/// facet that failed").
fn classify(error: &jsonschema::ValidationError<'_>) -> RpcErrorCode {
    use jsonschema::error::ValidationErrorKind as K;
    match &error.kind {
        K::Type { .. } => RpcErrorCode::TypeConstraintViolation,
        K::Required { .. }
        | K::AdditionalProperties { .. }
        | K::Minimum { .. }
        | K::Maximum { .. }
        | K::MinLength { .. }
        | K::MaxLength { .. }
        | K::MinItems { .. }
        | K::MaxItems { .. }
        | K::Enum { .. }
        | K::Pattern { .. } => RpcErrorCode::PropertyConstraintViolation,
        _ => RpcErrorCode::FormatViolation,
    }
}

/// Whether strict (schema) validation applies to a given subprotocol.
#[derive(Debug, Clone)]
pub enum StrictMode {
    /// Validation is enabled for every subprotocol.
    All,
    /// Validation is disabled entirely.
    None,
    /// Validation is enabled only for the listed subprotocols.
    Protocols(Vec<String>),
}

impl StrictMode {
    /// Whether strict mode applies to the given subprotocol.
    pub fn applies_to(&self, protocol: &str) -> bool {
        match self {
            StrictMode::All => true,
            StrictMode::None => false,
            StrictMode::Protocols(list) => list.iter().any(|p| p == protocol),
        }
    }
}

/// A registry of [`Validator`]s, one per subprotocol string.
#[derive(Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Validator>,
}

impl ValidatorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the validator for a subprotocol.
    pub fn insert(&mut self, protocol: impl Into<String>, validator: Validator) {
        self.validators.insert(protocol.into(), validator);
    }

    /// Validate a payload for `action`/`facet` under `protocol`, if a
    /// validator is registered for that protocol; otherwise this is a no-op.
    pub fn validate(
        &self,
        protocol: &str,
        action: &str,
        facet: Facet,
        payload: &Value,
    ) -> Result<(), ValidationFailure> {
        let Some(validator) = self.validators.get(protocol) else {
            return Ok(());
        };
        validator.validate(&schema_id(action, facet, protocol), payload)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_id_uses_legacy_naming_by_default() {
        assert_eq!(
            schema_id("Heartbeat", Facet::Request, "ocpp1.6"),
            "urn:Heartbeat.req"
        );
        assert_eq!(
            schema_id("Heartbeat", Facet::Response, "ocpp1.6"),
            "urn:Heartbeat.conf"
        );
    }

    #[test]
    fn schema_id_uses_modern_naming_for_ocpp21() {
        assert_eq!(
            schema_id("Heartbeat", Facet::Request, "ocpp2.1"),
            "urn:HeartbeatRequest"
        );
    }

    #[test]
    fn validator_rejects_wrong_type() {
        let mut v = Validator::new();
        v.register_schema(
            "urn:Heartbeat.req",
            &json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x"]}),
        )
        .unwrap();

        let err = v.validate("urn:Heartbeat.req", &json!({"x": 5})).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::TypeConstraintViolation);

        let err = v.validate("urn:Heartbeat.req", &json!({})).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::PropertyConstraintViolation);

        assert!(v.validate("urn:Heartbeat.req", &json!({"x": "ok"})).is_ok());
    }

    #[test]
    fn unregistered_schema_passes_through() {
        let v = Validator::new();
        assert!(v.validate("urn:NoSuchSchema", &json!({"anything": true})).is_ok());
    }

    #[test]
    fn strict_mode_applies_to() {
        assert!(StrictMode::All.applies_to("ocpp1.6"));
        assert!(!StrictMode::None.applies_to("ocpp1.6"));
        let list = StrictMode::Protocols(vec!["ocpp2.0.1".to_owned()]);
        assert!(list.applies_to("ocpp2.0.1"));
        assert!(!list.applies_to("ocpp1.6"));
    }
}
