//! Deployment parameters
//!
//! Parameters are collected into a [`ParameterSet`] from, in order of
//! increasing precedence:
//!
//! 1. configuration defaults (`defaults.location`)
//! 2. a parameter file (YAML, JSON, or an ARM `deploymentParameters` document)
//! 3. `key=value` overrides, with YAML scalar typing
//!
//! [`ParameterSet::build`] then checks required keys, deserializes into
//! [`DeploymentParameters`] and validates every value.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::graph::REDACTED;
use crate::resources::{AdeKeyMode, ImageReference, KeyVaultSku};

/// Errors raised while loading or validating parameters
#[derive(Error, Debug)]
pub enum ParamError {
    #[error("Missing required parameter: {0}")]
    Missing(String),

    #[error("Invalid value for parameter '{name}': {message}")]
    Invalid { name: String, message: String },

    #[error("Unknown parameter: {0}")]
    Unknown(String),

    #[error("Invalid override '{0}', expected key=value")]
    InvalidOverride(String),

    #[error("Failed to read parameter file {path}: {message}")]
    File { path: PathBuf, message: String },
}

impl ParamError {
    fn invalid(name: &str, message: impl Into<String>) -> Self {
        ParamError::Invalid {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Every accepted parameter name.
pub const PARAMETER_NAMES: &[&str] = &[
    "location",
    "subnetId",
    "adminPassword",
    "adeName",
    "sseName",
    "keyName",
    "adminUsername",
    "vmSize",
    "imageReference",
    "zone",
    "dataDiskSizeGb",
    "keyVaultSku",
    "keySize",
    "tags",
    "adeKeyMode",
];

const REQUIRED: &[&str] = &["location", "subnetId"];

/// Parameters whose override text is always taken verbatim.
const STRING_PARAMETERS: &[&str] = &[
    "location",
    "subnetId",
    "adminPassword",
    "adeName",
    "sseName",
    "keyName",
    "adminUsername",
    "vmSize",
    "tags",
];

/// Key sizes accepted for RSA keys.
pub const KEY_SIZES: &[u32] = &[2048, 3072, 4096];

/// Length of generated administrator passwords.
pub const GENERATED_PASSWORD_LENGTH: usize = 24;

static SUBNET_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^/subscriptions/[^/]+/resourceGroups/[^/]+/providers/Microsoft\.Network/virtualNetworks/[^/]+/subnets/[^/]+$",
    )
    .expect("Invalid subnet id regex")
});

static NAME_ROOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,14}$").expect("Invalid name regex"));

static KEY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]{1,127}$").expect("Invalid key name regex"));

static KEY_VAULT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{1,22}[A-Za-z0-9]$").expect("Invalid vault name regex"));

/// Validated template inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentParameters {
    /// Azure region for every resource
    pub location: String,
    /// Subnet the VMs' NICs attach to
    pub subnet_id: String,
    /// Local administrator password, generated when absent
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "redact"
    )]
    pub admin_password: Option<String>,
    /// Naming root of the ADE flow
    #[serde(default = "default_ade_name")]
    pub ade_name: String,
    /// Naming root of the SSE/CMK flow
    #[serde(default = "default_sse_name")]
    pub sse_name: String,
    /// Name of the RSA key created in each vault
    #[serde(default = "default_key_name")]
    pub key_name: String,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_vm_size")]
    pub vm_size: String,
    #[serde(default)]
    pub image_reference: ImageReference,
    /// Availability zone, `0` for none
    #[serde(default)]
    pub zone: u32,
    #[serde(default = "default_data_disk_size_gb")]
    pub data_disk_size_gb: u32,
    #[serde(default)]
    pub key_vault_sku: KeyVaultSku,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    /// Tags applied to every resource
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tags: IndexMap<String, String>,
    #[serde(default)]
    pub ade_key_mode: AdeKeyMode,
}

fn default_ade_name() -> String {
    "vmAde".to_string()
}

fn default_sse_name() -> String {
    "vmSse".to_string()
}

fn default_key_name() -> String {
    "encryptKey".to_string()
}

fn default_admin_username() -> String {
    "localAdminUser".to_string()
}

fn default_vm_size() -> String {
    "Standard_D2s_v3".to_string()
}

fn default_data_disk_size_gb() -> u32 {
    128
}

fn default_key_size() -> u32 {
    3072
}

fn redact<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_str(REDACTED),
        None => serializer.serialize_none(),
    }
}

impl DeploymentParameters {
    /// Parameters with every optional value at its default.
    pub fn new(location: impl Into<String>, subnet_id: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            subnet_id: subnet_id.into(),
            admin_password: None,
            ade_name: default_ade_name(),
            sse_name: default_sse_name(),
            key_name: default_key_name(),
            admin_username: default_admin_username(),
            vm_size: default_vm_size(),
            image_reference: ImageReference::default(),
            zone: 0,
            data_disk_size_gb: default_data_disk_size_gb(),
            key_vault_sku: KeyVaultSku::default(),
            key_size: default_key_size(),
            tags: IndexMap::new(),
            ade_key_mode: AdeKeyMode::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        for (name, value) in [("location", &self.location), ("subnetId", &self.subnet_id)] {
            if value.trim().is_empty() {
                return Err(ParamError::Missing(name.to_string()));
            }
        }
        if self.location.chars().any(char::is_whitespace) {
            return Err(ParamError::invalid("location", "must not contain whitespace"));
        }
        if !SUBNET_ID.is_match(&self.subnet_id) {
            return Err(ParamError::invalid(
                "subnetId",
                "expected /subscriptions/<id>/resourceGroups/<rg>/providers/Microsoft.Network/virtualNetworks/<vnet>/subnets/<subnet>",
            ));
        }

        validate_name_root("adeName", &self.ade_name)?;
        validate_name_root("sseName", &self.sse_name)?;
        if self.ade_name.eq_ignore_ascii_case(&self.sse_name) {
            return Err(ParamError::invalid(
                "sseName",
                format!("must differ from adeName '{}'", self.ade_name),
            ));
        }

        if !KEY_NAME.is_match(&self.key_name) {
            return Err(ParamError::invalid(
                "keyName",
                "must be 1-127 characters of letters, digits and '-'",
            ));
        }
        if !KEY_SIZES.contains(&self.key_size) {
            return Err(ParamError::invalid(
                "keySize",
                format!("{} is not one of 2048, 3072, 4096", self.key_size),
            ));
        }
        if self.zone > 3 {
            return Err(ParamError::invalid("zone", "must be 0 (no zone), 1, 2 or 3"));
        }
        if !(1..=32767).contains(&self.data_disk_size_gb) {
            return Err(ParamError::invalid(
                "dataDiskSizeGb",
                "must be between 1 and 32767",
            ));
        }
        if self.admin_username.is_empty() || self.admin_username.len() > 20 {
            return Err(ParamError::invalid(
                "adminUsername",
                "must be 1-20 characters",
            ));
        }
        if self.vm_size.trim().is_empty() {
            return Err(ParamError::invalid("vmSize", "must not be empty"));
        }
        if let Some(password) = &self.admin_password {
            validate_password(password)?;
        }
        Ok(())
    }

    /// Fill in a generated password when none was supplied.
    pub fn ensure_admin_password(&mut self) -> &str {
        self.admin_password
            .get_or_insert_with(generate_password)
            .as_str()
    }

    /// Whether the password was supplied rather than generated. Only
    /// meaningful before [`ensure_admin_password`](Self::ensure_admin_password).
    pub fn has_admin_password(&self) -> bool {
        self.admin_password.is_some()
    }
}

fn validate_name_root(param: &str, name: &str) -> Result<(), ParamError> {
    if NAME_ROOT.is_match(name) {
        Ok(())
    } else {
        Err(ParamError::invalid(
            param,
            format!(
                "'{}' must be 1-15 characters of letters, digits and '-', starting with a letter",
                name
            ),
        ))
    }
}

/// Check a composed key vault name: 3-24 characters of letters, digits and
/// `-`, starting with a letter, not ending with `-`, no `--`.
pub fn validate_key_vault_name(name: &str) -> Result<(), ParamError> {
    if KEY_VAULT_NAME.is_match(name) && !name.contains("--") {
        Ok(())
    } else {
        Err(ParamError::invalid(
            "keyVaultName",
            format!("'{}' is not a valid key vault name", name),
        ))
    }
}

fn validate_password(password: &str) -> Result<(), ParamError> {
    let len = password.chars().count();
    if !(12..=123).contains(&len) {
        return Err(ParamError::invalid(
            "adminPassword",
            "must be 12-123 characters",
        ));
    }
    let classes = [
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    if classes.iter().filter(|present| **present).count() < 3 {
        return Err(ParamError::invalid(
            "adminPassword",
            "must contain three of: uppercase, lowercase, digit, special character",
        ));
    }
    Ok(())
}

const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnpqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SPECIAL: &[u8] = b"!#$%&*+-=?@^_";

/// Generate a password with at least one character of every class.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    let classes = [UPPER, LOWER, DIGITS, SPECIAL];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while chars.len() < GENERATED_PASSWORD_LENGTH {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

/// Raw parameter values awaiting validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: serde_json::Map<String, serde_json::Value>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML or JSON parameter file. ARM deployment parameter files
    /// (`{"parameters": {"x": {"value": ...}}}`) are unwrapped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParamError> {
        let path = path.as_ref();
        let file_error = |message: String| ParamError::File {
            path: path.to_path_buf(),
            message,
        };

        let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let value: serde_json::Value =
            serde_yaml::from_str(&content).map_err(|e| file_error(e.to_string()))?;

        let mut set = Self::new();
        set.merge_document(value)
            .map_err(|e| file_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), count = set.values.len(), "loaded parameter file");
        Ok(set)
    }

    fn merge_document(&mut self, value: serde_json::Value) -> Result<(), ParamError> {
        let serde_json::Value::Object(mut map) = value else {
            return Err(ParamError::invalid(
                "parameters",
                "parameter document must be a mapping",
            ));
        };

        let is_arm = map.contains_key("$schema") || map.contains_key("contentVersion");
        if is_arm {
            let Some(serde_json::Value::Object(params)) = map.remove("parameters") else {
                return Err(ParamError::invalid(
                    "parameters",
                    "deployment parameter file has no 'parameters' object",
                ));
            };
            for (key, entry) in params {
                let value = entry
                    .get("value")
                    .cloned()
                    .ok_or_else(|| ParamError::invalid(&key, "missing 'value'"))?;
                self.values.insert(key, value);
            }
        } else {
            self.values.extend(map);
        }
        Ok(())
    }

    /// Set a value, replacing any earlier one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Set a value only when nothing has provided one yet.
    pub fn set_default(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        if !self.values.contains_key(key) {
            self.values.insert(key.to_string(), value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Apply a `key=value` override. Values of string parameters and tags
    /// are kept verbatim; anything else is typed as a YAML scalar, so
    /// `zone=1` is a number and `keyName=1234` stays a string. A dotted key
    /// (`tags.env=dev`) sets a field of an object parameter.
    pub fn apply_override(&mut self, assignment: &str) -> Result<(), ParamError> {
        let (key, raw) = assignment
            .split_once('=')
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| ParamError::InvalidOverride(assignment.to_string()))?;

        let mut segments = key.split('.');
        let Some(head) = segments.next() else {
            return Err(ParamError::InvalidOverride(assignment.to_string()));
        };
        let value = if STRING_PARAMETERS.contains(&head) {
            serde_json::Value::String(raw.to_string())
        } else {
            typed_scalar(raw)
        };
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            self.values.insert(head.to_string(), value);
            return Ok(());
        }

        let mut slot = self
            .values
            .entry(head.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        for segment in rest {
            if !slot.is_object() {
                *slot = serde_json::Value::Object(serde_json::Map::new());
            }
            let serde_json::Value::Object(map) = slot else {
                return Err(ParamError::InvalidOverride(assignment.to_string()));
            };
            slot = map
                .entry(segment.to_string())
                .or_insert(serde_json::Value::Null);
        }
        *slot = value;
        Ok(())
    }

    pub fn apply_overrides<'a>(
        &mut self,
        assignments: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ParamError> {
        assignments
            .into_iter()
            .try_for_each(|assignment| self.apply_override(assignment))
    }

    /// Merge another set on top of this one.
    pub fn merge(&mut self, other: ParameterSet) {
        self.values.extend(other.values);
    }

    /// Check required and unknown keys, deserialize and validate.
    pub fn build(self) -> Result<DeploymentParameters, ParamError> {
        if let Some(unknown) = self
            .values
            .keys()
            .find(|k| !PARAMETER_NAMES.contains(&k.as_str()))
        {
            return Err(ParamError::Unknown(unknown.clone()));
        }
        for name in REQUIRED {
            match self.values.get(*name) {
                None | Some(serde_json::Value::Null) => {
                    return Err(ParamError::Missing(name.to_string()))
                }
                _ => {}
            }
        }

        let params: DeploymentParameters =
            serde_json::from_value(serde_json::Value::Object(self.values))
                .map_err(|e| ParamError::invalid("parameters", e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}

fn typed_scalar(raw: &str) -> serde_json::Value {
    let value: serde_json::Value = serde_yaml::from_str(raw)
        .ok()
        .filter(|v: &serde_json::Value| !v.is_object() && !v.is_array())
        .unwrap_or_else(|| serde_json::Value::String(raw.to_string()));
    if value.is_null() && !raw.is_empty() && raw != "null" && raw != "~" {
        serde_json::Value::String(raw.to_string())
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SUBNET: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-net/providers/Microsoft.Network/virtualNetworks/vnet01/subnets/default";

    fn minimal() -> ParameterSet {
        let mut set = ParameterSet::new();
        set.set("location", "westeurope");
        set.set("subnetId", SUBNET);
        set
    }

    #[test]
    fn test_defaults() {
        let params = minimal().build().unwrap();
        assert_eq!(params, DeploymentParameters::new("westeurope", SUBNET));
        assert_eq!(params.ade_name, "vmAde");
        assert_eq!(params.sse_name, "vmSse");
        assert_eq!(params.key_name, "encryptKey");
        assert_eq!(params.key_size, 3072);
        assert!(!params.has_admin_password());
    }

    #[test]
    fn test_missing_required() {
        let mut set = ParameterSet::new();
        set.set("location", "westeurope");
        assert!(matches!(set.build(), Err(ParamError::Missing(name)) if name == "subnetId"));
    }

    #[test]
    fn test_unknown_parameter() {
        let mut set = minimal();
        set.set("keyVaultName", "kv-custom");
        assert!(matches!(set.build(), Err(ParamError::Unknown(name)) if name == "keyVaultName"));
    }

    #[test]
    fn test_overrides_are_yaml_typed() {
        let mut set = minimal();
        set.apply_overrides(["zone=2", "adeName=vmAde01", "tags.env=dev", "keyVaultSku=premium"])
            .unwrap();
        let params = set.build().unwrap();
        assert_eq!(params.zone, 2);
        assert_eq!(params.ade_name, "vmAde01");
        assert_eq!(params.tags.get("env").map(String::as_str), Some("dev"));
        assert_eq!(params.key_vault_sku, KeyVaultSku::Premium);
    }

    #[test]
    fn test_invalid_override() {
        let mut set = minimal();
        assert!(matches!(
            set.apply_override("zone"),
            Err(ParamError::InvalidOverride(_))
        ));
        assert!(matches!(
            set.apply_override("=1"),
            Err(ParamError::InvalidOverride(_))
        ));
    }

    #[test]
    fn test_arm_parameter_document() {
        let mut set = ParameterSet::new();
        set.merge_document(json!({
            "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#",
            "contentVersion": "1.0.0.0",
            "parameters": {
                "location": {"value": "northeurope"},
                "subnetId": {"value": SUBNET},
                "sseName": {"value": "vmCmk"}
            }
        }))
        .unwrap();
        let params = set.build().unwrap();
        assert_eq!(params.location, "northeurope");
        assert_eq!(params.sse_name, "vmCmk");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            ("subnetId", json!("/subscriptions/x/resourceGroups/y")),
            ("adeName", json!("1vm")),
            ("adeName", json!("averyveryverylongname")),
            ("sseName", json!("vmAde")),
            ("keyName", json!("bad_key")),
            ("keySize", json!(1024)),
            ("zone", json!(4)),
            ("adminPassword", json!("short")),
        ];
        for (key, value) in cases {
            let mut set = minimal();
            set.set(key, value.clone());
            assert!(
                matches!(set.build(), Err(ParamError::Invalid { .. })),
                "{}={} should be rejected",
                key,
                value
            );
        }
    }

    #[test]
    fn test_key_vault_name() {
        assert!(validate_key_vault_name("kv-vmAde").is_ok());
        assert!(validate_key_vault_name("kv").is_err());
        assert!(validate_key_vault_name("kv-").is_err());
        assert!(validate_key_vault_name("kv--x").is_err());
        assert!(validate_key_vault_name("kv-abcdefghijklmnopqrstuv").is_err());
    }

    #[test]
    fn test_generated_password() {
        for _ in 0..50 {
            let password = generate_password();
            assert_eq!(password.len(), GENERATED_PASSWORD_LENGTH);
            assert!(password.chars().any(|c| c.is_ascii_uppercase()));
            assert!(password.chars().any(|c| c.is_ascii_lowercase()));
            assert!(password.chars().any(|c| c.is_ascii_digit()));
            assert!(password.chars().any(|c| !c.is_ascii_alphanumeric()));
            assert!(validate_password(&password).is_ok());
        }
    }

    #[test]
    fn test_password_redacted_when_serialized() {
        let mut params = DeploymentParameters::new("westeurope", SUBNET);
        params.ensure_admin_password();
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["adminPassword"], json!(REDACTED));
        assert_eq!(value["subnetId"], json!(SUBNET));
    }
}
