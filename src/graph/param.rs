//! Parameter values with embedded output references.
//!
//! A [`Param`] is a JSON-like tree. Anywhere a module parameter consumes the
//! output of another module, the tree holds a [`Param::Ref`] instead of a
//! literal. References are what the graph turns into edges, and what the
//! deployer replaces with concrete values once the producer has been applied.
//!
//! Rendered documents encode a reference as `{"$ref": "<node>.outputs.<field>"}`
//! and a secret as the redaction marker.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use super::{GraphError, GraphResult};

/// Marker written in place of secret values.
pub const REDACTED: &str = "********";

/// Key used to encode a reference in rendered documents.
pub const REF_KEY: &str = "$ref";

const OUTPUTS_SEPARATOR: &str = ".outputs.";

/// A reference to an output field of another node.
///
/// `output` is a dotted path; the first segment must be one of the producing
/// kind's declared outputs (`keys.encryptKey.uriWithVersion` resolves through
/// the `keys` output).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    /// Symbolic id of the producing node
    pub node: String,
    /// Dotted output path
    pub output: String,
}

impl OutputRef {
    pub fn new(node: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            output: output.into(),
        }
    }

    /// First segment of the output path.
    pub fn field(&self) -> &str {
        self.output.split('.').next().unwrap_or(&self.output)
    }

    /// Parse `node.outputs.path` notation.
    pub fn parse(s: &str) -> GraphResult<Self> {
        match s.split_once(OUTPUTS_SEPARATOR) {
            Some((node, output)) if !node.is_empty() && !output.is_empty() => {
                Ok(Self::new(node, output))
            }
            _ => Err(GraphError::InvalidReference(s.to_string())),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.node, OUTPUTS_SEPARATOR, self.output)
    }
}

impl Serialize for OutputRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OutputRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OutputRef::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A module parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Sensitive string, never rendered in clear
    Secret(String),
    Ref(OutputRef),
    List(Vec<Param>),
    Object(IndexMap<String, Param>),
}

impl Default for Param {
    fn default() -> Self {
        Param::Object(IndexMap::new())
    }
}

impl Param {
    /// Build an object from key/value pairs, preserving order.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Param)>,
    {
        Param::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn reference(node: impl Into<String>, output: impl Into<String>) -> Self {
        Param::Ref(OutputRef::new(node, output))
    }

    pub fn get(&self, key: &str) -> Option<&Param> {
        match self {
            Param::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Param> {
        match self {
            Param::Object(map) => map.get_mut(key),
            _ => None,
        }
    }

    /// Insert a key into an object. Non-object values are left untouched.
    pub fn insert(&mut self, key: impl Into<String>, value: Param) {
        if let Param::Object(map) = self {
            map.insert(key.into(), value);
        }
    }

    /// Look up a nested value by `/`-separated path; list segments are indices.
    pub fn pointer(&self, path: &str) -> Option<&Param> {
        path.split('/')
            .filter(|seg| !seg.is_empty())
            .try_fold(self, |current, seg| match current {
                Param::Object(map) => map.get(seg),
                Param::List(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Param::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Param::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref_target(&self) -> Option<&OutputRef> {
        match self {
            Param::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Param]> {
        match self {
            Param::List(items) => Some(items),
            _ => None,
        }
    }

    /// Every reference in the tree, paired with its `/`-separated location.
    pub fn refs(&self) -> Vec<(String, &OutputRef)> {
        let mut found = Vec::new();
        self.collect_refs(String::new(), &mut found);
        found
    }

    fn collect_refs<'a>(&'a self, path: String, found: &mut Vec<(String, &'a OutputRef)>) {
        match self {
            Param::Ref(r) => found.push((path, r)),
            Param::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_refs(format!("{}/{}", path, i), found);
                }
            }
            Param::Object(map) => {
                for (key, value) in map {
                    value.collect_refs(format!("{}/{}", path, key), found);
                }
            }
            _ => {}
        }
    }

    /// Replace every reference using `lookup`, exposing secrets in clear.
    ///
    /// Fails with [`GraphError::UnresolvedReference`] on the first reference
    /// the lookup cannot satisfy.
    pub fn resolve<F>(&self, lookup: &F) -> GraphResult<serde_json::Value>
    where
        F: Fn(&OutputRef) -> Option<serde_json::Value>,
    {
        Ok(match self {
            Param::Null => serde_json::Value::Null,
            Param::Bool(b) => serde_json::Value::Bool(*b),
            Param::Int(i) => serde_json::Value::from(*i),
            Param::Str(s) | Param::Secret(s) => serde_json::Value::String(s.clone()),
            Param::Ref(r) => {
                lookup(r).ok_or_else(|| GraphError::UnresolvedReference(r.to_string()))?
            }
            Param::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(lookup))
                    .collect::<GraphResult<_>>()?,
            ),
            Param::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), value.resolve(lookup)?);
                }
                serde_json::Value::Object(out)
            }
        })
    }

    /// Convert a rendered JSON value back into a parameter tree.
    ///
    /// Objects of the single form `{"$ref": "..."}` become references. Redacted
    /// secrets come back as plain strings holding the marker.
    pub fn from_json(value: &serde_json::Value) -> GraphResult<Self> {
        Ok(match value {
            serde_json::Value::Null => Param::Null,
            serde_json::Value::Bool(b) => Param::Bool(*b),
            serde_json::Value::Number(n) => Param::Int(
                n.as_i64()
                    .ok_or_else(|| GraphError::InvalidDocument(format!("unsupported number {}", n)))?,
            ),
            serde_json::Value::String(s) => Param::Str(s.clone()),
            serde_json::Value::Array(items) => Param::List(
                items
                    .iter()
                    .map(Param::from_json)
                    .collect::<GraphResult<_>>()?,
            ),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::String(target)) = map.get(REF_KEY) {
                        return Ok(Param::Ref(OutputRef::parse(target)?));
                    }
                }
                let mut out = IndexMap::new();
                for (key, value) in map {
                    out.insert(key.clone(), Param::from_json(value)?);
                }
                Param::Object(out)
            }
        })
    }
}

impl Serialize for Param {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Param::Null => serializer.serialize_unit(),
            Param::Bool(b) => serializer.serialize_bool(*b),
            Param::Int(i) => serializer.serialize_i64(*i),
            Param::Str(s) => serializer.serialize_str(s),
            Param::Secret(_) => serializer.serialize_str(REDACTED),
            Param::Ref(r) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REF_KEY, r)?;
                map.end()
            }
            Param::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Param::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Param {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Param::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Param::Bool(b)
    }
}

impl From<i64> for Param {
    fn from(i: i64) -> Self {
        Param::Int(i)
    }
}

impl From<u32> for Param {
    fn from(i: u32) -> Self {
        Param::Int(i64::from(i))
    }
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Str(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Str(s)
    }
}

impl From<OutputRef> for Param {
    fn from(r: OutputRef) -> Self {
        Param::Ref(r)
    }
}

impl From<Vec<Param>> for Param {
    fn from(items: Vec<Param>) -> Self {
        Param::List(items)
    }
}

impl<V: Into<Param>> From<IndexMap<String, V>> for Param {
    fn from(map: IndexMap<String, V>) -> Self {
        Param::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Param {
        Param::object([
            ("name", Param::from("vmAde")),
            ("adminPassword", Param::Secret("hunter2".to_string())),
            (
                "osDisk",
                Param::object([(
                    "managedDisk",
                    Param::object([(
                        "diskEncryptionSetResourceId",
                        Param::reference("sseDiskEncryptionSet", "resourceId"),
                    )]),
                )]),
            ),
            (
                "dataDisks",
                Param::List(vec![Param::object([(
                    "managedDisk",
                    Param::object([(
                        "diskEncryptionSetResourceId",
                        Param::reference("sseDiskEncryptionSet", "resourceId"),
                    )]),
                )])]),
            ),
        ])
    }

    #[test]
    fn test_output_ref_parse_and_display() {
        let r = OutputRef::parse("adeKeyVault.outputs.keys.encryptKey.uriWithVersion").unwrap();
        assert_eq!(r.node, "adeKeyVault");
        assert_eq!(r.output, "keys.encryptKey.uriWithVersion");
        assert_eq!(r.field(), "keys");
        assert_eq!(
            r.to_string(),
            "adeKeyVault.outputs.keys.encryptKey.uriWithVersion"
        );
        assert!(OutputRef::parse("adeKeyVault.resourceId").is_err());
        assert!(OutputRef::parse(".outputs.resourceId").is_err());
    }

    #[test]
    fn test_refs_report_paths() {
        let param = sample();
        let refs = param.refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, "/osDisk/managedDisk/diskEncryptionSetResourceId");
        assert_eq!(refs[1].0, "/dataDisks/0/managedDisk/diskEncryptionSetResourceId");
    }

    #[test]
    fn test_pointer() {
        let param = sample();
        assert_eq!(param.pointer("name").and_then(Param::as_str), Some("vmAde"));
        assert!(param
            .pointer("dataDisks/0/managedDisk/diskEncryptionSetResourceId")
            .and_then(Param::as_ref_target)
            .is_some());
        assert!(param.pointer("dataDisks/7").is_none());
    }

    #[test]
    fn test_serialize_redacts_secrets_and_encodes_refs() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["adminPassword"], json!(REDACTED));
        assert_eq!(
            value["osDisk"]["managedDisk"]["diskEncryptionSetResourceId"],
            json!({"$ref": "sseDiskEncryptionSet.outputs.resourceId"})
        );
    }

    #[test]
    fn test_resolve_substitutes_refs() {
        let param = sample();
        let resolved = param
            .resolve(&|r: &OutputRef| {
                (r.node == "sseDiskEncryptionSet").then(|| json!("/subscriptions/x/des"))
            })
            .unwrap();
        assert_eq!(resolved["adminPassword"], json!("hunter2"));
        assert_eq!(
            resolved["dataDisks"][0]["managedDisk"]["diskEncryptionSetResourceId"],
            json!("/subscriptions/x/des")
        );
    }

    #[test]
    fn test_resolve_reports_missing_output() {
        let err = sample().resolve(&|_: &OutputRef| None).unwrap_err();
        assert!(matches!(err, GraphError::UnresolvedReference(_)));
    }

    #[test]
    fn test_from_json_restores_refs() {
        let rendered = serde_json::to_value(sample()).unwrap();
        let restored = Param::from_json(&rendered).unwrap();
        assert_eq!(restored.refs().len(), 2);
        assert_eq!(
            restored.get("adminPassword").and_then(Param::as_str),
            Some(REDACTED)
        );
    }
}
