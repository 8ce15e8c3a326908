use serde::{Deserialize, Serialize};
use std::fmt;

/// A URI-like handle identifying one object on the remote service.
///
/// The service hands these out for every persisted object and accepts them
/// for lookup-by-reference. The format is opaque except for the trailing
/// item-id segment, which the service terminates with either `}` (typed
/// handles such as `...${WorkItem}CASE-1`) or `/` (plain path handles).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectUri(String);

impl ObjectUri {
    pub fn new(uri: impl Into<String>) -> Self {
        ObjectUri(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing item-id segment of the handle.
    ///
    /// For typed handles the id follows the closing `}` of the type marker;
    /// otherwise it is the last `/`-separated segment. A handle with neither
    /// separator is returned whole.
    pub fn item_id(&self) -> &str {
        if let Some(pos) = self.0.rfind('}') {
            return &self.0[pos + 1..];
        }
        match self.0.rfind('/') {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }

    /// Whether this handle's item-id segment equals the given identifier.
    pub fn refers_to(&self, id: &str) -> bool {
        self.item_id() == id
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectUri {
    fn from(uri: &str) -> Self {
        ObjectUri(uri.to_string())
    }
}

impl From<String> for ObjectUri {
    fn from(uri: String) -> Self {
        ObjectUri(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_typed_handle() {
        let uri = ObjectUri::new("remote:objects:/default/PROJ${WorkItem}CASE-1");
        assert_eq!(uri.item_id(), "CASE-1");
        assert!(uri.refers_to("CASE-1"));
        assert!(!uri.refers_to("CASE-10"));
    }

    #[test]
    fn item_id_path_handle() {
        let uri = ObjectUri::new("remote:objects:/default/PROJ/runs/smoke-42");
        assert_eq!(uri.item_id(), "smoke-42");
    }

    #[test]
    fn item_id_bare_handle() {
        let uri = ObjectUri::new("smoke-42");
        assert_eq!(uri.item_id(), "smoke-42");
    }

    #[test]
    fn serde_is_transparent() {
        let uri = ObjectUri::new("remote:objects:/default/P${TestRun}r1");
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"remote:objects:/default/P${TestRun}r1\"");
        let back: ObjectUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
    }
}
