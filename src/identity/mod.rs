//! Client identity mapping.
//!
//! The mapping file is maintained by an external WireGuard manager and
//! has the shape:
//!
//! ```json
//! {
//!   "clients": {
//!     "<id>": { "publicKey": "<base64>", "name": "alice", ... }
//!   }
//! }
//! ```
//!
//! It is read fresh on every sampling cycle. Entries are validated one
//! by one; a bad entry is reported and skipped without affecting the
//! rest of the file.

use crate::status::PeerSet;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;

/// Errors that make the whole mapping file unusable.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The file exists but could not be read.
    #[error("failed to read identity file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON.
    #[error("identity file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The document root is not a JSON object.
    #[error("identity file top level is not an object")]
    NotAnObject,
    /// `clients` is absent or not an object.
    #[error("identity file has no `clients` object")]
    MissingClients,
}

/// Reason a single client entry was ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    /// The client value is not a JSON object.
    #[error("entry is not an object")]
    NotAnObject,
    /// `publicKey` is absent or not a string.
    #[error("entry has no string `publicKey`")]
    MissingPublicKey,
    /// `name` is absent or not a string.
    #[error("entry has no string `name`")]
    MissingName,
}

/// Public key to client name mapping for one cycle.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    names: HashMap<String, String>,
    rejected: Vec<(String, EntryError)>,
}

fn string_field<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}

fn parse_entry(value: &Value) -> Result<(&str, &str), EntryError> {
    let entry = value.as_object().ok_or(EntryError::NotAnObject)?;
    let public_key = string_field(entry, "publicKey").ok_or(EntryError::MissingPublicKey)?;
    let name = string_field(entry, "name").ok_or(EntryError::MissingName)?;
    Ok((public_key, name))
}

impl IdentityMap {
    /// Loads the mapping from `path`.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, IdentityError> {
        let content = match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content).map(Some)
    }

    /// Parses mapping file contents.
    ///
    /// Entries are visited in document order; a public key listed twice
    /// resolves to the name seen last.
    pub fn parse(content: &str) -> Result<Self, IdentityError> {
        let document: Value = serde_json::from_str(content)?;
        let root = document.as_object().ok_or(IdentityError::NotAnObject)?;
        let clients = root
            .get("clients")
            .and_then(Value::as_object)
            .ok_or(IdentityError::MissingClients)?;

        let mut map = Self::default();
        for (id, value) in clients {
            match parse_entry(value) {
                Ok((public_key, name)) => {
                    if let Some(previous) = map.names.insert(public_key.to_string(), name.to_string()) {
                        tracing::debug!(
                            client = %id,
                            previous = %previous,
                            client_name = %name,
                            "Public key listed twice, keeping later name"
                        );
                    }
                }
                Err(reason) => {
                    tracing::debug!(client = %id, reason = %reason, "Ignoring identity entry");
                    map.rejected.push((id.clone(), reason));
                }
            }
        }

        Ok(map)
    }

    /// Returns the name mapped to `public_key`.
    pub fn name_for(&self, public_key: &str) -> Option<&str> {
        self.names.get(public_key).map(String::as_str)
    }

    /// Number of usable entries.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no usable entries were found.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Entries that were skipped, with the reason.
    pub fn rejected(&self) -> &[(String, EntryError)] {
        &self.rejected
    }

    /// Sets the display name of every peer found in the mapping.
    ///
    /// Returns the number of peers resolved.
    pub fn resolve(&self, peers: &mut PeerSet) -> usize {
        let mut resolved = 0;
        for (public_key, sample) in peers.iter_mut() {
            if let Some(name) = self.names.get(public_key) {
                sample.display_name = name.clone();
                resolved += 1;
            }
        }
        resolved
    }
}
