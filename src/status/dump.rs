//! Parser for the tabular `wg show all dump` format.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Number of non-empty fields in a peer record.
///
/// interface, public key, preshared key, endpoint, allowed ips,
/// latest handshake, rx bytes, tx bytes, persistent keepalive.
pub const PEER_FIELD_COUNT: usize = 9;

const HANDSHAKE_FIELD: usize = 5;
const RX_FIELD: usize = 6;
const TX_FIELD: usize = 7;

/// Reason a dump line was not turned into a peer sample.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineSkip {
    /// The line does not have the peer record width.
    /// Interface summary lines land here.
    #[error("expected 9 fields, found {found}")]
    FieldCount {
        /// Non-empty fields on the line.
        found: usize,
    },
    /// A numeric field could not be parsed.
    #[error("field `{field}` is not a number: {value:?}")]
    InvalidNumber {
        /// Column name.
        field: &'static str,
        /// Raw column text.
        value: String,
    },
}

/// Statistics for a single peer taken from one dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSample {
    /// Interface the peer belongs to.
    pub interface: String,
    /// Base64 public key, the join key against the identity mapping.
    pub public_key: String,
    /// Preshared key column, `(none)` when unset. Stored, not used.
    pub preshared_key: String,
    /// Last known endpoint address.
    pub endpoint: String,
    /// Allowed IPs column as reported.
    pub allowed_ips: String,
    /// Latest handshake in seconds since the epoch. Zero means never.
    pub last_handshake: i64,
    /// Bytes received from the peer.
    pub rx_bytes: i64,
    /// Bytes sent to the peer.
    pub tx_bytes: i64,
    /// Persistent keepalive column as reported (`off` or seconds).
    pub persistent_keepalive: String,
    /// Client name resolved from the identity mapping. Empty if unresolved.
    pub display_name: String,
}

impl PeerSample {
    /// Returns the latest handshake time, or `None` if there never was one.
    pub fn last_handshake_at(&self) -> Option<DateTime<Utc>> {
        if self.last_handshake == 0 {
            return None;
        }
        DateTime::from_timestamp(self.last_handshake, 0)
    }

    /// Returns true once a non-empty client name has been resolved.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        !self.display_name.is_empty()
    }
}

/// Peer samples of one dump, keyed by public key.
pub type PeerSet = HashMap<String, PeerSample>;

/// Result of parsing a full dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpParse {
    /// Parsed peers.
    pub peers: PeerSet,
    /// Lines skipped because of their width.
    pub skipped_width: usize,
    /// Lines skipped because of a non-numeric field.
    pub skipped_numeric: usize,
}

impl DumpParse {
    /// Total number of skipped lines.
    pub fn skipped(&self) -> usize {
        self.skipped_width + self.skipped_numeric
    }
}

fn parse_number(fields: &[&str], index: usize, field: &'static str) -> Result<i64, LineSkip> {
    let value = fields[index];
    value.parse::<i64>().map_err(|_| LineSkip::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Parses a single dump line into a peer sample.
///
/// Empty fields produced by repeated tabs are discarded before the
/// width check.
pub fn parse_line(line: &str) -> Result<PeerSample, LineSkip> {
    let fields: Vec<&str> = line.split('\t').filter(|f| !f.is_empty()).collect();
    if fields.len() != PEER_FIELD_COUNT {
        return Err(LineSkip::FieldCount {
            found: fields.len(),
        });
    }

    let last_handshake = parse_number(&fields, HANDSHAKE_FIELD, "latest_handshake")?;
    let rx_bytes = parse_number(&fields, RX_FIELD, "transfer_rx")?;
    let tx_bytes = parse_number(&fields, TX_FIELD, "transfer_tx")?;

    Ok(PeerSample {
        interface: fields[0].to_string(),
        public_key: fields[1].to_string(),
        preshared_key: fields[2].to_string(),
        endpoint: fields[3].to_string(),
        allowed_ips: fields[4].to_string(),
        last_handshake,
        rx_bytes,
        tx_bytes,
        persistent_keepalive: fields[8].to_string(),
        display_name: String::new(),
    })
}

/// Parses a full dump, skipping lines that are not peer records.
///
/// When a public key appears more than once the later line wins.
pub fn parse_dump(raw: &str) -> DumpParse {
    let mut parsed = DumpParse::default();

    for (index, line) in raw.lines().enumerate() {
        match parse_line(line) {
            Ok(sample) => {
                if let Some(previous) = parsed.peers.get(&sample.public_key) {
                    tracing::debug!(
                        public_key = %sample.public_key,
                        previous_interface = %previous.interface,
                        interface = %sample.interface,
                        "Duplicate peer in dump, keeping later line"
                    );
                }
                parsed.peers.insert(sample.public_key.clone(), sample);
            }
            Err(skip @ LineSkip::FieldCount { .. }) => {
                tracing::trace!(line = index + 1, reason = %skip, "Skipping non-peer line");
                parsed.skipped_width += 1;
            }
            Err(skip @ LineSkip::InvalidNumber { .. }) => {
                tracing::debug!(line = index + 1, reason = %skip, "Skipping malformed peer line");
                parsed.skipped_numeric += 1;
            }
        }
    }

    parsed
}
