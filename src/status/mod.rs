//! WireGuard peer status acquisition and parsing.
//!
//! The daemon is treated as an opaque producer of tab-delimited text.
//! A [`StatusSource`] fetches the raw `wg show all dump` output and
//! [`parse_dump`] turns it into a [`PeerSet`] keyed by public key.
//! Interface summary lines share the dump with peer lines and are
//! filtered out by their field count.

mod dump;
mod source;

pub use dump::{parse_dump, parse_line, DumpParse, LineSkip, PeerSample, PeerSet, PEER_FIELD_COUNT};
pub use source::{CommandSource, SourceError, StaticSource, StatusSource};
