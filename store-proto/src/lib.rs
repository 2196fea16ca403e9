//! An embedded-friendly typed data store: a compiled name directory over a
//! flat binary buffer, a stackable protocol-layer pipeline, and two
//! services built on top of it — a line-oriented debugger and a
//! journal-based synchronizer.
//!
//! The store itself (the flat buffer and its directory bytes) is produced
//! by an external generator; this crate only consumes that output. See
//! [`directory`] and [`variant`] for the read/write path, [`protocol`] for
//! the codec chain bytes flow through, [`journal`] and [`sync`] for
//! delta replication, and [`debugger`] for the text command layer.

pub mod debugger;
pub mod directory;
pub mod error;
pub mod fifo;
pub mod journal;
pub mod message_fifo;
pub mod protocol;
pub mod store;
pub mod sync;
pub mod typetag;
pub mod varint;
pub mod variant;

pub use debugger::{Debugger, DebuggerConfig};
pub use directory::{find, list, Entry};
pub use error::{Error, Result};
pub use fifo::Fifo;
pub use journal::StoreJournal;
pub use message_fifo::MessageFifo;
pub use protocol::{ProtocolLayer, Stack};
pub use protocol::compression::Compression;
pub use protocol::segmentation::Segmentation;
pub use store::{Endian, MemoryStore, Store};
pub use sync::{StoreInfo, SyncConnection, Synchronizer};
pub use typetag::{Class, TypeTag};
pub use variant::Variant;

/// The compile-time knobs the original design expresses as preprocessor
/// flags (§6): which debugger commands are enabled, alias/macro/stream
/// capacities, and the store's declared endianness. Built once per
/// [`Debugger`]/[`Synchronizer`] rather than loaded from a file — there is
/// no runtime schema change, so there is nothing for a config file to
/// reload.
#[derive(Debug, Clone)]
pub struct Config {
    pub endian: Endian,
    pub debugger_read: bool,
    pub debugger_write: bool,
    pub debugger_echo: bool,
    pub debugger_list: bool,
    pub debugger_identification: bool,
    pub debugger_read_mem: bool,
    pub debugger_write_mem: bool,
    pub debugger_alias_max: usize,
    pub debugger_macro_budget: usize,
    pub debugger_stream_count: usize,
    pub debugger_stream_buffer: usize,
    pub compress_streams: bool,
}

impl Config {
    /// Every debugger command enabled, generous alias/macro/stream budgets,
    /// host-native store endianness.
    pub fn permissive(endian: Endian) -> Config {
        Config {
            endian,
            debugger_read: true,
            debugger_write: true,
            debugger_echo: true,
            debugger_list: true,
            debugger_identification: true,
            debugger_read_mem: true,
            debugger_write_mem: true,
            debugger_alias_max: 8,
            debugger_macro_budget: 256,
            debugger_stream_count: 4,
            debugger_stream_buffer: 256,
            compress_streams: false,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::permissive(Endian::host())
    }
}

impl From<&Config> for DebuggerConfig {
    fn from(config: &Config) -> DebuggerConfig {
        DebuggerConfig {
            max_aliases: config.debugger_alias_max,
            macro_budget: config.debugger_macro_budget,
            stream_count: config.debugger_stream_count,
            stream_capacity: config.debugger_stream_buffer,
            enable_read: config.debugger_read,
            enable_write: config.debugger_write,
            enable_echo: config.debugger_echo,
            enable_list: config.debugger_list,
            enable_identification: config.debugger_identification,
            enable_read_mem: config.debugger_read_mem,
            enable_write_mem: config.debugger_write_mem,
            ..DebuggerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_every_command() {
        let config = Config::default();
        assert!(config.debugger_read && config.debugger_write);
        assert_eq!(config.endian, Endian::host());
    }

    #[test]
    fn debugger_config_inherits_capacities_from_config() {
        let mut config = Config::default();
        config.debugger_alias_max = 2;
        let dbg_config: DebuggerConfig = (&config).into();
        assert_eq!(dbg_config.max_aliases, 2);
    }

    #[test]
    fn debugger_config_inherits_command_gates_from_config() {
        let mut config = Config::default();
        config.debugger_read = false;
        config.debugger_write_mem = false;
        let dbg_config: DebuggerConfig = (&config).into();
        assert!(!dbg_config.enable_read);
        assert!(!dbg_config.enable_write_mem);
        assert!(dbg_config.enable_write);
    }
}
