//! CLI argument definitions for bindkeep.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// bk - Inspect and maintain bindkeep record stores.
///
/// Start with `bk keys` to see what a store holds, then `bk key` to see how
/// a record is addressed.
#[derive(Parser, Debug)]
#[command(name = "bk")]
#[command(author, version, about = "Inspect and maintain bindkeep input binding stores", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Record store file. A `.json` extension selects the JSON file backend,
    /// anything else SQLite. Defaults to the per-user data directory.
    #[arg(long = "store", global = true, env = "BINDKEEP_STORE")]
    pub store_path: Option<PathBuf>,

    /// Config file (defaults to ~/.config/bindkeep/config.kdl)
    #[arg(long = "config", global = true, env = "BINDKEEP_CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Override the record key prefix
    #[arg(long = "key-prefix", global = true)]
    pub key_prefix: Option<String>,

    /// Override the save mode: "by-device" or "by-role"
    #[arg(long = "save-mode", global = true)]
    pub save_mode: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the record key for a descriptor
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Read the value stored under a key
    Get {
        /// Full record key
        key: String,
    },

    /// Store a value under a key, replacing any previous value
    Set {
        /// Full record key
        key: String,
        /// Value to store
        value: String,
    },

    /// Check whether a key is present
    Has {
        /// Full record key
        key: String,
    },

    /// Remove a key
    Rm {
        /// Full record key
        key: String,
    },

    /// List keys in the store
    Keys {
        /// Only list keys starting with this text
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Find a record the way a load does, trying older key versions
    Lookup {
        #[command(subcommand)]
        command: LookupCommands,
    },

    /// Reconcile connected devices against the saved assignment snapshot
    ///
    /// Devices are given as a JSON array of `{id, kind, instance_guid,
    /// hardware_identifier, hardware_type_guid}` objects.
    Reconcile {
        /// JSON array of connected devices
        #[arg(long)]
        devices: String,

        /// Subject ids to reconcile (defaults to the subjects in the snapshot)
        #[arg(long = "subject", value_delimiter = ',')]
        subjects: Vec<u32>,

        /// Disable matching by hardware identifier
        #[arg(long)]
        precise_only: bool,

        /// Write the resulting assignment back to the store
        #[arg(long)]
        save: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show version and build information
    Version,
}

/// Key building subcommands
#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Key of a binding record
    Binding {
        #[command(flatten)]
        map: MapKeyArgs,
        /// Key schema version (defaults to the current one)
        #[arg(long)]
        version: Option<u32>,
    },

    /// Key of the known action ids saved next to a binding record
    KnownIds {
        #[command(flatten)]
        map: MapKeyArgs,
        /// Key schema version (defaults to the current one)
        #[arg(long)]
        version: Option<u32>,
    },

    /// Key of a role record
    Role {
        /// Subject name
        #[arg(long)]
        subject: String,
        /// Element role (e.g. "south")
        #[arg(long)]
        role: String,
        #[arg(long, default_value_t = 0)]
        category: i32,
        #[arg(long, default_value_t = 0)]
        layout: i32,
        /// Key schema version (defaults to the current one)
        #[arg(long)]
        version: Option<u32>,
    },

    /// Key of a device's calibration record
    Calibration {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Key of an input behavior record
    Behavior {
        /// Subject name
        #[arg(long)]
        subject: String,
        /// Behavior id
        #[arg(long)]
        id: i32,
    },

    /// Key of the device assignment snapshot
    Assignments,
}

/// Lookup subcommands
#[derive(Subcommand, Debug)]
pub enum LookupCommands {
    /// Find a binding record, newest key version first
    Binding {
        #[command(flatten)]
        map: MapKeyArgs,
        /// Highest key version to try (defaults to the current one)
        #[arg(long)]
        max_version: Option<u32>,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show,
}

/// Device identity arguments.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Device kind: keyboard, mouse, joystick, custom
    #[arg(long, default_value = "joystick")]
    pub kind: String,

    /// Hardware identifier text
    #[arg(long = "hardware-id", default_value = "")]
    pub hardware_id: String,

    /// Hardware type guid (omit for unrecognized hardware)
    #[arg(long = "hardware-guid")]
    pub hardware_guid: Option<Uuid>,
}

/// Binding record slot arguments.
#[derive(Args, Debug, Clone)]
pub struct MapKeyArgs {
    /// Subject name
    #[arg(long)]
    pub subject: String,

    #[command(flatten)]
    pub device: DeviceArgs,

    #[arg(long, default_value_t = 0)]
    pub category: i32,

    #[arg(long, default_value_t = 0)]
    pub layout: i32,

    /// Ordinal among the subject's devices of the same type
    #[arg(long, default_value_t = 0)]
    pub duplicate: u32,
}
