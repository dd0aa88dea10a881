//! bk - Inspect and maintain bindkeep record stores.

use bindkeep::cli::{Cli, Commands, ConfigCommands, KeyCommands, LookupCommands, MapKeyArgs};
use bindkeep::commands::{self, KeySpec, MapSpec, Output};
use bindkeep::config::{ConfigOverrides, ResolvedConfig, SaveMode, resolve_config};
use bindkeep::keys::KeyCodec;
use bindkeep::store::{self, BackendType, RecordStore};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Application name used for the default store location.
const APP_NAME: &str = "bk";

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run(cli) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Log to stderr, filtered by `BINDKEEP_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("BINDKEEP_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), bindkeep::Error> {
    let human = cli.human_readable;

    let mut overrides = ConfigOverrides::new();
    if let Some(prefix) = &cli.key_prefix {
        overrides = overrides.with_key_prefix(prefix.clone());
    }
    if let Some(mode) = &cli.save_mode {
        let mode = SaveMode::parse(mode).ok_or_else(|| {
            bindkeep::Error::Config(format!(
                "invalid save mode '{}', expected by-device or by-role",
                mode
            ))
        })?;
        overrides = overrides.with_save_mode(mode);
    }
    if let Some(Commands::Reconcile {
        precise_only: true, ..
    }) = &cli.command
    {
        overrides = overrides.with_allow_imprecise_matching(false);
    }

    let resolved = resolve_config(cli.config_path.as_deref(), &overrides)?;
    let store_path = cli.store_path;

    match cli.command {
        Some(Commands::Key { command }) => {
            let codec = key_codec(&resolved)?;
            let (spec, version) = key_spec(command)?;
            let result = commands::key_build(&codec, &spec, version)?;
            output(&result, human);
        }
        Some(Commands::Get { key }) => {
            let store = open_store(store_path.as_deref())?;
            let result = commands::store_get(store.as_ref(), &key)?;
            output(&result, human);
        }
        Some(Commands::Set { key, value }) => {
            let mut store = open_store(store_path.as_deref())?;
            let result = commands::store_set(store.as_mut(), &key, &value)?;
            output(&result, human);
        }
        Some(Commands::Has { key }) => {
            let store = open_store(store_path.as_deref())?;
            let result = commands::store_has(store.as_ref(), &key)?;
            output(&result, human);
        }
        Some(Commands::Rm { key }) => {
            let mut store = open_store(store_path.as_deref())?;
            let result = commands::store_rm(store.as_mut(), &key)?;
            output(&result, human);
        }
        Some(Commands::Keys { prefix }) => {
            let store = open_store(store_path.as_deref())?;
            let result = commands::store_keys(store.as_ref(), prefix.as_deref())?;
            output(&result, human);
        }
        Some(Commands::Lookup { command }) => match command {
            LookupCommands::Binding { map, max_version } => {
                let codec = key_codec(&resolved)?;
                let store = open_store(store_path.as_deref())?;
                let result =
                    commands::lookup_binding(store.as_ref(), &codec, &map_spec(map)?, max_version)?;
                output(&result, human);
            }
        },
        Some(Commands::Reconcile {
            devices,
            subjects,
            save,
            ..
        }) => {
            let store = open_store(store_path.as_deref())?;
            let result =
                commands::reconcile(store, resolved.settings(), &devices, &subjects, save)?;
            output(&result, human);
        }
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(&resolved);
                output(&result, human);
            }
        },
        Some(Commands::Version) | None => {
            let result = commands::version();
            output(&result, human);
        }
    }

    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

fn key_codec(resolved: &ResolvedConfig) -> Result<KeyCodec, bindkeep::Error> {
    KeyCodec::new(resolved.key_prefix.value.clone())
}

/// Open the store at `path`, or the per-user default SQLite store.
fn open_store(path: Option<&Path>) -> Result<Box<dyn RecordStore>, bindkeep::Error> {
    let (backend, path): (BackendType, PathBuf) = match path {
        Some(path) => (BackendType::for_path(path), path.to_path_buf()),
        None => (
            BackendType::Sqlite,
            store::default_store_path(APP_NAME, BackendType::Sqlite)?,
        ),
    };
    tracing::debug!(backend = %backend, path = %path.display(), "Opening record store");
    store::open(backend, &path)
}

fn map_spec(args: MapKeyArgs) -> Result<MapSpec, bindkeep::Error> {
    Ok(MapSpec {
        device: commands::device_identifier(
            &args.device.kind,
            &args.device.hardware_id,
            args.device.hardware_guid,
        )?,
        subject: args.subject,
        category_id: args.category,
        layout_id: args.layout,
        duplicate_index: args.duplicate,
    })
}

fn key_spec(command: KeyCommands) -> Result<(KeySpec, Option<u32>), bindkeep::Error> {
    Ok(match command {
        KeyCommands::Binding { map, version } => (KeySpec::Binding(map_spec(map)?), version),
        KeyCommands::KnownIds { map, version } => (KeySpec::KnownIds(map_spec(map)?), version),
        KeyCommands::Role {
            subject,
            role,
            category,
            layout,
            version,
        } => (
            KeySpec::Role {
                subject,
                role,
                category_id: category,
                layout_id: layout,
            },
            version,
        ),
        KeyCommands::Calibration { device } => (
            KeySpec::Calibration(commands::device_identifier(
                &device.kind,
                &device.hardware_id,
                device.hardware_guid,
            )?),
            None,
        ),
        KeyCommands::Behavior { subject, id } => (
            KeySpec::Behavior {
                subject,
                behavior_id: id,
            },
            None,
        ),
        KeyCommands::Assignments => (KeySpec::Assignments, None),
    })
}
