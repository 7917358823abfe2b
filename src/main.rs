use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wit_bridge::abi::{LayoutKind, TypeLayout, wave};
use wit_bridge::config::{ConfigError, LogFormat, LoggingConfig};
use wit_bridge::{
    CanonicalAbi, CanonicalAbiError, HostConfig, LinearMemory, Resolve, ReturnStrategy,
    Signature, TypeShape, find_type_by_name, load_wit_type,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WIT parsing error: {0}")]
    WitParse(#[from] anyhow::Error),

    #[error("{0}")]
    Library(#[from] wit_bridge::Error),

    #[error("Canonical ABI error: {0}")]
    CanonicalAbi(#[from] CanonicalAbiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid log filter: {0}")]
    LogFilter(String),

    #[error("Type not found: {0}")]
    TypeNotFound(String),
}

#[derive(Parser)]
#[command(name = "wit-bridge")]
#[command(about = "Inspect canonical ABI layouts and encodings of WIT types")]
struct Cli {
    /// Host configuration file (TOML); only the [logging] table is used here
    #[arg(long, global = true, env = "WIT_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print size, alignment and field offsets of a type
    Layout {
        /// Path to the WIT file containing the type definition
        #[arg(short, long)]
        wit: PathBuf,

        /// Name of the type to use (if not specified, uses the first type found)
        #[arg(short = 't', long)]
        type_name: Option<String>,
    },

    /// Print the flat core scalar shape of a type
    Flat {
        /// Path to the WIT file containing the type definition
        #[arg(short, long)]
        wit: PathBuf,

        /// Name of the type to use (if not specified, uses the first type found)
        #[arg(short = 't', long)]
        type_name: Option<String>,
    },

    /// Lift a WAVE-encoded value into simulated linear memory and dump it
    Lift {
        /// Path to the WIT file containing the type definition
        #[arg(short, long)]
        wit: PathBuf,

        /// Name of the type to use (if not specified, uses the first type found)
        #[arg(short = 't', long)]
        type_name: Option<String>,

        /// WAVE-encoded value to lift
        #[arg(short, long)]
        value: String,
    },

    /// Print the return strategy and core signature of a function type
    Signature {
        /// Path to the WIT file with the named types used below
        #[arg(short, long)]
        wit: Option<PathBuf>,

        /// Parameter types, primitive names or WIT type names
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Result types, primitive names or WIT type names
        #[arg(short, long = "result")]
        results: Vec<String>,
    },
}

fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    };
    init_logging(&config.logging)?;

    let abi = CanonicalAbi::new();

    match cli.command {
        Commands::Layout { wit, type_name } => {
            let loaded = load_wit_type(&wit, type_name.as_deref())?;
            let layout = abi.layout(&loaded.shape)?;
            println!("type:  {}", loaded.shape);
            print_layout(&layout, 0);
        }

        Commands::Flat { wit, type_name } => {
            let loaded = load_wit_type(&wit, type_name.as_deref())?;
            let flat = abi.flat_types(&loaded.shape)?;
            println!("{}", join(&flat));
        }

        Commands::Lift {
            wit,
            type_name,
            value,
        } => {
            let loaded = load_wit_type(&wit, type_name.as_deref())?;
            let parsed = wave::parse(&value, &loaded.wave, &loaded.shape)?;

            let mut memory = LinearMemory::new();
            let ptr = abi.lift(&mut memory, &parsed, &loaded.shape)?;
            let layout = abi.layout(&loaded.shape)?;

            println!("slot:   {ptr:#x} ({} bytes, align {})", layout.size, layout.align);
            println!("memory: {} bytes", memory.len());
            print_hex(memory.as_bytes());

            // Decode the bytes again to show what the guest would see.
            let lowered = abi.lower(memory.as_bytes(), ptr, &loaded.shape)?;
            println!("value:  {}", wave::print(&lowered, &loaded.wave)?);
        }

        Commands::Signature {
            wit,
            params,
            results,
        } => {
            let mut resolve = Resolve::new();
            if let Some(path) = &wit {
                resolve.push_path(path)?;
            }
            let signature = Signature::new(
                params
                    .iter()
                    .map(|name| shape_for(&resolve, name))
                    .collect::<Result<Vec<_>, _>>()?,
                results
                    .iter()
                    .map(|name| shape_for(&resolve, name))
                    .collect::<Result<Vec<_>, _>>()?,
            );
            let plan = abi.plan(&signature)?;

            println!("signature: {signature}");
            let strategy = match &plan.strategy {
                ReturnStrategy::None => "none".to_string(),
                ReturnStrategy::Direct(flat) => format!("direct ({} scalars)", flat.len()),
                ReturnStrategy::Indirect => "indirect (return pointer)".to_string(),
            };
            println!("returns:   {strategy}");
            println!(
                "core:      ({}) -> ({})",
                join(&plan.core_params()),
                join(&plan.core_results())
            );
            if let Some(area) = &plan.result_area {
                println!("area:      {} bytes, align {}", area.size, area.align);
            }
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Result<(), AppError> {
    let filter =
        EnvFilter::try_new(&config.level).map_err(|e| AppError::LogFilter(e.to_string()))?;

    match config.format {
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_ansi(io::stderr().is_terminal())
                .with_writer(io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Json => {
            let layer = fmt::layer().json().with_writer(io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }

    Ok(())
}

/// Resolve a primitive type keyword or a named type from the loaded WIT.
fn shape_for(resolve: &Resolve, name: &str) -> Result<TypeShape, AppError> {
    let primitive = match name {
        "bool" => Some(TypeShape::Bool),
        "s8" => Some(TypeShape::S8),
        "u8" => Some(TypeShape::U8),
        "s16" => Some(TypeShape::S16),
        "u16" => Some(TypeShape::U16),
        "s32" => Some(TypeShape::S32),
        "u32" => Some(TypeShape::U32),
        "s64" => Some(TypeShape::S64),
        "u64" => Some(TypeShape::U64),
        "f32" => Some(TypeShape::F32),
        "f64" => Some(TypeShape::F64),
        "char" => Some(TypeShape::Char),
        "string" => Some(TypeShape::String),
        _ => None,
    };
    if let Some(shape) = primitive {
        return Ok(shape);
    }
    let id = find_type_by_name(resolve, name).ok_or_else(|| AppError::TypeNotFound(name.to_string()))?;
    Ok(TypeShape::from_wit_id(resolve, id)?)
}

fn print_layout(layout: &TypeLayout, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{indent}size:  {}", layout.size);
    println!("{indent}align: {}", layout.align);
    println!("{indent}flat:  [{}]", join(&layout.flat));

    match &layout.kind {
        LayoutKind::Record(fields) | LayoutKind::Tuple(fields) => {
            for field in fields {
                println!("{indent}- {} @ {}", field.name, field.offset);
                print_layout(&field.layout, depth + 1);
            }
        }
        LayoutKind::Variant(variant) => {
            println!(
                "{indent}discriminant: {} bytes, payload @ {}",
                variant.discriminant_size, variant.payload_offset
            );
            for case in &variant.cases {
                match &case.payload {
                    Some(payload) => {
                        println!("{indent}- {}", case.name);
                        print_layout(payload, depth + 1);
                    }
                    None => println!("{indent}- {}", case.name),
                }
            }
        }
        LayoutKind::Flags(flags) => {
            println!("{indent}flags: {} in {} bytes", flags.names.len(), flags.width);
        }
        LayoutKind::List(element) | LayoutKind::Array { element, .. } => {
            println!("{indent}element stride: {}", element.stride);
        }
        LayoutKind::Scalar(_) | LayoutKind::String => {}
    }
}

fn print_hex(bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("  {:06x}  {}", row * 16, hex.join(" "));
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
