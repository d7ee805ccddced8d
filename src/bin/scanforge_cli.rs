//! ScanForge CLI
//!
//! Commands: formats, caps, encode
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero when a capability query or encode fails

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use scanforge_core::{
    config::{EngineConfig, LogFormat},
    logging,
    transport::{DeviceProfile, ScriptedTransport},
    CapabilityId, Engine, OutputFormat, RawBitmapDescriptor, RetrievalMode,
};

#[derive(Parser)]
#[command(name = "scanforge-cli")]
#[command(version, about = "ScanForge CLI - scanner capabilities and bitmap output")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (JSON)
    #[arg(short, long, env = "SCANFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log format (pretty|compact|json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered encoders and their limits
    Formats,

    /// Resolve capabilities against a simulated device
    Caps {
        /// Device profile (JSON)
        #[arg(short, long)]
        device: PathBuf,

        /// Enumerate all capabilities once instead of querying each
        #[arg(long)]
        fast: bool,

        /// Capability ids: 0x0150, 336 or ICAP_BITDEPTH
        #[arg(required = true)]
        capabilities: Vec<CapabilityId>,
    },

    /// Encode a bitmap
    Encode {
        /// Output format tag
        #[arg(short, long)]
        format: String,

        /// JSON payload (RawBitmapDescriptor, pixels base64)
        #[arg(short, long)]
        payload: String,

        /// Target file
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!(r#"{{"error": "Failed to load config: {}"}}"#, e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    match cli.verbose {
        0 => {}
        1 => config.log.filter = "scanforge_core=debug,info".to_string(),
        _ => config.log.filter = "trace".to_string(),
    }
    logging::init(&config.log);

    match cli.command {
        Commands::Formats => {
            let transport = Arc::new(ScriptedTransport::default());
            let engine = Engine::new(transport, &config);
            let formats: Vec<_> = engine
                .encoders()
                .list()
                .iter()
                .map(|e| serde_json::json!({
                    "format": e.format(),
                    "extension": e.format().extension(),
                    "policy": e.policy(),
                }))
                .collect();

            println!("{}", serde_json::Value::Array(formats));
            ExitCode::SUCCESS
        }

        Commands::Caps { device, fast, capabilities } => {
            let profile = match DeviceProfile::load(&device) {
                Ok(p) => p,
                Err(e) => {
                    println!("{}", serde_json::json!({ "error": e.to_string() }));
                    return ExitCode::FAILURE;
                }
            };
            let product = profile.product_name.clone();
            let transport = Arc::new(ScriptedTransport::new(profile));
            let mut engine = Engine::new(transport.clone(), &config);

            let mode = if fast { RetrievalMode::Fast } else { config.retrieval_mode() };
            let handle = engine.open_session_with_mode(&product, mode);

            let mut results = vec![];
            for id in capabilities {
                match engine.resolve(handle, id) {
                    Ok(resolution) => results.push(serde_json::json!({
                        "capability": id.to_string(),
                        "name": id.name(),
                        "resolution": resolution,
                    })),
                    Err(e) => {
                        println!(r#"{{"error": "{}"}}"#, e);
                        return ExitCode::FAILURE;
                    }
                }
            }

            let output = serde_json::json!({
                "product": product,
                "mode": mode,
                "results": results,
                "transportCalls": transport.calls(),
            });
            println!("{}", output);
            ExitCode::SUCCESS
        }

        Commands::Encode { format, payload, out } => {
            let bitmap: RawBitmapDescriptor = match serde_json::from_str(&payload) {
                Ok(b) => b,
                Err(e) => {
                    println!(r#"{{"success": false, "error": "Invalid payload: {}"}}"#, e);
                    return ExitCode::FAILURE;
                }
            };

            let transport = Arc::new(ScriptedTransport::default());
            let engine = Engine::new(transport, &config);

            let result = format
                .parse::<OutputFormat>()
                .and_then(|f| engine.encode_bitmap_report(f, &bitmap, &out));

            match result {
                Ok(report) => {
                    let output = serde_json::json!({
                        "success": true,
                        "report": report,
                    });
                    println!("{}", output);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "status": e.status(),
                        "code": e.status().code(),
                        "error": e.to_string(),
                    });
                    println!("{}", output);
                    ExitCode::from(2)
                }
            }
        }
    }
}
