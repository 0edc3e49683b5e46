use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rfvector::{
    BackendConfig, ColorMode, Complexity, Dispatcher, Error, HealthRegistry, ImageSource, OutputFormat, Quality,
    ServiceConfig, VectorizationRequest, VectorizationResult, LOCAL_BACKEND,
};

#[derive(Parser)]
#[command(name = "rfvector", version, about = "Raster to vector conversion with backend fallback")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Vectorize one image and print the result as JSON
    Vectorize {
        /// http(s):// or file:// URL, or a local path
        source: String,
        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
        #[arg(long, value_enum, default_value_t)]
        quality: Quality,
        #[arg(long, value_enum, default_value_t)]
        color_mode: ColorMode,
        #[arg(long, value_enum, default_value_t)]
        complexity: Complexity,
        #[arg(long)]
        hint: Option<String>,
        /// Directory for the output artifact
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Probe every configured backend once and print their state
    Probe {
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Serve JSON-lines requests from stdin, one result per line on stdout
    Worker {
        #[command(flatten)]
        service: ServiceArgs,
    },
}

#[derive(Args)]
struct ServiceArgs {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Remote backend as ID=URL; may be repeated
    #[arg(long = "backend", value_name = "ID=URL")]
    backends: Vec<BackendConfig>,
}

impl ServiceArgs {
    fn load(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        config.backends.extend(self.backends.iter().cloned());
        config.validate().context("invalid backend list")?;
        Ok(config)
    }
}

fn dispatcher(config: ServiceConfig) -> anyhow::Result<Dispatcher> {
    let registry = Arc::new(HealthRegistry::new(&config));
    Ok(Dispatcher::new(config, registry)?)
}

/// Bare paths are accepted as a convenience and turned into `file://` URLs.
fn source_url(source: &str) -> anyhow::Result<String> {
    if source.contains("://") {
        return Ok(source.to_string());
    }
    let path = std::fs::canonicalize(source).with_context(|| format!("cannot find {}", source))?;
    url::Url::from_file_path(&path)
        .map(|u| u.to_string())
        .map_err(|_| anyhow::anyhow!("cannot express {} as a file URL", path.display()))
}

fn worker_main(dispatcher: &Dispatcher) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str::<VectorizationRequest>(&line) {
            Ok(req) => dispatcher.dispatch(req),
            Err(e) => VectorizationResult::failed(
                OutputFormat::default(),
                &Error::InvalidInput(format!("malformed request: {}", e)),
                0,
                LOCAL_BACKEND,
            ),
        };
        let js = serde_json::to_string(&result).unwrap_or_else(|_| {
            "{\"success\":false,\"error\":\"serialization failed\",\"backend\":\"local\"}".to_string()
        });
        writeln!(out, "{}", js)?;
        out.flush()?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Vectorize { source, format, quality, color_mode, complexity, hint, out_dir, service } => {
            let mut config = service.load()?;
            if let Some(dir) = out_dir {
                config.output_dir = dir;
            }
            let request = VectorizationRequest {
                source: ImageSource::Url(source_url(&source)?),
                output_format: format,
                quality,
                color_mode,
                complexity,
                user_hint: hint,
            };
            let dispatcher = dispatcher(config)?;
            dispatcher.probe_all();
            let result = dispatcher.dispatch(request);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Probe { service } => {
            let dispatcher = dispatcher(service.load()?)?;
            dispatcher.probe_all();
            println!("{}", serde_json::to_string_pretty(&dispatcher.registry().snapshot())?);
        }
        Command::Worker { service } => {
            let dispatcher = dispatcher(service.load()?)?;
            dispatcher.probe_all();
            let prober = dispatcher.spawn_prober();
            let served = worker_main(&dispatcher);
            if let Some(p) = prober {
                p.stop();
            }
            served.context("worker loop failed")?;
        }
    }
    Ok(())
}
