use anyhow::{Context as _, Result};
use cimi_bridge::codec::{self, WireFormat};
use cimi_bridge::config::{Config, DriverKind};
use cimi_bridge::driver::gce::auth::TokenSource;
use cimi_bridge::driver::gce::client::GceClient;
use cimi_bridge::driver::{Credentials, Driver, GceDriver, MockDriver};
use cimi_bridge::resource::ResourceInstance;
use cimi_bridge::{CimiError, Context, Engine, EngineSettings};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level};
use tracing_subscriber::EnvFilter;

/// Expose a cloud backend through the CIMI resource model
#[derive(Parser, Debug)]
#[command(name = "cimi-bridge", version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML, or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend driver, overriding the configuration
    #[arg(short, long, global = true, value_enum)]
    driver: Option<DriverKind>,

    /// Root URL for generated links, overriding the configuration
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    format: WireFormat,

    /// Backend user (for GCE, an access token may be passed as --password)
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[arg(short, long, global = true)]
    password: Option<String>,

    /// Log level for debugging
    #[arg(long, global = true, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Entity metadata for every resource type, or for one
    Metadata { resource_type: Option<String> },
    /// List a resource collection
    List { resource_type: String },
    /// Show one resource
    Show { resource_type: String, id: String },
    /// Create a resource from a request body
    Create {
        resource_type: String,
        /// Request body file, `-` for stdin
        #[arg(short, long)]
        body: PathBuf,
        /// Body format, guessed from the file extension when omitted
        #[arg(short, long)]
        input_format: Option<WireFormat>,
    },
    Delete { resource_type: String, id: String },
    /// Run an action (bare name or action URI)
    Action {
        resource_type: String,
        id: String,
        action: String,
    },
    /// Attach volumes to a machine (`VOLUME_HREF=DEVICE`)
    Attach {
        machine_id: String,
        #[arg(required = true, value_parser = parse_attachment)]
        volumes: Vec<(String, String)>,
    },
    /// Detach volumes from a machine (`VOLUME_HREF=DEVICE`)
    Detach {
        machine_id: String,
        #[arg(required = true, value_parser = parse_attachment)]
        volumes: Vec<(String, String)>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn parse_attachment(s: &str) -> std::result::Result<(String, String), String> {
    match s.rsplit_once('=') {
        Some((href, device)) if !href.is_empty() && !device.is_empty() => {
            Ok((href.to_string(), device.to_string()))
        },
        _ => Err(format!("expected VOLUME_HREF=DEVICE, got '{}'", s)),
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };
    let filter = EnvFilter::new(format!("cimi_bridge={}", tracing_level.as_str().to_lowercase()));

    let Some(log_path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cimi-bridge started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn effective_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(driver) = args.driver {
        config.driver = driver;
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn connect_driver(config: &Config, credentials: &Credentials) -> Result<Arc<dyn Driver>> {
    match config.driver {
        DriverKind::Mock => Ok(Arc::new(MockDriver::new())),
        DriverKind::Gce => {
            let project = config
                .effective_project()
                .context("No GCP project configured. Set GOOGLE_CLOUD_PROJECT or gce.project")?;
            let zone = config.effective_zone();
            tracing::info!("Using project: {}, zone: {}", project, zone);

            // an explicit password is taken as a ready-made access token
            let client = match &credentials.password {
                Some(token) => GceClient::with_tokens(TokenSource::fixed(token.clone()), &project, &zone)?,
                None => GceClient::new(&project, &zone).await?,
            };
            let client = match &config.gce.api_base {
                Some(api_base) => client.with_api_base(api_base),
                None => client,
            };
            Ok(Arc::new(GceDriver::with_client(client)))
        },
    }
}

fn read_body(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        return std::io::read_to_string(std::io::stdin()).context("Failed to read body from stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read body {}", path.display()))
}

fn body_format(path: &Path, explicit: Option<WireFormat>) -> WireFormat {
    explicit.unwrap_or_else(|| match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => WireFormat::Xml,
        _ => WireFormat::Json,
    })
}

/// Rendered output of one command
async fn execute(
    engine: &Engine,
    config: &Config,
    command: Command,
    format: WireFormat,
    ctx: &Context,
) -> Result<String> {
    let render = |instance: &ResourceInstance| -> Result<String> {
        let rendered = engine.render(instance)?;
        Ok(codec::render(&rendered, format)?)
    };
    let render_all = |instances: &[ResourceInstance]| -> Result<String> {
        let docs = instances.iter().map(render).collect::<Result<Vec<_>>>()?;
        Ok(docs.join("\n"))
    };

    match command {
        Command::Metadata { resource_type: Some(resource_type) } => {
            render(&engine.describe(&resource_type, ctx)?)
        },
        Command::Metadata { resource_type: None } => {
            let instances: Vec<_> = engine
                .describe_all(ctx)
                .iter()
                .map(|metadata| metadata.to_instance(ctx))
                .collect();
            render_all(&instances)
        },
        Command::List { resource_type } => render_all(&engine.find_all(&resource_type, ctx).await?),
        Command::Show { resource_type, id } => render(&engine.find(&resource_type, &id, ctx).await?),
        Command::Create {
            resource_type,
            body,
            input_format,
        } => {
            let input_format = body_format(&body, input_format);
            let body = read_body(&body)?;
            render(&engine.create(&resource_type, &body, input_format, ctx).await?)
        },
        Command::Delete { resource_type, id } => {
            engine.delete(&resource_type, &id, ctx).await?;
            Ok(format!("{} '{}' deleted", resource_type, id))
        },
        Command::Action {
            resource_type,
            id,
            action,
        } => {
            engine
                .perform(&resource_type, &id, &action, ctx)
                .await
                .into_result(&resource_type, &id, &action)?;
            Ok(format!("{} on {} '{}' succeeded", action, resource_type, id))
        },
        Command::Attach { machine_id, volumes } => {
            render(&engine.attach_volumes(&machine_id, &volumes, ctx).await?)
        },
        Command::Detach { machine_id, volumes } => {
            render(&engine.detach_volumes(&machine_id, &volumes, ctx).await?)
        },
        Command::Config => config.to_yaml(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Logging setup error: {err:?}");
            return ExitCode::FAILURE;
        },
    };

    match run(args).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        },
        Err(err) => {
            match err.downcast_ref::<CimiError>() {
                Some(cimi) => eprintln!("Error ({}): {}", cimi.status(), cimi),
                None => eprintln!("Error: {err:?}"),
            }
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<String> {
    let config = effective_config(&args)?;
    // no backend needed to show the configuration
    if matches!(args.command, Command::Config) {
        return config.to_yaml();
    }

    let credentials = Credentials {
        user: args.user.clone(),
        password: args.password.clone(),
    };
    let driver = connect_driver(&config, &credentials).await?;
    let engine = Arc::new(Engine::standard(EngineSettings::from_config(&config)?));

    let cancel = CancellationToken::new();
    let ctx = engine
        .context(driver, credentials)
        .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            cancel.cancel();
        }
    });

    let span = tracing::info_span!("request", id = %ctx.request_id(), driver = ?config.driver);
    execute(&engine, &config, args.command, args.format, &ctx)
        .instrument(span)
        .await
}
