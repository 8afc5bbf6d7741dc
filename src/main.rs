use anyhow::{Context, Result};
use armrt::config::Config;
use armrt::operation::{FinalState, OperationPoller};
use armrt::paging::{FieldPredicate, ListIterator};
use armrt::transport::http::DEFAULT_USER_AGENT;
use armrt::transport::{HttpTransport, Method, Request, Transport};
use armrt::RuntimeError;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use url::Url;

/// Resource-manager REST client
#[derive(Parser, Debug)]
#[command(name = "armrt", version, about, long_about = None)]
struct Args {
    /// Bearer token sent with every request
    #[arg(long, env = "ARMRT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every item of a paged collection
    List {
        /// Collection URL, absolute or relative to the endpoint
        url: String,
        /// Keep items whose field equals a value (`path=value`, repeatable)
        #[arg(long = "where", value_name = "PATH=VALUE", value_parser = parse_condition)]
        conditions: Vec<(String, Value)>,
    },
    /// Read a single resource
    Get { url: String },
    /// Send a mutating request and wait for the operation to finish
    Send {
        #[arg(value_enum)]
        method: SendMethod,
        url: String,
        /// JSON request body
        #[arg(long)]
        body: Option<PathBuf>,
        /// Where the result of a succeeded operation is read from
        /// (default: discard for delete, poll-target for post, original-uri otherwise)
        #[arg(long, value_enum)]
        final_state: Option<FinalStateArg>,
    },
    /// Show configuration, or persist new values
    Config {
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        api_version: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SendMethod {
    Put,
    Patch,
    Post,
    Delete,
}

impl From<SendMethod> for Method {
    fn from(method: SendMethod) -> Self {
        match method {
            SendMethod::Put => Method::Put,
            SendMethod::Patch => Method::Patch,
            SendMethod::Post => Method::Post,
            SendMethod::Delete => Method::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FinalStateArg {
    PollTarget,
    OriginalUri,
    Discard,
}

impl From<FinalStateArg> for FinalState {
    fn from(arg: FinalStateArg) -> Self {
        match arg {
            FinalStateArg::PollTarget => FinalState::PollTarget,
            FinalStateArg::OriginalUri => FinalState::OriginalUri,
            FinalStateArg::Discard => FinalState::Discard,
        }
    }
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

/// `path=value`; the value is read as JSON when it parses, else as a string
fn parse_condition(input: &str) -> std::result::Result<(String, Value), String> {
    let (path, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected PATH=VALUE, got '{}'", input))?;
    if path.is_empty() {
        return Err("field path must not be empty".to_string());
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((path.to_string(), value))
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();
    let file = open_log_file(&log_path)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("armrt started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn open_log_file(log_path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("armrt").join("armrt.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".armrt").join("armrt.log");
    }
    PathBuf::from("armrt.log")
}

/// Join a relative URL to the endpoint and add `api-version` when missing
fn resolve_request(config: &Config, method: Method, input: &str) -> Result<Request> {
    let url = match Url::parse(input) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let endpoint = config.effective_endpoint();
            Url::parse(&endpoint)
                .and_then(|base| base.join(input))
                .with_context(|| format!("joining '{}' to endpoint {}", input, endpoint))?
        }
        Err(e) => return Err(e).with_context(|| format!("invalid URL '{}'", input)),
    };

    let request = Request::from_url(method, &url);
    if request.query_param("api-version").is_some() {
        Ok(request)
    } else {
        Ok(request.with_query("api-version", config.effective_api_version()))
    }
}

fn print_value(value: &Value, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

/// Short message for the terminal; transport failures avoid echoing raw bodies
fn describe(err: &anyhow::Error) -> String {
    match err
        .downcast_ref::<RuntimeError>()
        .and_then(RuntimeError::transport_error)
    {
        Some(transport) => transport.user_message(),
        None => format!("{:#}", err),
    }
}

async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    let mut config = Config::load();

    if let Command::Config {
        endpoint,
        api_version,
    } = &args.command
    {
        if endpoint.is_some() || api_version.is_some() {
            config.endpoint = endpoint.clone().or(config.endpoint);
            config.api_version = api_version.clone().or(config.api_version);
            config.save().context("saving configuration")?;
        }
        let shown = serde_json::to_value(&config)?;
        return print_value(&shown, args.output);
    }

    let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    let mut transport = HttpTransport::new(user_agent).context("creating HTTP client")?;
    if let Some(token) = args.token {
        transport = transport.with_bearer_token(token);
    }

    match args.command {
        Command::List { url, conditions } => {
            let request = resolve_request(&config, Method::Get, &url)?;
            let predicate = conditions
                .into_iter()
                .fold(FieldPredicate::new(), |p, (path, value)| p.field(path, value));

            let items: Vec<Value> = ListIterator::new(&transport, request)
                .with_cancellation(cancel)
                .complete(predicate)
                .await?;
            tracing::info!("listed {} items from {}", items.len(), url);
            print_value(&Value::Array(items), args.output)
        }
        Command::Get { url } => {
            let request = resolve_request(&config, Method::Get, &url)?;
            let response = transport
                .send(request)
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| RuntimeError::Transport {
                    context: format!("reading {}", url),
                    source: e,
                })?;
            let body = response.json().context("decoding response body")?;
            print_value(&body.unwrap_or(Value::Null), args.output)
        }
        Command::Send {
            method,
            url,
            body,
            final_state,
        } => {
            let mut request = resolve_request(&config, method.into(), &url)?;
            if let Some(path) = body {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading body from {}", path.display()))?;
                let json: Value = serde_json::from_str(&content)
                    .with_context(|| format!("parsing body from {}", path.display()))?;
                request = request.with_body(json);
            }

            let name = format!("{} {}", request.method, url);
            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RuntimeError::Cancelled { during: "sending the request" }.into()),
                sent = transport.send(request.clone()) => sent,
            };
            let response = sent.map_err(|e| RuntimeError::Transport {
                context: format!("sending {}", name),
                source: e,
            })?;

            let mut options = config.poller_options();
            if let Some(final_state) = final_state {
                options = options.with_final_state(final_state.into());
            }
            let mut poller = OperationPoller::from_response(&transport, name, &request, response, options)?;
            let result = poller.poll_until_done(&cancel).await?;

            match result {
                Some(value) => print_value(&value, args.output),
                None => {
                    eprintln!("{} {}", poller.operation().name(), poller.status());
                    Ok(())
                }
            }
        }
        Command::Config { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    if let Err(err) = run(args, cancel).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {}", describe(&err));
        std::process::exit(1);
    }

    Ok(())
}
