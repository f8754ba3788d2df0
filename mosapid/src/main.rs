use clap::{Args, Parser};
use mosapi_client::auth::{MosApiClient, SecretStoreCredentials};
use mosapi_client::error::MosApiError;
use mosapi_client::secrets::{FileSecretStore, SecretError, SecretStore};
use mosapi_client::session::SecretStoreSessionCache;
use mosapi_client::transport::{Transport, TransportError};
use mosapi_service::alarm::AlarmService;
use mosapi_service::api::{self, AppState};
use mosapi_service::config::{Config, ConfigError, MetricsConfig};
use mosapi_service::downtime::DowntimeService;
use mosapi_service::ingest::Ingester;
use mosapi_service::metrics::{MetricsPublisher, MetricsSink, StatsdSink};
use mosapi_service::report::{AbuseReportPublisher, LogMailer};
use mosapi_service::state::StateService;
use mosapi_service::store::{SqliteThreatMatchStore, StoreError, ThreatMatchStore};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics::Metrics;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
enum CliCommand {
    /// Serve the MoSAPI monitoring and METRICA endpoints
    Serve(ServeArgs),
    /// Start a MoSAPI session (login) for a given TLD
    #[command(alias = "mosapi_start")]
    MosapiStart(SessionArgs),
    /// Terminate the MoSAPI session (logout) for a given TLD
    #[command(alias = "mosapi_stop")]
    MosapiStop(SessionArgs),
    /// Show all metrics definitions as markdown tables
    ShowMetrics,
    /// Sync METRICS.md with current metric definitions
    SyncMetrics,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(Args, Debug)]
struct SessionArgs {
    #[arg(long)]
    config_file_path: PathBuf,
    /// The TLD to act on (e.g. "app")
    #[arg(long)]
    tld: String,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("failed to load config file: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to create runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("MoSAPI session command failed")]
    Session(#[source] MosApiError),
}

#[derive(thiserror::Error, Debug)]
enum SetupError {
    #[error("failed to read TLS material from the secret store: {0}")]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to create statsd client: {0}")]
    Statsd(String),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    init_tracing();

    if let Err(e) = cli() {
        print_error_chain(&e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn cli() -> Result<(), CliError> {
    match CliCommand::parse() {
        CliCommand::Serve(args) => {
            let config = Config::from_file(&args.config_file_path)?;
            init_statsd_recorder("mosapi", config.metrics.clone());
            run_async(serve(config))?
        }
        CliCommand::MosapiStart(args) => {
            let config = Config::from_file(&args.config_file_path)?;
            run_async(start_session(config, args.tld))?
        }
        CliCommand::MosapiStop(args) => {
            let config = Config::from_file(&args.config_file_path)?;
            run_async(stop_session(config, args.tld))?
        }
        CliCommand::ShowMetrics => {
            println!("{}", all_metrics_tables());
        }
        CliCommand::SyncMetrics => {
            let path = "METRICS.md";
            let mut content = std::fs::read_to_string(path).expect("failed to read METRICS.md");

            content = sync_section(
                &content,
                "CLIENT_METRICS",
                &generate_metrics_table(mosapi_client::metrics_defs::ALL_METRICS),
            );
            content = sync_section(
                &content,
                "SERVICE_METRICS",
                &generate_metrics_table(mosapi_service::metrics_defs::ALL_METRICS),
            );

            std::fs::write(path, content).expect("failed to write METRICS.md");
            println!("Synced METRICS.md");
        }
    }
    Ok(())
}

async fn serve(config: Config) -> Result<(), SetupError> {
    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(&config.secrets_dir));
    let client = build_client(&config, secrets.clone()).await?;

    let monitoring = Arc::new(mosapi_client::monitoring::ServiceMonitoring::new(
        client.clone(),
    ));
    let metrica = Arc::new(mosapi_client::metrica::DomainMetrica::new(client));

    let sink: Arc<dyn MetricsSink> = match &config.metrics {
        Some(MetricsConfig {
            statsd_host,
            statsd_port,
        }) => Arc::new(StatsdSink::new(
            Metrics::new(statsd_host, *statsd_port, "mosapi")
                .map_err(|e| SetupError::Statsd(e.to_string()))?,
        )),
        None => Arc::new(StatsdSink::new(Metrics::new_noop())),
    };
    let publisher = Arc::new(MetricsPublisher::new(sink, config.metrics_workers()));

    let store: Arc<dyn ThreatMatchStore> =
        Arc::new(SqliteThreatMatchStore::open(&config.threat_db_path)?);

    let state = AppState {
        state_service: Arc::new(StateService::new(
            monitoring.clone(),
            publisher,
            config.tlds.clone(),
            config.tld_workers(),
            config.batch_deadline(),
        )),
        alarm_service: Arc::new(AlarmService::new(
            monitoring.clone(),
            config.tlds.clone(),
            config.services.clone(),
            config.tld_workers(),
            config.batch_deadline(),
        )),
        downtime_service: Arc::new(DowntimeService::new(
            monitoring,
            config.tlds.clone(),
            config.services.clone(),
            config.tld_workers(),
            config.batch_deadline(),
        )),
        metrica: metrica.clone(),
        ingester: Arc::new(Ingester::new(metrica, store.clone(), config.tlds.clone())),
        report_publisher: Arc::new(AbuseReportPublisher::new(
            store,
            Arc::new(LogMailer),
            config.abuse_email_address.clone(),
            config.tlds.clone(),
        )),
    };

    let listener = tokio::net::TcpListener::bind((
        config.listener.host.as_str(),
        config.listener.port,
    ))
    .await?;
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        tlds = ?config.tlds,
        "mosapid listening"
    );
    axum::serve(listener, api::router(state)).await?;
    Ok(())
}

async fn build_client(
    config: &Config,
    secrets: Arc<dyn SecretStore>,
) -> Result<Arc<MosApiClient>, SetupError> {
    let cert_pem = secrets.get(&config.tls_cert_secret).await?;
    let key_pem = secrets.get(&config.tls_key_secret).await?;
    let transport = Transport::from_pem(&cert_pem, &key_pem)?;

    Ok(Arc::new(MosApiClient::new(
        transport,
        &config.mosapi_url,
        config.entity_type,
        Arc::new(SecretStoreSessionCache::new(secrets.clone())),
        Arc::new(SecretStoreCredentials::new(secrets)),
    )))
}

async fn start_session(config: Config, tld: String) -> Result<(), CliError> {
    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(&config.secrets_dir));
    let client = build_client(&config, secrets).await?;

    println!("Attempting MoSAPI login for TLD: {tld}...");
    client.login(&tld).await.map_err(CliError::Session)?;
    println!("Login successful.");
    Ok(())
}

async fn stop_session(config: Config, tld: String) -> Result<(), CliError> {
    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(&config.secrets_dir));
    let client = build_client(&config, secrets).await?;

    println!("Attempting MoSAPI logout for TLD: {tld}...");
    client.logout(&tld).await.map_err(CliError::Session)?;
    println!("Logout successful.");
    Ok(())
}

fn run_async<E>(fut: impl Future<Output = Result<(), E>>) -> Result<(), CliError>
where
    CliError: From<E>,
{
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    rt.block_on(fut).map_err(CliError::from)
}

fn init_statsd_recorder(prefix: &str, metrics_config: Option<MetricsConfig>) {
    if let Some(MetricsConfig {
        statsd_host,
        statsd_port,
    }) = metrics_config
    {
        let recorder = StatsdBuilder::from(statsd_host, statsd_port)
            .build(Some(prefix))
            .expect("Could not create StatsdRecorder");

        metrics::set_global_recorder(recorder).expect("Could not set global metrics recorder")
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn print_error_chain(e: &dyn std::error::Error) {
    eprintln!("error: {e}");
    let mut source = e.source();
    while let Some(cause) = source {
        eprintln!("caused by: {cause}");
        source = cause.source();
    }
}

fn sync_section(content: &str, name: &str, table: &str) -> String {
    let start_marker = format!("<!-- {}:START -->", name);
    let end_marker = format!("<!-- {}:END -->", name);

    let start_idx = content
        .find(&start_marker)
        .unwrap_or_else(|| panic!("Missing {} marker", start_marker));
    let end_idx = content
        .find(&end_marker)
        .unwrap_or_else(|| panic!("Missing {} marker", end_marker));

    format!(
        "{}{}\n{}\n{}{}",
        &content[..start_idx],
        start_marker,
        table,
        end_marker,
        &content[end_idx + end_marker.len()..]
    )
}

fn all_metrics_tables() -> String {
    format!(
        "## Client\n\n{}\n\n## Service\n\n{}",
        generate_metrics_table(mosapi_client::metrics_defs::ALL_METRICS),
        generate_metrics_table(mosapi_service::metrics_defs::ALL_METRICS),
    )
}

fn generate_metrics_table(metrics: &[shared::metrics_defs::MetricDef]) -> String {
    let mut lines = vec![
        "| Metric | Type | Labels | Description |".to_string(),
        "|--------|------|--------|-------------|".to_string(),
    ];
    for m in metrics {
        let labels = if m.labels.is_empty() {
            "-".to_string()
        } else {
            m.labels.join(", ")
        };
        lines.push(format!(
            "| `{}` | {} | {} | {} |",
            m.name,
            m.metric_type.as_str(),
            labels,
            m.description
        ));
    }
    lines.join("\n")
}
