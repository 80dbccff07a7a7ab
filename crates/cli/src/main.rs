//! Nimbus CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Wire observability** through [`telemetry::init`]: `tracing-subscriber`
//!    with a JSON or text layer, plus an OpenTelemetry OTLP exporter when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! 2. **Load configuration** from a YAML file into a `StaticConfigStore`
//!    shared by every component.
//! 3. **Construct infrastructure**: the Keystone identity provider, the HTTP
//!    service SDK, and the built-in extension and tracker registrations, then
//!    inject them into a [`facade::Nimbus`].
//! 4. **Run one command** and print its JSON result on stdout.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use facade::{
    ApiVersion, ConfigStore, CredentialOverrides, ExtensionRegistry, FacadeConfig, Nimbus,
    ProtocolVersion, ServiceDescriptor, ServiceName, TrackerEvent, TrackerRegistry,
};
use keystone::KeystoneIdentity;
use serde_json::{json, Value};
use service_sdk::HttpServiceSdk;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "nimbus")]
#[command(about = "Authenticate against an OpenStack cloud and build service clients")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(long, short, env = "NIMBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "NIMBUS_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective credentials (passwords redacted)
    Credentials(CredentialArgs),

    /// Authenticate and print the endpoint a service client binds to
    Endpoint {
        /// Service name (orchestration, block-storage)
        service: String,

        /// SDK API version (e.g. 3.0); defaults to configuration, then the service default
        #[arg(long)]
        api_version: Option<String>,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// List the extensions registered for a service
    Extensions {
        /// Service name (orchestration, block-storage)
        service: String,
    },

    /// Authenticate, build a client, and invoke an extension operation
    Invoke {
        /// Service name (orchestration, block-storage)
        service: String,

        /// Operation name (e.g. list_versions)
        operation: String,

        /// JSON arguments
        #[arg(long, default_value = "null")]
        args: String,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Load a platform tracker and optionally record an event
    Tracker {
        /// Platform name (aws, openstack)
        platform: String,

        /// Resource the event is about
        #[arg(long, requires = "status")]
        resource: Option<String>,

        /// New status of the resource
        #[arg(long, requires = "resource")]
        status: Option<String>,
    },
}

#[derive(Debug, Args)]
struct CredentialArgs {
    /// Identity protocol version (v2, v3)
    #[arg(long, default_value = "v3", value_parser = parse_protocol)]
    protocol: ProtocolVersion,

    /// Read OS_USERNAME / OS_PASSWORD / OS_AUTH_URL / OS_TENANT_NAME
    #[arg(long)]
    from_env: bool,

    /// Override a credential (repeatable); any override replaces all other sources
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    overrides: Vec<(String, String)>,
}

impl CredentialArgs {
    fn overrides(&self) -> CredentialOverrides {
        self.overrides
            .iter()
            .fold(CredentialOverrides::none(), |acc, (key, value)| {
                acc.with(key.as_str(), value.as_str())
            })
    }
}

fn parse_protocol(value: &str) -> Result<ProtocolVersion, String> {
    value.parse().map_err(|e: facade::FacadeError| e.to_string())
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{value}'"));
    }
    Ok((key.to_owned(), val.to_owned()))
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

fn build_nimbus(store: Arc<dyn ConfigStore>) -> Result<Nimbus> {
    let settings = FacadeConfig::from_store(store.as_ref())?;
    let identity = KeystoneIdentity::new(settings.request_timeout())?;
    let sdk = HttpServiceSdk::new(settings.request_timeout(), settings.probe_endpoints)?;

    let extensions = Arc::new(ExtensionRegistry::new());
    service_sdk::versions::register_builtin(&extensions);
    let tracker_registry = Arc::new(TrackerRegistry::new());
    trackers::register_builtin(&tracker_registry);

    Ok(Nimbus::builder(store)
        .config(settings)
        .identity_provider(Arc::new(identity))
        .service_sdk(Arc::new(sdk))
        .extensions(extensions)
        .trackers(tracker_registry)
        .build()?)
}

fn descriptor(service: &str) -> Result<ServiceDescriptor> {
    ServiceDescriptor::builtin(service).ok_or_else(|| {
        anyhow!("unknown service '{service}' (expected orchestration or block-storage)")
    })
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling");
            trigger.cancel();
        }
    });
    cancel
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run(command: Command, nimbus: &Nimbus) -> Result<Value> {
    match command {
        Command::Credentials(args) => {
            let creds =
                nimbus.resolve_credentials(args.protocol, args.from_env, &args.overrides());
            Ok(serde_json::to_value(creds.redacted())?)
        }

        Command::Endpoint {
            service,
            api_version,
            credentials,
        } => {
            let client =
                connect_client(nimbus, &service, api_version.as_deref(), &credentials).await?;
            Ok(json!({
                "service": client.service().as_str(),
                "session_id": client.session_id().to_string(),
                "endpoint": client.endpoint().url,
                "interface": client.endpoint().interface,
                "api_version": client.api_version().to_string(),
                "extensions": client.extensions().extension_names(),
                "operations": client.extensions().operations(),
            }))
        }

        Command::Extensions { service } => {
            let name = ServiceName::new(service.as_str())
                .ok_or_else(|| anyhow!("service name must not be empty"))?;
            Ok(json!({
                "service": name.as_str(),
                "extensions": nimbus.extension_registry().registered(&name),
            }))
        }

        Command::Invoke {
            service,
            operation,
            args,
            credentials,
        } => {
            let args: Value = serde_json::from_str(&args).context("--args is not valid JSON")?;
            let client = connect_client(nimbus, &service, None, &credentials).await?;
            Ok(client.invoke_extension(&operation, args).await?)
        }

        Command::Tracker {
            platform,
            resource,
            status,
        } => {
            let module = nimbus.tracker(&platform)?;
            let recorded = match (resource, status) {
                (Some(resource), Some(status)) => {
                    module.record(&TrackerEvent::now(resource, status));
                    true
                }
                _ => false,
            };
            Ok(json!({ "platform": module.platform().as_str(), "recorded": recorded }))
        }
    }
}

async fn connect_client(
    nimbus: &Nimbus,
    service: &str,
    api_version: Option<&str>,
    credentials: &CredentialArgs,
) -> Result<facade::ServiceClient> {
    let descriptor = descriptor(service)?;
    let requested = api_version
        .map(|v| ApiVersion::parse(v).ok_or_else(|| anyhow!("invalid API version '{v}'")))
        .transpose()?;
    let cancel = cancel_on_interrupt();

    let session = nimbus
        .connect_cancellable(
            credentials.protocol,
            credentials.from_env,
            &credentials.overrides(),
            &cancel,
        )
        .await?;
    let version = nimbus.api_version_for(&descriptor, requested);
    let client = nimbus
        .client_factory(descriptor)
        .create_client_cancellable(&session, version, &cancel)
        .await?;
    info!(endpoint = %client.endpoint().url, "Client ready");
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.log_json)?;

    let store: Arc<dyn ConfigStore> = Arc::new(config::load(cli.config.as_deref())?);
    let nimbus = build_nimbus(store)?;

    let output = run(cli.command, &nimbus).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
