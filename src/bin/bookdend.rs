// Copyright (C) 2025 the bookden authors
//
// This file is part of bookden.
//
// bookden is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bookden is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bookden.  If not,
// see <http://www.gnu.org/licenses/>.

//! # bookdend
//!
//! The bookden daemon: a book-review web service.
//!
//! Run it in the foreground (typically inside a container); it logs structured JSON to stdout
//! unless asked for `--plain`. Most configuration is read from a versioned TOML file; the command
//! line governs only where to find that file & how to log.

use std::{
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};

use axum::{
    extract::State,
    http::{HeaderName, HeaderValue},
    routing::get,
    Router,
};
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use hmac::{Hmac, Mac};
use opentelemetry::{global, KeyValue};
use serde::Deserialize;
use sha2::Sha256;
use snafu::{prelude::*, IntoError};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tower_http::{
    cors::CorsLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};
use url::Url;

use bookden::{
    accounts::make_router as make_accounts_router,
    authn::authenticate,
    catalog::{make_router as make_catalog_router, HttpCatalog},
    entities::Shelf,
    http::Bookden,
    memory::Memory,
    metrics::{check_metric_names, Instruments},
    notifications::make_router as make_notifications_router,
    reviews::make_router as make_reviews_router,
    shelves::make_router as make_shelves_router,
    stats::IsbnLocks,
    storage::Backend as StorageBackend,
};

/// The bookdend application error type
///
/// [Debug] is implemented by hand to delegate to [Display](std::fmt::Display): `main()` returns
/// `Result<(), Error>`, and on the error path the runtime prints the `Debug` rendition, which in
/// derived form is unreadable.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {address}: {source}"))]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Unable to read configuration file: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to build the Prometheus exporter: {source}"))]
    Exporter {
        source: opentelemetry_sdk::metrics::MetricError,
    },
    #[snafu(display("The authn shared secret is unusable: {source}"))]
    Secret { source: hmac::digest::InvalidLength },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
}

/// Where to find the book-metadata provider
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogConfig {
    #[serde(rename = "base-url")]
    base_url: Url,
    #[serde(rename = "page-size")]
    page_size: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            base_url: "http://localhost:4021".parse::<Url>().unwrap(/* known good */),
            page_size: 10,
        }
    }
}

/// Bearer-token verification parameters, shared with the identity provider
#[derive(Clone, Debug, Deserialize)]
pub struct AuthnConfig {
    issuer: String,
    /// HS256 shared secret
    // Nb. we can only deserialize (i.e. not serialize) due to the presence of this secret
    #[serde(rename = "hmac-secret")]
    hmac_secret: String,
}

impl Default for AuthnConfig {
    fn default() -> Self {
        AuthnConfig {
            issuer: "http://localhost:4022".to_owned(),
            hmac_secret: "an-inadequate-development-secret".to_owned(),
        }
    }
}

/// bookden datastore configuration
///
/// The service writes to a generic API ([Backend](bookden::storage::Backend)); at startup a
/// particular implementation of that API is chosen, according to this configuration. Only the
/// in-process store exists today, but the selection point is here so that adding a document-store
/// backend is a configuration change, not an application one.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum StorageConfig {
    #[default]
    Memory,
}

/// bookden configuration, version one
#[derive(Clone, Debug, Deserialize)]
struct ConfigV1 {
    /// Local address at which to listen; specify as "address:port"
    address: SocketAddr,
    catalog: CatalogConfig,
    authn: AuthnConfig,
    #[serde(rename = "storage-config", default)]
    storage_config: StorageConfig,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            address: "0.0.0.0:4020".parse::<SocketAddr>().unwrap(/* known good */),
            catalog: CatalogConfig::default(),
            authn: AuthnConfig::default(),
            storage_config: StorageConfig::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the bookden configuration file
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/bookden.toml").unwrap(), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Bookden>>) -> String {
    use prometheus::Encoder;
    let mut output = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    encoder
        .encode(&state.registry.gather(), &mut output)
        .expect("Failed to encode Prom metrics");
    String::from_utf8(output).expect("Non UTF-8 Prom encoder output?")
}

/// Assemble the complete bookden [Router]
fn make_router(state: Arc<Bookden>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .merge(make_catalog_router(state.clone()))
        .merge(make_reviews_router(state.clone()))
        .merge(make_notifications_router(state.clone()))
        .merge(make_accounts_router(state.clone()))
        .nest(
            "/api/wishlist",
            make_shelves_router(state.clone(), Shelf::Wishlist),
        )
        .nest(
            "/api/reading",
            make_shelves_router(state.clone(), Shelf::Reading),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .with_state(state)
}

fn select_storage(config: &StorageConfig) -> Arc<dyn StorageBackend + Send + Sync> {
    match config {
        StorageConfig::Memory => Arc::new(Memory::new()),
    }
}

/// On configuration reload, keep the running backend unless the storage stanza itself changed;
/// the in-process store holds state that would otherwise be wiped by every SIGHUP
fn reload_storage(
    current: Arc<dyn StorageBackend + Send + Sync>,
    old: &StorageConfig,
    new: &StorageConfig,
) -> Arc<dyn StorageBackend + Send + Sync> {
    if old == new {
        current
    } else {
        warn!(
            "Storage configuration changed from {:?} to {:?}; abandoning the current store.",
            old, new
        );
        select_storage(new)
    }
}

/// Initialize telemetry
///
/// Must be invoked from inside the Tokio runtime, but before any instruments are accessed. The
/// returned Prometheus registry backs the `/metrics` endpoint.
fn init_telemetry() -> Result<prometheus::Registry> {
    check_metric_names();
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .context(ExporterSnafu)?;
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(opentelemetry_sdk::Resource::new(vec![KeyValue::new(
            "service.name",
            "bookden",
        )]))
        .with_reader(exporter)
        .build();
    global::set_meter_provider(provider);
    Ok(registry)
}

/// Serve bookden API requests
async fn serve(opts: CliOpts, mut cfg: ConfigV1) -> Result<()> {
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sighup = signal(SignalKind::hangup()).unwrap();
    let mut sigterm = signal(SignalKind::terminate()).unwrap();
    let mut sigint = signal(SignalKind::interrupt()).unwrap();

    let registry = init_telemetry()?;
    let mut storage = select_storage(&cfg.storage_config);

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        let catalog = Arc::new(HttpCatalog::new(
            reqwest::Client::new(),
            cfg.catalog.base_url.clone(),
            cfg.catalog.page_size,
        ));
        let token_key: Hmac<Sha256> =
            Hmac::new_from_slice(cfg.authn.hmac_secret.as_bytes()).context(SecretSnafu)?;

        let state = Arc::new(Bookden {
            storage: storage.clone(),
            catalog,
            locks: IsbnLocks::new(),
            instruments: Instruments::new("bookden"),
            registry: registry.clone(),
            token_key,
            token_issuer: cfg.authn.issuer.clone(),
        });

        let nfy = Arc::new(Notify::new());
        let server = axum::serve(
            TcpListener::bind(&cfg.address)
                .await
                .context(BindSnafu {
                    address: cfg.address,
                })?,
            make_router(state),
        )
        .with_graceful_shutdown(shutdown_signal(nfy.clone()));

        info!("bookden version {} listening on {}", crate_version!(), cfg.address);

        let mut server = std::pin::pin!(std::future::IntoFuture::into_future(server));
        tokio::select! {
            // The server should never shut down on its own
            res = &mut server => {
                error!("The server exited early with {:?}; shutting down.", res);
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP; re-reading configuration.");
                nfy.notify_one();
                if let Err(err) = server.await {
                    error!("{:?}", err);
                }
                cfg = match parse_config(&opts.cfg) {
                    Ok(new_cfg) => {
                        storage = reload_storage(
                            storage.clone(),
                            &cfg.storage_config,
                            &new_cfg.storage_config,
                        );
                        new_cfg
                    }
                    // Fall back to the last known-good configuration & keep going
                    Err(err) => {
                        error!("Failed to re-read configuration ({}); keeping the old one.", err);
                        cfg
                    }
                };
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM; terminating.");
                nfy.notify_one();
                if let Err(err) = server.await {
                    error!("{:?}", err);
                }
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT; terminating.");
                nfy.notify_one();
                if let Err(err) = server.await {
                    error!("{:?}", err);
                }
                break;
            }
        }
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn configure_logging(logopts: &LogOpts) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;
    // `compact()` & `json()` produce layers of different types, hence the boxing
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(std::io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stdout),
        )
    };
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

fn main() -> Result<()> {
    let matches = Command::new("bookdend")
        .version(crate_version!())
        .author(crate_authors!())
        .about("A self-hostable book-review service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .env("BOOKDEN_CONFIG")
                .help(
                    "path (absolute or relative to the process' current directory) to a \
                     configuration file",
                ),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BOOKDEN_DEBUG")
                .help("produce debug output"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BOOKDEN_PLAIN")
                .help("log in human-readable format, not JSON/structured logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BOOKDEN_QUIET")
                .help("produce only error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("BOOKDEN_VERBOSE")
                .help("produce prolix output"),
        )
        .get_matches();

    let opts = CliOpts {
        log_opts: LogOpts::new(&matches),
        cfg: matches.get_one::<PathBuf>("config").cloned(),
    };

    configure_logging(&opts.log_opts)?;
    let cfg = parse_config(&opts.cfg)?;

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(serve(opts, cfg))
}

#[cfg(test)]
mod test {
    use super::*;

    /// A SIGHUP that leaves the storage stanza alone must not wipe the in-process store
    #[test]
    fn reload_keeps_the_store_when_the_storage_config_is_unchanged() {
        let cfg = StorageConfig::Memory;
        let storage = select_storage(&cfg);
        let after = reload_storage(storage.clone(), &cfg, &StorageConfig::Memory);
        assert!(Arc::ptr_eq(&storage, &after));
    }
}
