// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of spidergram.
//
// spidergram is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// spidergram is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with spidergram.  If not,
// see <http://www.gnu.org/licenses/>.

//! # spidergramd
//!
//! Radar charts over HTTP.
//!
//! # Introduction
//!
//! spidergramd serves a single chart-producing endpoint, `GET /chart`, speaking the query
//! mini-language of the old chart-image services, along with the customary `/healthcheck` &
//! `/metrics`. It is container-first: it runs in the foreground & logs to stdout (structured by
//! default, human-readable with `--plain`); anything fancier is the init system's business.

use std::{
    future::IntoFuture,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{extract::State, routing::get, Router};
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use http::{HeaderName, HeaderValue};
use prometheus::Encoder;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};
use uuid::Uuid;

use spidergram::{
    cache::{self, ImageCache},
    chart::make_router as make_chart_router,
    metrics::Instruments,
    render::SpiderRenderer,
    spidergram::Spidergram,
};

/// The spidergram application error type
///
/// A fairly rich set of errors in the hopes of helping operators; [Snafu] keeps the boilerplate
/// down.
///
/// [Snafu]: https://docs.rs/snafu/latest/snafu/index.html
///
/// Note that I do not derive the [Debug] trait for this error. `main()` returns
/// `Result<(), Error>`, & should the `Err` variant be returned, the Rust runtime uses the `Debug`
/// implementation to produce an error message on stderr. The derived implementation is not very
/// readable, so I implement it "by hand" in terms of `Display`.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
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
    #[snafu(display("Failed to build the service's instruments: {source}"))]
    Instruments {
        source: spidergram::metrics::Error,
    },
    #[snafu(display("Failed to install a signal handler: {source}"))]
    Signal { source: std::io::Error },
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

type StdResult<T, E> = std::result::Result<T, E>;

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

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub instance_id: Uuid,
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            instance_id: matches
                .get_one::<Uuid>("instance-id")
                .cloned()
                .unwrap_or(Uuid::new_v4()),
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
        }
    }
}

/// spidergram configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct ConfigV1 {
    /// Local address at which to listen; specify as "address:port"
    address: SocketAddr,
    /// Image cache parameters (time-to-live & sweep interval)
    cache: cache::Config,
    /// `max-age` advertised in `Cache-Control` on image responses
    #[serde(rename = "max-age")]
    max_age: u32,
}

impl ConfigV1 {
    pub fn address(&self) -> &SocketAddr {
        &self.address
    }
    pub fn cache(&self) -> &cache::Config {
        &self.cache
    }
    pub fn max_age(&self) -> u32 {
        self.max_age
    }
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            // The port the legacy service bound:
            address: "0.0.0.0:8080".parse::<SocketAddr>().unwrap(/* known good */),
            cache: cache::Config::default(),
            max_age: 3600,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the spidergram configuration file
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/spidergram.toml").unwrap(), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(cfg) => match cfg {
                Configuration::V1(cfg) => Ok(cfg),
            },
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

/// Configure spidergram logging
///
/// We always log to stdout; the only choice is the format. `json()` & `compact()` produce
/// `Layer` instances *of different types*, which is why the formatter comes back as a
/// `Box<dyn Layer<S> + Send + Sync>`.
fn configure_logging(
    logopts: &LogOpts,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

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

    Ok((formatter, filter))
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Spidergram>>) -> String {
    let mut buffer = Vec::new();
    prometheus::TextEncoder::new()
        .encode(&state.registry.gather(), &mut buffer)
        .expect("Failed to encode Prom metrics");
    String::from_utf8(buffer).expect("Non UTF-8 Prom encoder output?")
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Counter for generating request IDs; a u64 gives a lot less information than a UUID (the
/// traditional type for request IDs), but it's enough, more easily readable, and a useful gauge of
/// how long the server's been up.
#[derive(Clone, Debug, Default)]
struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| RequestId::new(HeaderValue::from_str(&s).unwrap(/* known good */)))
            .pipe(Some)
    }
}

/// Make the [Router] that will be accessible to the world
fn make_world_router(state: Arc<Spidergram>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .merge(make_chart_router(state.clone()))
        // Incoming requests should hit the `SetRequestIdLayer` *first*, so it must be the
        // last/outer layer applied:
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
        .with_state(state)
}

fn log_on_err<T, E>(x: StdResult<T, E>)
where
    E: std::error::Error + std::fmt::Debug,
{
    if let Err(err) = x {
        error!("{:?}", err);
    }
}

/// Serve `spidergram` requests
#[tracing::instrument(
    skip(opts, cfg),
    fields(instance_id = %opts.instance_id)
)]
async fn serve(opts: CliOpts, mut cfg: ConfigV1) -> Result<()> {
    // Produce a future which can be used to signal graceful shutdown, below.
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sighup = signal(SignalKind::hangup()).context(SignalSnafu)?;
    let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;

    // These outlive configuration re-loads: the cache because its lifetime is the process' (a
    // HUP shouldn't dump every rendered chart on the floor), the registry & instruments because
    // prometheus rejects re-registration of the same metric names.
    let registry = prometheus::Registry::new();
    let instruments = Arc::new(Instruments::new(&registry).context(InstrumentsSnafu)?);
    let cache = Arc::new(ImageCache::new(cfg.cache().time_to_live));
    let sweeper_shutdown = Arc::new(Notify::new());
    let mut sweeper = cache::spawn_sweeper(
        cache.clone(),
        cfg.cache().sweep_interval,
        sweeper_shutdown.clone(),
        instruments.clone(),
    );

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        let state = Arc::new(Spidergram {
            instance_id: opts.instance_id,
            cache: cache.clone(),
            renderer: Arc::new(SpiderRenderer::new()),
            registry: registry.clone(),
            instruments: instruments.clone(),
            max_age: cfg.max_age(),
        });

        let nfy = Arc::new(Notify::new());
        let server = axum::serve(
            TcpListener::bind(cfg.address()).await.context(BindSnafu {
                addr: *cfg.address(),
            })?,
            make_world_router(state),
        )
        .with_graceful_shutdown(shutdown_signal(nfy.clone()));

        info!("spidergram listening at {}.", cfg.address());

        // If I don't move `server` into a Future, it never gets polled.
        let mut server = server.into_future();

        tokio::select! {
            // Intentionally not handled-- the server *should* never shutdown on its own.
            _ = &mut server => unimplemented!(),
            _ = sighup.recv() => { // Future<Output = Option<()>>
                info!("Received SIGHUP; re-reading configuration.");
                // Signal our axum server to shut-down...
                nfy.notify_one();
                // & wait for it to complete.
                log_on_err(server.await);
                // Now re-read our configuration, falling back to the last known-good on failure:
                cfg = match parse_config(&opts.cfg) {
                    Ok(cfg) => cfg,
                    Err(_) => cfg
                };
            }
            _ = sigterm.recv() => { // Future<Output = Option<()>>
                info!("Received SIGTERM; terminating.");
                // That's it-- we're outta here. Signal our axum server to shut-down...
                nfy.notify_one();
                // wait for it to complete...
                log_on_err(server.await);
                // and shut-down the cache sweeper:
                sweeper_shutdown.notify_one();
                // There's not much to be done on failure here, but if there is a problem, I'd
                // like to at least know:
                match tokio::time::timeout(Duration::from_secs(5), &mut sweeper).await {
                    Ok(Err(err)) => error!("Failed to shut-down the cache sweeper: {:?}", err),
                    Err(err) => error!("Failed waiting to shut-down the cache sweeper: {:?}", err),
                    _ => ()
                };
                break;
            }
        }; // End tokio::select!.
    } // End loop.

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Transition to async
///
/// Logging is only configured *after* starting the async runtime, and we only want to enter
/// `serve()` *after* spinning-up logging, because it carries-out some interesting logging & we'd
/// like that instrumented with the instance ID. This function is intended to be invoked via
/// `block_on()`; it will configure our logging & then call `serve()`.
async fn go_async(
    opts: CliOpts,
    bootstrap_logging_guard: tracing::dispatcher::DefaultGuard,
) -> Result<()> {
    // Take care to configure logging *before* we call `serve()` since it's instrumented (if we
    // don't, the span that's created on entry to `serve()` is ignored).
    let cfg = parse_config(&opts.cfg)?;
    let (formatter, filter) = configure_logging(&opts.log_opts)?;

    // Setup the global logger. Nb. this can only be invoked once (will panic on a second
    // invocation)!
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)?;
    // Drop the guard, cleaning-up the bootstrap logger
    drop(bootstrap_logging_guard);

    // At this point we have logging-- huzzah!
    info!(
        "spidergram version {}, instance {} starting.",
        crate_version!(),
        opts.instance_id
    );

    serve(opts, cfg).await
}

fn main() -> Result<()> {
    // Most of spidergramd's configuration is read from file; the few command-line options that it
    // accepts govern where to find the configuration file & process startup that takes place
    // before the configuration file is parsed. They all have corresponding environment variables
    // for the sake of convenience when running spidergram in a container.
    let opts = CliOpts::new(
        Command::new("spidergramd")
            .version(crate_version!())
            .author(crate_authors!())
            .about("Radar charts over HTTP")
            .long_about(
                "`spidergram` renders radar-chart images from legacy chart-image-service URLs.",
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("SPIDERGRAM_CONFIG")
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
                    .env("SPIDERGRAM_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("instance-id")
                    .short('I')
                    .long("instance-id")
                    .num_args(1)
                    .value_parser(value_parser!(Uuid))
                    .env("SPIDERGRAM_INSTANCE_ID")
                    .help("Instance ID (only salient when running multiple instances)")
                    .long_help(
                        "Instance ID
A UUID identifying this spidergram instance. If not given, a random UUID will be used.",
                    ),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SPIDERGRAM_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SPIDERGRAM_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SPIDERGRAM_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    );

    // There are a number of things that can go wrong before we've parsed our configuration file &
    // configured logging for the process. Setup a *temporary* logger via `set_default()`: just
    // log to stderr, at whatever level our command line arguments dictate.
    let bootstrap_subscriber = tracing_subscriber::registry::Registry::default()
        .with(tracing_subscriber::fmt::Layer::default().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(opts.log_opts.level.into())
                .from_env()
                .context(EnvFilterSnafu)?,
        );
    let bootstrap_logging_guard = tracing::subscriber::set_default(bootstrap_subscriber);
    debug!("Temporarily logging to stderr while initializing.");

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts, bootstrap_logging_guard)) // and start our server!
}
