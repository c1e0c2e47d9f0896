use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use durable_agents::actors::{start_directory, AgentFactory};
use durable_agents::api::{configure, rate_limit, request_logging, ApiState};
use durable_agents::config::Config;
use durable_agents::domain::Orchestrator;
use durable_agents::messaging::{MessageQueue, MessageValidator};
use durable_agents::metrics::{self, FanoutTelemetry, Metrics, Telemetry, TracingTelemetry};
use durable_agents::store::{ensure_schema, RedisStore, ScyllaMessageRows, ScyllaStateStore};
use durable_agents::utils::{HttpTransport, RateLimiter, RetryClient};

const ORCHESTRATOR_ID: &str = "ci";

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,durable_agents=debug")),
        )
        .init();

    tracing::info!("🚀 Starting durable agents");
    let config = Config::from_env()?;

    // === 1. ScyllaDB: agent state and message rows ===
    tracing::info!(node = %config.scylla_node, "Connecting to ScyllaDB...");
    let session: Session = SessionBuilder::new()
        .known_node(&config.scylla_node)
        .build()
        .await?;
    ensure_schema(&session, &config.scylla_keyspace).await?;
    let session = Arc::new(session);

    // === 2. Redis: rate limit counters ===
    let redis = RedisStore::connect(&config.redis_url).await?;

    // === 3. Prometheus metrics and telemetry fan-out ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    });

    let sinks: Vec<Arc<dyn Telemetry>> = vec![metrics.clone(), Arc::new(TracingTelemetry)];
    let telemetry: Arc<dyn Telemetry> = Arc::new(FanoutTelemetry::new(sinks));

    // === 4. Queue, outbound client, agents ===
    let queue = Arc::new(
        MessageQueue::new(Arc::new(ScyllaMessageRows::new(session.clone())), telemetry.clone())
            .with_pending_limit(config.pending_batch_limit),
    );

    let client = RetryClient::new(Arc::new(HttpTransport::default()), telemetry.clone())
        .with_backoff(config.retry())
        .with_attempt_timeout(config.outbound_timeout);

    let orchestrator =
        Orchestrator::new(vec![ORCHESTRATOR_ID.to_string()]).with_client(Arc::new(client));
    let factory = AgentFactory::new(
        Arc::new(ScyllaStateStore::new(session.clone())),
        queue.clone(),
        telemetry.clone(),
    )
    .register(ORCHESTRATOR_ID, Arc::new(orchestrator));

    let state = ApiState {
        directory: start_directory(factory.clone()),
        agents: factory,
        queue,
        validator: MessageValidator::new(config.max_message_bytes),
        telemetry: telemetry.clone(),
    };
    let limiter = web::Data::new(RateLimiter::new(
        Arc::new(redis),
        telemetry,
        config.rate_limit,
    ));
    let state = web::Data::new(state);
    let max_message_bytes = config.max_message_bytes;

    // === 5. HTTP ingress ===
    tracing::info!(addr = %config.bind_addr, "🌐 Serving agents");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(limiter.clone())
            .app_data(web::PayloadConfig::new(max_message_bytes))
            .wrap(from_fn(rate_limit))
            .wrap(from_fn(request_logging))
            .configure(configure)
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    tracing::info!("👋 Shutdown complete");
    Ok(())
}
