use anyhow::Context;
use tokio_util::sync::CancellationToken;

use waba_relay::config::RelayConfig;
use waba_relay::consumer::{JetStreamSource, PollBackoff, StreamConsumer};
use waba_relay::delivery::DeliveryClient;
use waba_relay::pipeline::{EventProcessor, MessageClassifier, PayloadTransformer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Warning: a rustls crypto provider was already installed");
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = RelayConfig::from_env().context("invalid relay configuration")?;

    eprintln!("📨 WABA Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   NATS: {}", config.stream.servers);
    eprintln!(
        "   Consumer: {} on {}",
        config.stream.consumer, config.stream.stream
    );
    eprintln!(
        "   Profile: {} ({} variants, archive {})",
        config.profile.name,
        config.profile.supported.len(),
        if config.profile.archive_enabled { "on" } else { "off" }
    );
    eprintln!(
        "   Routes: {} forward, {} archive",
        config.forward_routes.len(),
        config.archive_routes.len()
    );
    eprintln!(
        "   Backoff: {}s..{}s, request timeout {}ms\n",
        config.min_backoff_secs,
        config.max_backoff_secs,
        config.request_timeout.as_millis()
    );

    let router = config.take_router();
    let delivery = DeliveryClient::new(config.retry, config.request_timeout)
        .context("failed to build HTTP client")?;
    let processor = EventProcessor::new(
        router,
        MessageClassifier::new(config.profile.clone()),
        PayloadTransformer::new(
            config.forward_template.clone(),
            config.archive_template.clone(),
            config.profile.schema,
        ),
        delivery,
    );

    let source = JetStreamSource::connect(config.stream.clone())
        .await
        .context("failed to bind stream consumer")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, draining");
                signal_token.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for interrupt signal"),
        }
    });

    let mut consumer = StreamConsumer::new(
        source,
        processor,
        PollBackoff::from_secs(config.min_backoff_secs, config.max_backoff_secs),
    )
    .with_redeliver_failed(config.redeliver_failed);

    consumer.run(shutdown).await.context("consumer loop failed")?;
    Ok(())
}
