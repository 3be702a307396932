use std::{
    process,
    sync::{Arc, OnceLock},
};

use iotdatatunnel::{
    config::Config,
    core::pipeline::Pipeline,
    logger::LoggerManager,
    print_error,
};
use iotdatatunnel_mqtt::{ConnectionListener, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

/// Logs connection lifecycle events.
struct ConnectionLog;

impl ConnectionListener for ConnectionLog {
    fn on_connected(&self) {
        info!("Connected to broker");
    }

    fn on_connection_lost(&self, cause: &TransportError) {
        warn!("Connection lost: {}", cause);
    }

    fn on_disconnected(&self) {
        info!("Disconnected from broker");
    }
}

fn log_rules_table(pipeline: &Pipeline) {
    let width = pipeline
        .rules()
        .iter()
        .map(|rule| rule.name().len())
        .max()
        .unwrap_or(0)
        .max("Rule".len());

    info!("{:<width$} | Topic", "Rule", width = width);
    info!("{}-+-{}", "-".repeat(width), "-".repeat(12));
    for rule in pipeline.rules() {
        info!(
            "{:<width$} | {}",
            rule.name(),
            rule.topic().unwrap_or("(all)"),
            width = width
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting iotdatatunnel version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.subscriber);

    let buffer = cfg.buffer.build();
    info!("Message buffer: {}", cfg.buffer.kind);

    let subscriber = cfg
        .subscriber
        .to_builder()
        .buffer(buffer.clone())
        .build()
        .unwrap_or_else(|e| {
            error!("Invalid subscriber configuration: {}", e);
            process::exit(1);
        });
    info!(
        "Subscriber '{}' for {} ({} topic(s))",
        subscriber.config().client_id(),
        subscriber.config().broker().url(),
        subscriber.config().topics().len()
    );

    subscriber.add_connection_listener(Arc::new(ConnectionLog));

    let pipeline = Pipeline::new(buffer, &cfg.pipeline);
    if pipeline.rules().is_empty() {
        warn!("No pipeline rules configured, messages will only be drained");
    } else {
        log_rules_table(&pipeline);
    }

    let cancel = CancellationToken::new();
    subscriber.connect();

    tokio::select! {
        _ = pipeline.run(subscriber.state_receiver(), cancel.clone()) => {
            error!("Pipeline unexpectedly finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
    }

    cancel.cancel();
    subscriber.disconnect();
    pipeline.drain();
    info!(
        "Shutdown complete ({} processed, {} matched)",
        pipeline.processed(),
        pipeline.matched()
    );
    Ok(())
}
