use std::sync::Arc;

use pushline::{Config, Connection, NotificationSink, Payload};

#[derive(Debug)]
struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn on_connectivity_changed(&self, connected: bool) {
        log::info!("Connectivity changed: {}", connected);
    }

    async fn on_message(&self, payload: Payload) {
        log::info!("Message: {:?}", payload);
    }

    async fn on_aggregation(&self, payload: Payload) {
        log::info!("Aggregation: {:?}", payload);
    }
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let config = Config::from_env()
        .map_err(|err| {
            println!("Invalid PUSHLINE_* env vars: {}", err);
            std::process::exit(1);
        })
        .unwrap();

    let sink = Arc::new(LogSink);
    let connection = Connection::new(config, &sink);

    connection.start();

    tokio::signal::ctrl_c().await.unwrap();

    log::info!("Shutting down");

    connection.shutdown().await;
}
