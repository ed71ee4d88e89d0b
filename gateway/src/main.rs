mod actuator;
mod api;
mod arbiter;
mod error;
mod host;
mod input;
mod relay;
mod scanner;
mod shared;
mod sweeper;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
