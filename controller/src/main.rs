mod backend;
mod host;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
