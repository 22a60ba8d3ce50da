#[tokio::main]
async fn main() -> anyhow::Result<()> {
    streamseg_cli::run().await
}
