use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tiangong_cli::run().await
}
