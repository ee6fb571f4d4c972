//! Gateway Server - chat completion, face verification and document OCR
//! behind one HTTP service.

use server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    server::start_server(config).await?;
    Ok(())
}
