use anyhow::Result;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    info!("breccia starting");
    breccia_cli::CliEngine::new().run()?;
    Ok(())
}
