#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examcore::run_enforcer().await {
        eprintln!("examcore-enforcer fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
