#[tokio::main]
async fn main() {
    if let Err(e) = gridwatch_lib::run().await {
        tracing::error!(error = %e, "gridwatch exited with an error");
        eprintln!("gridwatch: {e}");
        std::process::exit(1);
    }
}
