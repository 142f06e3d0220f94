use clap::Parser;
use gphotos_upload::cli::{run, Cli};

#[tokio::main]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the progress lines.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "CLI exited with error");
        eprintln!("gphotos-upload: {e:#}");
        std::process::exit(255);
    }
}
