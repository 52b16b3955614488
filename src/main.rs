use jenkins_exporter::{logging::init_logging, JenkinsExporter};

use crate::args::process_cli_args;

mod args;

#[tokio::main]
async fn main() {
    let config = process_cli_args().unwrap_or_else(|e| {
        eprintln!("Jenkins exporter config error: {e}");
        std::process::exit(1);
    });

    init_logging();

    if let Err(e) = JenkinsExporter::new(config).start().await {
        tracing::error!("Exporter error'ed out: {e}");
        std::process::exit(1);
    }
}
