//! CLI argument handling for the exporter binary.

use jenkins_exporter::{config::ExporterConfig, error::ExporterErrorKind};

const DEFAULT_CONFIG_PATH: &str = "jenkins-exporter.toml";

const USAGE: &str = "Usage:
    -h, --help             Show this message
    -c, --config <PATH>    Path to the TOML configuration file
                           (default: jenkins-exporter.toml)";

struct Args {
    config_path: String,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut config_path: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            "-c" | "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| format!("missing path after {arg}\n{USAGE}"))?;
                config_path = Some(path);
            }
            other => return Err(format!("unknown argument: {other}\n{USAGE}")),
        }
    }

    Ok(Args {
        config_path: config_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
    })
}

/// Parse the command line and load the configuration file it names.
pub fn process_cli_args() -> Result<ExporterConfig, ExporterErrorKind> {
    let args = parse_args().map_err(ExporterErrorKind::InvalidConfiguration)?;
    ExporterConfig::from_file(&args.config_path)
}
