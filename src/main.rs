use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::io::Write;
use std::sync::Arc;

use pspl::indexer::ConvertProgress;
use pspl::{build, cli};

/// Converter progress on an indicatif bar.
struct BarProgress {
    bar: ProgressBar,
}

impl ConvertProgress for BarProgress {
    fn status(&self, message: &str) {
        self.bar.set_position(0);
        self.bar.set_message(message.to_string());
    }

    fn progress(&self, fraction: f64) {
        self.bar.set_position((fraction.clamp(0.0, 1.0) * 100.0) as u64);
    }
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let log_level_filter = cli.verbose.log_level_filter();

    env_logger::Builder::new()
        .format(|buf, record| writeln!(buf, "{}:\n{}", record.level(), record.args()))
        .filter_level(log_level_filter)
        .target(env_logger::fmt::Target::Stdout)
        .init();

    // Pretty output only at the default level; quieter or chattier runs get plain logs.
    let show_progress = log_level_filter == LevelFilter::Info;

    let bar = if show_progress {
        ProgressBar::new(100).with_style(ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}%")?)
    } else {
        ProgressBar::hidden()
    };
    let progress = Arc::new(BarProgress { bar: bar.clone() });

    let config = cli.build_config().context("could not assemble the build configuration")?;
    match build::build(config, progress) {
        Err(e) => {
            bar.finish_and_clear();
            eprintln!("{} {e}", style("error:").red().bold());
            std::process::exit(1)
        }
        Ok(report) => {
            bar.finish_and_clear();
            if show_progress {
                let outputs = report
                    .outputs
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "{} {} ({} compiled, {} loaded, {} warnings)",
                    style("Wrote").green().bold(),
                    outputs,
                    report.compiled,
                    report.loaded,
                    report.warnings.len()
                );
            }
            std::process::exit(0)
        }
    }
}
