use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;

use crate::binary::Endianness;
use crate::config::{BuildConfig, BuildMode, ConfigFile, PlatformSpec};
use crate::error::Result;

/// Preprocess, compile and package PSPL sources.
#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Compile PSPL sources into PSPLC units or a PSPLP package")]
pub struct Cli {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// `.pspl` sources, or compiled `.psplc` units when packaging. Package
    /// order follows argument order.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output file. With --compile-only and several inputs, a directory.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Staging directory for converted and copied files.
    #[arg(long, value_name = "DIR")]
    pub staging: Option<PathBuf>,

    /// Define a name for preprocessor directives.
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]", value_parser = parse_define)]
    pub defines: Vec<(String, String)>,

    /// Target platform, optionally with the byte order it demands.
    #[arg(long = "platform", value_name = "NAME[:le|:be]")]
    pub platforms: Vec<PlatformSpec>,

    /// Output byte order when the platforms leave it open: little, big or bi.
    #[arg(long)]
    pub endian: Option<Endianness>,

    /// Only run the preprocessor and write its output text.
    #[arg(long, conflicts_with = "compile_only")]
    pub preprocess_only: bool,

    /// Write one PSPLC per source instead of a package.
    #[arg(long)]
    pub compile_only: bool,

    /// JSON file with defaults for the options above.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Spaces per indent level.
    #[arg(long)]
    pub tab_width: Option<usize>,
}

impl Cli {
    pub fn mode(&self) -> BuildMode {
        if self.preprocess_only {
            BuildMode::PreprocessOnly
        } else if self.compile_only {
            BuildMode::CompileOnly
        } else {
            BuildMode::Package
        }
    }

    /// The build configuration: config file defaults, then flags.
    pub fn build_config(&self) -> Result<BuildConfig> {
        let mut builder = BuildConfig::builder();
        if let Some(path) = &self.config {
            builder = builder.config_file(ConfigFile::read(path)?);
        }
        builder = builder
            .inputs(self.inputs.clone())
            .output(self.output.clone())
            .mode(self.mode());
        if let Some(dir) = &self.staging {
            builder = builder.staging_dir(dir);
        }
        for (name, value) in &self.defines {
            builder = builder.define(name, value);
        }
        for platform in &self.platforms {
            builder = builder.platform(platform.clone());
        }
        if let Some(endianness) = self.endian {
            builder = builder.endianness(endianness);
        }
        if let Some(width) = self.tab_width {
            builder = builder.tab_width(width);
        }
        Ok(builder.build())
    }
}

fn parse_define(text: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = text.split_once('=').unwrap_or((text, ""));
    if name.is_empty() {
        return Err(format!("empty define name in '{text}'"));
    }
    Ok((name.to_string(), value.to_string()))
}
