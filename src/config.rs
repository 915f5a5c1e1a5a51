use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::thread;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::artifact::Artifact;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve box-prompted segmentation over HTTP
    Serve(ServeConfig),
    /// Classify leaf photos into plant/disease classes
    Diagnose(DiagnoseConfig),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, for development
    Pretty,
    /// One JSON object per line, for production
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct ServeConfig {
    #[arg(long, env = "LEAF_SAM_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(short, long, env = "LEAF_SAM_PORT", default_value_t = 5000)]
    pub port: u16,

    #[arg(long, env = "LEAF_SAM_ENCODER")]
    pub encoder_path: PathBuf,

    #[arg(long, env = "LEAF_SAM_DECODER")]
    pub decoder_path: PathBuf,

    #[arg(short, long, env = "LEAF_SAM_DEVICE_ID", default_value_t = 0)]
    pub device_id: i32,

    /// Largest accepted upload, in MiB
    #[arg(long, env = "LEAF_SAM_MAX_UPLOAD_MB", default_value_t = 32, value_parser = check_upload_limit)]
    pub max_upload_mb: usize,

    /// Forward malformed boxes to the model instead of rejecting them with 400
    #[arg(long, env = "LEAF_SAM_ALLOW_MALFORMED_BOXES")]
    pub allow_malformed_boxes: bool,

    #[arg(long, env = "LEAF_SAM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl ServeConfig {
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub const fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

#[derive(Args, Clone, Debug)]
pub struct DiagnoseConfig {
    /// Image file, directory of images, or the bare name of a bundled sample
    pub input: String,

    #[arg(short, long, default_value = "pd_densenet201_6.onnx")]
    pub model_path: PathBuf,

    /// Where to fetch the checkpoint from when it is missing
    #[arg(long)]
    pub model_url: Option<String>,

    /// Expected checkpoint size in bytes
    #[arg(long)]
    pub expected_size: Option<u64>,

    #[arg(long, default_value_t = 256)]
    pub image_size: u32,

    /// Directory bare sample names are looked up in
    #[arg(long, default_value = "test")]
    pub sample_dir: PathBuf,

    #[arg(
        short, long, default_value_t = thread::available_parallelism().map_or(1, |n| n.get())
    )]
    pub num_threads: usize,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl DiagnoseConfig {
    pub fn artifact(&self) -> Artifact {
        let mut artifact = Artifact::new(&self.model_path);
        if let Some(url) = &self.model_url {
            artifact = artifact.with_url(url);
        }
        if let Some(size) = self.expected_size {
            artifact = artifact.with_expected_size(size);
        }
        artifact
    }
}

fn check_upload_limit(s: &str) -> Result<usize, String> {
    let mb: usize = s
        .parse()
        .map_err(|_| format!("`{s}` is not a whole number of MiB"))?;
    if mb == 0 || mb > 1024 {
        return Err(format!("{mb} MiB is out of range. Use 1..=1024"));
    }
    Ok(mb)
}
