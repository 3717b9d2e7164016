mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

pub use error::{ProbeError, ProbeResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    #[serde(default = "default_duration_args")]
    pub duration_args: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_file_check_retries")]
    pub file_check_retries: u32,
    #[serde(default = "default_file_check_delay_secs")]
    pub file_check_delay_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: default_ffprobe_path(),
            duration_args: default_duration_args(),
            timeout_secs: default_probe_timeout_secs(),
            file_check_retries: default_file_check_retries(),
            file_check_delay_secs: default_file_check_delay_secs(),
        }
    }
}

impl ProbeConfig {
    pub fn file_check_delay(&self) -> Duration {
        Duration::from_secs(self.file_check_delay_secs)
    }
}

fn default_ffprobe_path() -> String {
    "ffprobe".into()
}

fn default_duration_args() -> String {
    "-v error -show_entries format=duration -of default=noprint_wrappers=1:nokey=1 {input}".into()
}

fn default_probe_timeout_secs() -> u64 {
    120
}

fn default_file_check_retries() -> u32 {
    2
}

fn default_file_check_delay_secs() -> u64 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_proxy_args")]
    pub args: String,
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    #[serde(default = "default_target_width")]
    pub target_width: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_proxy_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            args: default_proxy_args(),
            output_folder: default_output_folder(),
            target_width: default_target_width(),
            output_format: default_output_format(),
            timeout_secs: default_proxy_timeout_secs(),
        }
    }
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}

fn default_proxy_args() -> String {
    "-analyzeduration 0 -probesize 5000000 -y -hide_banner -i {input} \
     -filter:v scale=w={width}:h=trunc(ow/a/2)*2 -f mp4 {output}"
        .into()
}

fn default_output_folder() -> String {
    "proxy".into()
}

fn default_target_width() -> String {
    "240".into()
}

fn default_output_format() -> String {
    ".mp4".into()
}

fn default_proxy_timeout_secs() -> u64 {
    3600
}

/// Expands `{name}` placeholders in each space-separated template argument.
pub fn render_args(template: &str, values: &[(&str, &str)]) -> Vec<String> {
    template
        .split(' ')
        .filter(|arg| !arg.is_empty())
        .map(|arg| {
            values.iter().fold(arg.to_string(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Whole seconds of a probed duration, rounded up past any fraction.
pub fn parse_duration_output(stdout: &[u8]) -> ProbeResult<u64> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    match text.parse::<f64>() {
        Ok(duration) if duration.is_finite() && duration >= 0.0 => Ok(duration as u64 + 1),
        _ => Err(ProbeError::InvalidDuration(text.to_string())),
    }
}

/// `object` with its extension swapped for `output_format` (e.g. `.mp4`).
pub fn proxy_output_name(object: &str, output_format: &str) -> String {
    if object.ends_with(output_format) {
        return object.to_string();
    }
    let file_start = object.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    let stem_end = match object[file_start..].rfind('.') {
        Some(dot) if dot > 0 => file_start + dot,
        _ => object.len(),
    };
    format!("{}{}", &object[..stem_end], output_format)
}

/// Polls for `path`, sleeping `delay` after each miss.
pub async fn wait_for_input_file(path: &Path, retries: u32, delay: Duration) -> ProbeResult<PathBuf> {
    for attempt in 1..=retries {
        if tokio::fs::metadata(path).await.is_ok() {
            return Ok(path.to_path_buf());
        }
        debug!(path = %path.display(), attempt, "input file not present yet");
        sleep(delay).await;
    }
    Err(ProbeError::InputMissing {
        path: path.to_path_buf(),
        retries,
    })
}

async fn run_tool(program: &str, args: &[String], limit: Duration) -> ProbeResult<Vec<u8>> {
    let mut command = Command::new(program);
    command.kill_on_drop(true).args(args);
    debug!(program, args = ?args, "running media tool");
    match timeout(limit, command.output()).await {
        Ok(Ok(output)) if output.status.success() => Ok(output.stdout),
        Ok(Ok(output)) => Err(ProbeError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        Ok(Err(source)) => Err(ProbeError::Spawn {
            program: program.to_string(),
            source,
        }),
        Err(_) => Err(ProbeError::Timeout {
            program: program.to_string(),
            timeout_secs: limit.as_secs(),
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    config: ProbeConfig,
}

impl MediaProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub async fn wait_for(&self, path: &Path) -> ProbeResult<PathBuf> {
        wait_for_input_file(
            path,
            self.config.file_check_retries,
            self.config.file_check_delay(),
        )
        .await
    }

    pub async fn duration_secs(&self, path: &Path) -> ProbeResult<u64> {
        let input = path.to_string_lossy();
        let args = render_args(&self.config.duration_args, &[("input", input.as_ref())]);
        let stdout = run_tool(
            &self.config.ffprobe_path,
            &args,
            Duration::from_secs(self.config.timeout_secs),
        )
        .await?;
        let seconds = parse_duration_output(&stdout)?;
        info!(path = %path.display(), seconds, "probed media duration");
        Ok(seconds)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyTranscoder {
    config: ProxyConfig,
}

impl ProxyTranscoder {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Path of the proxy relative to the mount point.
    pub fn relative_output(&self, object: &str) -> String {
        format!(
            "{}/{}",
            self.config.output_folder.trim_end_matches('/'),
            proxy_output_name(object, &self.config.output_format)
        )
    }

    /// Transcodes into a temp file, then copies it to `{mount_point}/{relative_output}`.
    pub async fn transcode(&self, input: &Path, mount_point: &Path, object: &str) -> ProbeResult<String> {
        let temp = tempfile::Builder::new()
            .prefix("ffmpeg-output-")
            .suffix(&self.config.output_format)
            .tempfile()
            .map_err(|source| ProbeError::Io {
                path: std::env::temp_dir(),
                source,
            })?
            .into_temp_path();

        let input_arg = input.to_string_lossy();
        let output_arg = temp.to_string_lossy();
        let args = render_args(
            &self.config.args,
            &[
                ("input", input_arg.as_ref()),
                ("width", self.config.target_width.as_str()),
                ("output", output_arg.as_ref()),
            ],
        );
        run_tool(
            &self.config.ffmpeg_path,
            &args,
            Duration::from_secs(self.config.timeout_secs),
        )
        .await?;

        let relative = self.relative_output(object);
        let destination = mount_point.join(&relative);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ProbeError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::copy(&temp, &destination)
            .await
            .map_err(|source| ProbeError::Io {
                path: destination.clone(),
                source,
            })?;
        info!(destination = %destination.display(), "proxy written");
        Ok(relative)
    }
}
