//! FFmpeg muxer pipe
//!
//! Spawns FFmpeg reading the raw elementary stream from stdin and stream-copying
//! it into a container file. Closing stdin ends the stream; FFmpeg then writes
//! the container trailer and exits.

use super::{Container, PacketSink};
use crate::config::SinkConfig;
use crate::error::{Error, Result};

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

/// Packet sink writing into an FFmpeg subprocess
pub struct FfmpegPipe {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    program: String,
    log_file: Option<PathBuf>,
    bytes_written: u64,
    packets: u64,
}

impl FfmpegPipe {
    /// Command-line arguments for a sink configuration
    pub fn command_args(config: &SinkConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if config.overwrite {
            args.push("-y".into());
        }
        args.extend(["-f", config.codec.ffmpeg_demuxer(), "-i", "-"].map(OsString::from));
        args.extend(["-c:v", "copy", "-r"].map(OsString::from));
        args.push(config.framerate.to_ffmpeg_arg().into());
        if let Some(container) = config.container {
            args.push("-f".into());
            args.push(container.ffmpeg_format().into());
        }
        args.push(config.path.clone().into_os_string());
        args.push("-loglevel".into());
        args.push(config.log_level.clone().into());
        if config.stats {
            args.push("-stats".into());
        }
        args
    }

    /// Start FFmpeg for `config`, with stderr redirected to the log file
    pub fn open(config: &SinkConfig) -> Result<Self> {
        let args = Self::command_args(config);

        match config.container.or_else(|| Container::from_path(&config.path)) {
            Some(container) => tracing::debug!("Muxing into {} container", container.extension()),
            None => tracing::warn!(
                "Cannot infer container from {}; FFmpeg will decide",
                config.path.display()
            ),
        }

        let stderr = match &config.log_file {
            Some(path) => {
                let file = File::create(path).map_err(|e| {
                    Error::SinkOpen(format!("cannot create log {}: {}", path.display(), e))
                })?;
                Stdio::from(file)
            }
            None => Stdio::null(),
        };

        tracing::info!(
            "Starting FFmpeg: {} {}",
            config.ffmpeg.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut command = Command::new(&config.ffmpeg);
        command.args(&args).stderr(stderr);

        let mut pipe = Self::spawn(command)?;
        pipe.log_file = config.log_file.clone();
        Ok(pipe)
    }

    /// Spawn an arbitrary muxer command with a piped stdin
    pub fn spawn(mut command: Command) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| Error::SinkOpen(format!("failed to start {}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::SinkOpen(format!("{} has no stdin pipe", program)))?;

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            program,
            log_file: None,
            bytes_written: 0,
            packets: 0,
        })
    }

    /// Packets written so far
    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    fn stdin(&mut self) -> Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| Error::Sink(format!("{} pipe already closed", self.program)))
    }
}

impl PacketSink for FfmpegPipe {
    fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        self.stdin()?
            .write_all(data)
            .map_err(|e| Error::Sink(format!("write to {} failed: {}", self.program, e)))?;
        self.bytes_written += data.len() as u64;
        self.packets += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stdin()?
            .flush()
            .map_err(|e| Error::Sink(format!("flush to {} failed: {}", self.program, e)))
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // Closing stdin is the end-of-stream signal
        drop(self.stdin.take());

        let status = child.wait()?;
        if !status.success() {
            let hint = self
                .log_file
                .as_ref()
                .map(|p| format!(" (see {})", p.display()))
                .unwrap_or_default();
            return Err(Error::Muxer(format!("{} exited with {}{}", self.program, status, hint)));
        }

        tracing::info!(
            "FFmpeg pipe closed: {} packets, {} bytes ({:.2} MB)",
            self.packets,
            self.bytes_written,
            self.bytes_written as f64 / 1_000_000.0
        );
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for FfmpegPipe {
    fn drop(&mut self) {
        // Reap the muxer if finish was skipped
        if let Some(mut child) = self.child.take() {
            drop(self.stdin.take());
            let _ = child.wait();
        }
    }
}
