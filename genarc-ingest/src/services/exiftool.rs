//! Metadata read/write capability backed by a long-running exiftool process
//!
//! One process is started per creation in `-stay_open` mode and fed argument
//! files over stdin. Each command ends with `-execute<N>`; exiftool answers with
//! `{ready<N>}` on stdout, and `-echo4` puts the same marker on stderr so both
//! streams can be drained per command.

use crate::error::ToolError;
use crate::model::TagMap;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Flag that makes exiftool replace the file instead of keeping `<file>_original`
pub const OVERWRITE_ORIGINAL: &str = "-overwrite_original";

/// Suffix of the backup exiftool leaves next to a file it rewrote
pub const BACKUP_SUFFIX: &str = "_original";

/// Read and write embedded tags
#[async_trait]
pub trait MetadataTool: Send {
    /// Grouped tags (`EXIF:UserComment`, `PNG:parameters`, ...)
    async fn read(&mut self, path: &Path) -> Result<TagMap, ToolError>;

    /// Write tags in place; `Null` values delete the tag
    async fn write(&mut self, path: &Path, tags: &TagMap, flags: &[&str]) -> Result<(), ToolError>;

    /// Release the underlying process
    async fn close(&mut self) -> Result<(), ToolError>;
}

/// Opens a [`MetadataTool`] scoped to one creation
#[async_trait]
pub trait MetadataToolFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MetadataTool>, ToolError>;
}

/// Starts `exiftool -stay_open True -@ -`
pub struct ExifToolFactory {
    binary_path: PathBuf,
}

impl ExifToolFactory {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl MetadataToolFactory for ExifToolFactory {
    async fn open(&self) -> Result<Box<dyn MetadataTool>, ToolError> {
        Ok(Box::new(ExifTool::spawn(&self.binary_path)?))
    }
}

/// A running exiftool process
pub struct ExifTool {
    tool: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    seq: u32,
    closed: bool,
}

impl ExifTool {
    pub fn spawn(binary_path: &Path) -> Result<Self, ToolError> {
        let tool = binary_path.display().to_string();
        let mut child = Command::new(binary_path)
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                tool: tool.clone(),
                source,
            })?;

        let missing = |stream: &str| ToolError::Failed {
            tool: tool.clone(),
            message: format!("{} not captured", stream),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        debug!(tool = %tool, "Started exiftool");

        Ok(Self {
            tool,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            seq: 0,
            closed: false,
        })
    }

    /// Send one command and collect its stdout and stderr
    async fn execute(&mut self, args: &[String]) -> Result<(String, String), ToolError> {
        if self.closed {
            return Err(ToolError::Failed {
                tool: self.tool.clone(),
                message: "process already closed".to_string(),
            });
        }
        self.seq += 1;
        let marker = format!("{{ready{}}}", self.seq);

        let mut script = String::new();
        for arg in args {
            script.push_str(arg);
            script.push('\n');
        }
        script.push_str(&format!("-echo4\n{}\n-execute{}\n", marker, self.seq));
        self.stdin.write_all(script.as_bytes()).await?;
        self.stdin.flush().await?;

        let out = read_until(&mut self.stdout, &marker, &self.tool).await?;
        let err = read_until(&mut self.stderr, &marker, &self.tool).await?;
        Ok((out, err))
    }
}

async fn read_until<R>(lines: &mut Lines<R>, marker: &str, tool: &str) -> Result<String, ToolError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut collected = String::new();
    loop {
        match lines.next_line().await? {
            Some(line) if line.trim() == marker => return Ok(collected),
            Some(line) => {
                collected.push_str(&line);
                collected.push('\n');
            }
            None => {
                return Err(ToolError::Failed {
                    tool: tool.to_string(),
                    message: "process exited unexpectedly".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl MetadataTool for ExifTool {
    async fn read(&mut self, path: &Path) -> Result<TagMap, ToolError> {
        let args = vec![
            "-json".to_string(),
            "-G".to_string(),
            "-charset".to_string(),
            "filename=utf8".to_string(),
            path.display().to_string(),
        ];
        let (out, err) = self.execute(&args).await?;
        if let Some(message) = first_error(&err) {
            return Err(ToolError::Failed {
                tool: self.tool.clone(),
                message,
            });
        }
        parse_read_output(&out).map_err(|message| ToolError::Output {
            tool: self.tool.clone(),
            message,
        })
    }

    async fn write(&mut self, path: &Path, tags: &TagMap, flags: &[&str]) -> Result<(), ToolError> {
        let mut args = write_args(tags);
        args.extend(flags.iter().map(|f| f.to_string()));
        args.push("-charset".to_string());
        args.push("filename=utf8".to_string());
        args.push(path.display().to_string());

        let (out, err) = self.execute(&args).await?;
        if let Some(message) = first_error(&err) {
            return Err(ToolError::Failed {
                tool: self.tool.clone(),
                message,
            });
        }
        for line in err.lines().filter(|l| !l.trim().is_empty()) {
            warn!(path = %path.display(), "exiftool: {}", line);
        }
        debug!(path = %path.display(), result = out.trim(), "Tags written");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ToolError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stdin.write_all(b"-stay_open\nFalse\n").await?;
        self.stdin.flush().await?;
        let status = self.child.wait().await?;
        debug!(tool = %self.tool, ?status, "exiftool exited");
        Ok(())
    }
}

fn first_error(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("Error"))
        .map(str::to_string)
}

/// First object of exiftool's `-json` array output, without `SourceFile`
fn parse_read_output(out: &str) -> Result<TagMap, String> {
    let value: Value = serde_json::from_str(out.trim()).map_err(|e| e.to_string())?;
    match value {
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(mut map)) => {
                map.remove("SourceFile");
                Ok(map)
            }
            _ => Err("expected an array of objects".to_string()),
        },
        _ => Err("expected a JSON array".to_string()),
    }
}

/// `-TAG=value` arguments; values are HTML-escaped and decoded by `-E`
fn write_args(tags: &TagMap) -> Vec<String> {
    let mut args = vec!["-E".to_string()];
    for (name, value) in tags {
        let text = match value {
            Value::Null => String::new(),
            Value::String(s) => escape_value(s),
            other => escape_value(&other.to_string()),
        };
        args.push(format!("-{}={}", name, text));
    }
    args
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\n' => out.push_str("&#xa;"),
            '\r' => out.push_str("&#xd;"),
            c => out.push(c),
        }
    }
    out
}
