//! Subprocess isolate.
//!
//! Plugin code is evaluated by a separate runner process. The two sides
//! exchange length-prefixed MessagePack frames over stdio:
//!
//! ```text
//! [u32 big-endian length][rmp-serde encoded Frame]
//! ```
//!
//! The runner only ever sees the code, the binding allowlist and hook
//! payloads; it has no handle back into the compiler.

use crate::plugin::{Isolate, IsolateFactory, Request, Response};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Largest frame either side will accept.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Load { code: String, bindings: Vec<String> },
    Loaded { hooks: Vec<String> },
    Failed { error: String },
    Batch { requests: Vec<Request> },
    Results { responses: Vec<Response> },
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    let bytes = rmp_serde::to_vec_named(frame).map_err(|e| format!("encode: {e}"))?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(format!("frame of {} bytes exceeds limit", bytes.len()));
    }
    let len = u32::try_from(bytes.len()).map_err(|e| e.to_string())?;
    writer.write_u32(len).await.map_err(|e| e.to_string())?;
    writer.write_all(&bytes).await.map_err(|e| e.to_string())?;
    writer.flush().await.map_err(|e| e.to_string())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await.map_err(|e| format!("read length: {e}"))? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(format!("frame of {len} bytes exceeds limit"));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| format!("read frame: {e}"))?;
    rmp_serde::from_slice(&buf).map_err(|e| format!("decode: {e}"))
}

/// An isolate on the far side of a framed byte stream.
pub struct FramedIsolate<R, W> {
    io: Mutex<(R, W)>,
    _child: Option<Child>,
}

impl<R, W> FramedIsolate<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
            _child: None,
        }
    }

    async fn roundtrip(&self, frame: Frame) -> Result<Frame, String> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        write_frame(writer, &frame).await?;
        read_frame(reader).await
    }
}

#[async_trait]
impl<R, W> Isolate for FramedIsolate<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn load(&self, code: &str, bindings: &[&str]) -> Result<Vec<String>, String> {
        let frame = Frame::Load {
            code: code.to_string(),
            bindings: bindings.iter().map(|b| b.to_string()).collect(),
        };
        match self.roundtrip(frame).await? {
            Frame::Loaded { hooks } => Ok(hooks),
            Frame::Failed { error } => Err(error),
            other => Err(format!("unexpected reply to load: {other:?}")),
        }
    }

    async fn exchange(&self, batch: Vec<Request>) -> Result<Vec<Response>, String> {
        match self.roundtrip(Frame::Batch { requests: batch }).await? {
            Frame::Results { responses } => Ok(responses),
            Frame::Failed { error } => Err(error),
            other => Err(format!("unexpected reply to batch: {other:?}")),
        }
    }
}

/// Runner subprocess speaking frames over stdio.
pub type ProcessIsolate = FramedIsolate<ChildStdout, ChildStdin>;

impl ProcessIsolate {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn {program}: {e}"))?;
        let stdin = child.stdin.take().ok_or("runner stdin unavailable")?;
        let stdout = child.stdout.take().ok_or("runner stdout unavailable")?;
        log::debug!("plugin: spawned runner `{program}`");
        Ok(Self {
            io: Mutex::new((stdout, stdin)),
            _child: Some(child),
        })
    }
}

/// Spawns one runner process per loaded plugin.
#[derive(Debug, Clone)]
pub struct ProcessIsolateFactory {
    pub program: String,
    pub args: Vec<String>,
}

impl IsolateFactory for ProcessIsolateFactory {
    fn spawn(&self) -> Result<Box<dyn Isolate>, String> {
        Ok(Box::new(ProcessIsolate::spawn(&self.program, &self.args)?))
    }
}
