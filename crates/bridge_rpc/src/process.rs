use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::jsonrpc::{Id, Message, Request, Response};
use crate::transport::{ChannelEndpoint, InboundHandler, Transport, TransportError};

type Inflight = Arc<DashMap<String, oneshot::Sender<Response>>>;

/// Launches one engine executable per channel and speaks newline-delimited
/// JSON-RPC with it over stdin/stdout.
///
/// The child is started as `<exe> [args..] --channel <name>`. Its stderr is
/// inherited so engine logs end up next to ours.
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    exe: PathBuf,
    args: Vec<String>,
}

impl ProcessTransport {
    pub fn new<P: AsRef<Path>>(exe: P) -> Self {
        Self {
            exe: exe.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before `--channel <name>`.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn open(
        &self,
        name: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Arc<dyn ChannelEndpoint>, TransportError> {
        // ── launch ───────────────────────────────────────────────────────
        let mut child = TokioCommand::new(&self.exe)
            .args(&self.args)
            .arg("--channel")
            .arg(name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                channel: name.to_string(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Disconnected(name.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Disconnected(name.to_string()))?;
        info!(channel = name, exe = %self.exe.display(), "engine process started");

        // ── writer: queued lines → child.stdin ───────────────────────────
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let channel_name = name.to_string();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    warn!(channel = %channel_name, "engine stdin closed");
                    break;
                }
            }
        });

        // ── reader: child.stdout → responses | inbound calls ─────────────
        let inflight: Inflight = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        {
            let inflight = Arc::clone(&inflight);
            let closed = Arc::clone(&closed);
            // weak so that dropping the channel still closes the engine's stdin
            let reply_tx = tx.downgrade();
            let channel_name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Message>(&line) {
                        Ok(Message::Response(rsp)) => {
                            let key = id_key(&rsp.id);
                            match inflight.remove(&key) {
                                Some((_, waiter)) => {
                                    let _ = waiter.send(rsp);
                                }
                                None => warn!(channel = %channel_name, id = %key, "response for unknown call"),
                            }
                        }
                        Ok(Message::Request(req)) => {
                            // awaited in line so calls reach the handler in delivery order
                            let outcome = handler.handle_call(&req.method, req.params).await;
                            if let Some(id) = req.id {
                                let rsp = Response::from_outcome(id, outcome);
                                match serde_json::to_string(&rsp) {
                                    Ok(line) => {
                                        if let Some(reply_tx) = reply_tx.upgrade() {
                                            let _ = reply_tx.send(line);
                                        }
                                    }
                                    Err(err) => warn!(channel = %channel_name, "could not encode reply: {err}"),
                                }
                            } else if let Err(err) = outcome {
                                debug!(channel = %channel_name, method = %req.method, "inbound notification failed: {}", err.message);
                            }
                        }
                        Err(err) => warn!(channel = %channel_name, "unparseable line from engine: {err}"),
                    }
                }
                info!(channel = %channel_name, "engine output closed");
                closed.store(true, Ordering::SeqCst);
                // dropping the waiters fails every pending call with Disconnected
                inflight.clear();
                let _ = child.kill().await;
            });
        }

        Ok(Arc::new(ProcessChannel {
            name: name.to_string(),
            tx,
            inflight,
            closed,
        }))
    }
}

fn id_key(id: &Id) -> String {
    match id {
        Id::Number(n) => n.to_string(),
        Id::String(s) => s.clone(),
        Id::Null => "null".to_string(),
    }
}

#[derive(Debug)]
struct ProcessChannel {
    name: String,
    tx: mpsc::UnboundedSender<String>,
    inflight: Inflight,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ChannelEndpoint for ProcessChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = Id::String(Uuid::new_v4().to_string());
        let key = id_key(&id);
        let line = serde_json::to_string(&Request::call(id, method, params))?;

        // register before writing so a fast reply cannot race us
        let (rsp_tx, rsp_rx) = oneshot::channel();
        self.inflight.insert(key.clone(), rsp_tx);
        if self.closed.load(Ordering::SeqCst) || self.tx.send(line).is_err() {
            self.inflight.remove(&key);
            return Err(TransportError::Disconnected(self.name.clone()));
        }

        let rsp = rsp_rx
            .await
            .map_err(|_| TransportError::Disconnected(self.name.clone()))?;
        if let Some(err) = rsp.error {
            return Err(err.into());
        }
        Ok(rsp.result.unwrap_or(Value::Null))
    }
}
