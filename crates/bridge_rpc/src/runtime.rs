//! Engine-side runtime: wires **stdin / stdout** JSON‑RPC traffic to a
//! user‑supplied [`EngineHandler`].
//!
//! * Requests → [`EngineHandler::handle`] → JSON‑RPC response
//! * Notifications (no `id`) → handled, nothing written back
//! * Unparseable lines → `-32700 Parse error`
//!
//! Pushes toward the host (`onMessage`, `onCreated`, ...) go through the
//! [`Notifier`] handed to every call, on the same ordered output queue as the
//! responses.
//!
//! Usage:
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     bridge_rpc::runtime::serve_stdio(MyEngine::default()).await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::warn;

use crate::jsonrpc::{self, Id, InboundMethod, Message, PARSE_ERROR, Request, Response};

/// Implement this in an engine binary.
#[async_trait]
pub trait EngineHandler: Send + 'static {
    async fn handle(
        &mut self,
        method: &str,
        params: Option<Value>,
        notifier: &Notifier,
    ) -> Result<Value, jsonrpc::Error>;
}

/// Pushes inbound calls to the host.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: UnboundedSender<String>,
}

impl Notifier {
    pub fn notify(&self, method: InboundMethod, params: Option<Value>) {
        let notif = Request::notification(method, params);
        enqueue(&self.tx, &notif);
    }
}

fn enqueue<T: serde::Serialize>(tx: &UnboundedSender<String>, msg: &T) {
    match serde_json::to_string(msg) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => warn!("could not encode outgoing message: {e}"),
    }
}

/// Runs the JSON‑RPC stdin/stdout loop until EOF or fatal error.
pub async fn serve_stdio<H: EngineHandler>(handler: H) -> Result<()> {
    serve(handler, io::stdin(), io::stdout()).await
}

/// Same loop over arbitrary byte streams.
pub async fn serve<H, R, W>(mut handler: H, reader: R, writer: W) -> Result<()>
where
    H: EngineHandler,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        let mut w = BufWriter::new(writer);
        while let Some(line) = rx.recv().await {
            if w.write_all(line.as_bytes()).await.is_err()
                || w.write_all(b"\n").await.is_err()
                || w.flush().await.is_err()
            {
                eprintln!("engine output closed");
                break;
            }
        }
    });

    let notifier = Notifier { tx: tx.clone() };
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(Message::Request(req)) => {
                let outcome = handler.handle(&req.method, req.params, &notifier).await;
                if let Some(id) = req.id {
                    enqueue(&tx, &Response::from_outcome(id, outcome));
                }
            }
            Ok(Message::Response(_)) => { /* the host never expects answers from us */ }
            Err(e) => {
                let err = jsonrpc::Error::new(PARSE_ERROR, "Parse error", Some(json!(e.to_string())));
                enqueue(&tx, &Response::fail(Id::Null, err));
            }
        }
    }

    drop(notifier);
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}
