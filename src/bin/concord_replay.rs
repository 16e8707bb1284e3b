//! Replay a scripted editing session against an in-memory coordinator
//!
//! Run with: cargo run --bin concord-replay -- script.json [--config sync.json]
//!
//! The script lists documents to create and then a sequence of actions:
//!
//! ```json
//! {
//!   "documents": ["notes"],
//!   "actions": [
//!     {"action": "join", "document_id": "notes", "author_id": "alice"},
//!     {"action": "join", "document_id": "notes", "author_id": "bob"},
//!     {"action": "submit", "document_id": "notes", "author_id": "alice",
//!      "base_version": 0, "kind": "insert", "position": 0, "payload": "X"},
//!     {"action": "submit", "document_id": "notes", "author_id": "bob",
//!      "base_version": 0, "kind": "insert", "position": 0, "payload": "Y"}
//!   ]
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, info};
use serde::Deserialize;

use concord::collab::{ChannelBroadcaster, MemoryStorage};
use concord::config::SyncConfig;
use concord::logging;
use concord::protocol::{JoinRequest, SubmitResponse};
use concord::session::SessionCoordinator;
use concord::{DocumentId, ParticipantId, RawOperation};

#[derive(Parser)]
#[command(name = "concord-replay", about = "Replay a scripted collaborative editing session")]
struct Args {
    /// JSON script to replay
    script: PathBuf,
    /// Optional JSON sync configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Deserialize)]
struct Script {
    #[serde(default)]
    documents: Vec<DocumentId>,
    actions: Vec<Action>,
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    Join(JoinRequest),
    Submit(RawOperation),
    Leave {
        document_id: DocumentId,
        author_id: ParticipantId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let raw = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script.display()))?;
    let script: Script = serde_json::from_str(&raw).context("parsing script")?;

    let broadcaster = Arc::new(ChannelBroadcaster::new(config.broadcast_capacity));
    let mut feed = broadcaster.subscribe();
    tokio::spawn(async move {
        while let Ok(published) = feed.recv().await {
            debug!(
                "published v{:?} of {}: {:?} at {}",
                published.op.version, published.document_id, published.op.kind, published.op.position
            );
        }
    });

    let coordinator = SessionCoordinator::new(config, Arc::new(MemoryStorage::new()), broadcaster);
    for document_id in &script.documents {
        coordinator.create_document(document_id.clone()).await?;
    }

    let mut touched: Vec<DocumentId> = Vec::new();
    for (index, action) in script.actions.into_iter().enumerate() {
        match action {
            Action::Join(request) => {
                let joined = coordinator
                    .join(&request.document_id, request.participant())
                    .await
                    .with_context(|| format!("action {}: join", index))?;
                info!(
                    "{} joined {} at v{}",
                    request.author_id, request.document_id, joined.current_version
                );
                if !touched.contains(&request.document_id) {
                    touched.push(request.document_id);
                }
            }
            Action::Submit(op) => {
                let session_id = coordinator
                    .session_for_document(&op.document_id)
                    .await
                    .ok_or_else(|| anyhow!("action {}: nobody has joined {}", index, op.document_id))?;
                let author_id = op.author_id.clone();
                let response =
                    SubmitResponse::from(coordinator.submit(session_id, author_id, op).await);
                println!("{}", serde_json::to_string(&response)?);
            }
            Action::Leave {
                document_id,
                author_id,
            } => {
                if let Some(session_id) = coordinator.session_for_document(&document_id).await {
                    coordinator
                        .leave(session_id, author_id)
                        .await
                        .with_context(|| format!("action {}: leave", index))?;
                }
            }
        }
    }

    for document_id in touched {
        match coordinator.session_for_document(&document_id).await {
            Some(session_id) => {
                let snapshot = coordinator.snapshot(session_id).await?;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            None => info!("{} has no open session", document_id),
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
