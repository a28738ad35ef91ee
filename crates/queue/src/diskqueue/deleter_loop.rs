//! Deleter loop - unlinks fully-acked segment files
//!
//! Deletions retry with exponential backoff on transient errors; a
//! missing file counts as success (the segment is gone either way).

use std::fs;
use std::io;

use tokio::sync::{mpsc, watch};

use super::backoff::Backoff;
use super::internal::{DeleteRequest, DeleteResponse};
use super::settings::DiskSettings;

pub(super) struct DeleterLoop {
    settings: DiskSettings,
    req_rx: mpsc::UnboundedReceiver<DeleteRequest>,
    resp_tx: mpsc::Sender<DeleteResponse>,
    close_rx: watch::Receiver<bool>,
}

impl DeleterLoop {
    pub fn new(
        settings: DiskSettings,
        req_rx: mpsc::UnboundedReceiver<DeleteRequest>,
        resp_tx: mpsc::Sender<DeleteResponse>,
        close_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            settings,
            req_rx,
            resp_tx,
            close_rx,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("disk queue deleter loop starting");
        let mut backoff = Backoff::new(
            self.settings.retry_interval,
            self.settings.max_retry_interval,
        );

        while let Some(req) = self.req_rx.recv().await {
            loop {
                match fs::remove_file(&req.path) {
                    Ok(()) => break,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                    Err(e) => {
                        tracing::warn!(
                            segment = req.segment,
                            error = %e,
                            "segment deletion failed, retrying"
                        );
                        if !backoff.wait(&mut self.close_rx).await {
                            tracing::debug!("disk queue deleter loop stopped");
                            return;
                        }
                    }
                }
            }
            backoff.reset();
            tracing::debug!(segment = req.segment, "deleted fully-acked segment");

            let resp = DeleteResponse {
                segment: req.segment,
            };
            tokio::select! {
                sent = self.resp_tx.send(resp) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = self.close_rx.wait_for(|closed| *closed) => break,
            }
        }

        tracing::debug!("disk queue deleter loop stopped");
    }
}
