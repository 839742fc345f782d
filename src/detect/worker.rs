use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::result::RawDetection;
use crate::frame::Frame;

struct Request {
    seq: u64,
    frame: Frame,
}

struct Response {
    seq: u64,
    result: Result<Vec<RawDetection>>,
}

/// Runs a backend on a dedicated thread and bounds how long a caller waits.
///
/// A call that exceeds `timeout` returns an error for that frame; the backend keeps
/// running and its late result is discarded. While the backend is still busy, new
/// calls fail fast instead of queueing, so a hung model shows up as lag plus logged
/// errors and never blocks the frame loop.
pub struct InferenceWorker {
    name: &'static str,
    requests: Option<SyncSender<Request>>,
    responses: Receiver<Response>,
    timeout: Duration,
    next_seq: u64,
    join: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    pub fn spawn(mut backend: Box<dyn DetectorBackend>, timeout: Duration) -> Result<Self> {
        let name = backend.name();
        let (req_tx, req_rx) = mpsc::sync_channel::<Request>(1);
        let (resp_tx, resp_rx) = mpsc::channel::<Response>();
        let join = std::thread::Builder::new()
            .name(format!("inference-{}", name))
            .spawn(move || {
                while let Ok(request) = req_rx.recv() {
                    let result = backend.detect(&request.frame);
                    if resp_tx
                        .send(Response {
                            seq: request.seq,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn inference thread: {}", e))?;
        Ok(Self {
            name,
            requests: Some(req_tx),
            responses: resp_rx,
            timeout,
            next_seq: 0,
            join: Some(join),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl DetectorBackend for InferenceWorker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow!("inference worker stopped"))?;
        // Drain late results from frames that already timed out.
        while self.responses.try_recv().is_ok() {}

        self.next_seq += 1;
        let seq = self.next_seq;
        match requests.try_send(Request {
            seq,
            frame: frame.clone(),
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(anyhow!("detector '{}' still busy with an earlier frame", self.name))
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(anyhow!("detector '{}' thread exited", self.name))
            }
        }

        let deadline = std::time::Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(response) if response.seq == seq => return response.result,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(anyhow!(
                        "detector '{}' timed out after {:?}",
                        self.name,
                        self.timeout
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("detector '{}' thread exited", self.name))
                }
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the thread once any in-flight call returns.
        self.requests.take();
        if let Some(join) = self.join.take() {
            if join.is_finished() {
                let _ = join.join();
            }
        }
    }
}
