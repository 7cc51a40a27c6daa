//! Interactive PTY sessions: a reader thread and a writer thread per
//! session, bounded channels for input/output bytes, and a lazy,
//! non-restartable output stream - directly grounded in
//! `quixand/container/docker_runtime.py::_start_pty_stream`
//! (`threading.Thread` + `queue.Queue`, here `std::thread` +
//! `crossbeam_channel`). The original polls a raw socket with a 0.1s
//! timeout in both directions; we poll bollard's async exec stream from a
//! blocking thread via `Handle::block_on` so the rest of the crate never
//! has to special-case PTY as "the one non-async thing".

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bollard::exec::StartExecOptions;
use bollard::Docker;
use futures::StreamExt;

use crate::error::{QuixandError, Result};

const QUEUE_CAPACITY: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct PtyHandle {
    input_tx: crossbeam_channel::Sender<Vec<u8>>,
    output_rx: crossbeam_channel::Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
    writer: Option<std::thread::JoinHandle<()>>,
}

impl PtyHandle {
    /// Starts the reader/writer threads for an already-created exec
    /// session. `rt` is the Tokio runtime handle the blocking threads use
    /// to drive the async bollard calls.
    pub fn spawn(rt: tokio::runtime::Handle, client: Docker, exec_id: String) -> Result<Self> {
        let (input_tx, input_rx) = crossbeam_channel::bounded::<Vec<u8>>(QUEUE_CAPACITY);
        let (output_tx, output_rx) = crossbeam_channel::bounded::<Vec<u8>>(QUEUE_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let start_result = rt.block_on(client.start_exec(
            &exec_id,
            Some(StartExecOptions {
                detach: false,
                tty: true,
                output_capacity: None,
            }),
        ))?;

        let (mut output_stream, mut input_sink) = match start_result {
            bollard::exec::StartExecResults::Attached { output, input } => (output, input),
            bollard::exec::StartExecResults::Detached => {
                return Err(QuixandError::Unknown(
                    "exec started detached, expected an attached tty".to_string(),
                ))
            }
        };

        let reader_closed = closed.clone();
        let reader_rt = rt.clone();
        let writer_rt = rt;
        let reader = std::thread::spawn(move || {
            reader_rt.block_on(async {
                while let Some(chunk) = output_stream.next().await {
                    match chunk {
                        Ok(log) => {
                            if output_tx.send(log.into_bytes().to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
            reader_closed.store(true, Ordering::SeqCst);
        });

        let writer_closed = closed.clone();
        let rt_for_writer = writer_rt;
        let writer = std::thread::spawn(move || loop {
            if writer_closed.load(Ordering::SeqCst) {
                break;
            }
            match input_rx.recv_timeout(POLL_INTERVAL) {
                Ok(data) => {
                    let result = rt_for_writer.block_on(input_sink.write_all(&data));
                    if result.is_err() {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        });

        Ok(PtyHandle {
            input_tx,
            output_rx,
            closed,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Fire-and-forget: queues bytes for the writer thread. Returns an
    /// error only if the session is already closed.
    pub fn send(&self, data: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QuixandError::Unknown("pty session closed".to_string()));
        }
        self.input_tx
            .send(data)
            .map_err(|_| QuixandError::Unknown("pty writer thread gone".to_string()))
    }

    /// A lazy, finite iterator over output chunks. Non-restartable: once
    /// the underlying stream ends the iterator yields `None` forever, it
    /// does not reopen the exec session.
    pub fn stream(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        std::iter::from_fn(move || loop {
            if let Ok(chunk) = self.output_rx.try_recv() {
                return Some(chunk);
            }
            if self.closed.load(Ordering::SeqCst) {
                return match self.output_rx.try_recv() {
                    Ok(chunk) => Some(chunk),
                    Err(_) => None,
                };
            }
            std::thread::sleep(POLL_INTERVAL);
        })
    }

    /// Flips the liveness flag and joins both threads with a short
    /// timeout budget, matching `close_pty_session`'s best-effort join.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.close();
        }
    }
}
