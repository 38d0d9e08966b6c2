//! One Unix-socket connection to the daemon with strict request/response
//! pairing.
//!
//! HTTP/1.1 carries no correlation id, so every request pushes a callback onto
//! a FIFO queue and every completed response pops the oldest one. The push and
//! the write happen under the same lock, which keeps queue order identical to
//! wire order when several tasks share a connection.

use daemon_wire::{RequestDescriptor, ResponseMessage, ResponseParser};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::ModemError;

const READ_BUFFER_BYTES: usize = 16 * 1024;

/// Invoked exactly once with the response matching the request it was queued
/// for, or with the error that killed the connection first.
pub type ResponseCallback = Box<dyn FnOnce(Result<ResponseMessage, ModemError>) + Send + 'static>;

#[derive(Default)]
struct Shared {
    pending: Mutex<VecDeque<ResponseCallback>>,
    alive: AtomicBool,
}

impl Shared {
    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<ResponseCallback>> {
        self.pending
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Hand `message` to the oldest waiter. Returns false when nobody waits.
    fn deliver(&self, message: ResponseMessage) -> bool {
        let callback = self.queue().pop_front();
        match callback {
            Some(callback) => {
                callback(Ok(message));
                true
            }
            None => false,
        }
    }

    /// Queue `callback` unless the connection already died. The liveness
    /// check and the push share the queue lock with `fail_all`.
    fn enqueue(&self, callback: ResponseCallback) -> Result<(), ModemError> {
        let mut queue = self.queue();
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ModemError::Closed);
        }
        queue.push_back(callback);
        Ok(())
    }

    /// Mark the connection dead and fail every waiter with `err`.
    fn fail_all(&self, err: ModemError) {
        let drained: Vec<ResponseCallback> = {
            let mut queue = self.queue();
            self.alive.store(false, Ordering::SeqCst);
            queue.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(pending = drained.len(), error = %err, "failing queued daemon requests");
        }
        for callback in drained {
            callback(Err(err.clone()));
        }
    }

    fn pending_len(&self) -> usize {
        self.queue().len()
    }
}

pub struct Modem {
    socket_path: PathBuf,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl Modem {
    /// A modem for `socket_path` that has not connected yet.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            writer: tokio::sync::Mutex::new(None),
            shared: Arc::new(Shared::default()),
            reader: None,
        }
    }

    /// Construct and connect in one step.
    pub async fn open(socket_path: impl AsRef<Path>) -> Result<Self, ModemError> {
        let mut modem = Self::new(socket_path);
        modem.connect().await?;
        Ok(modem)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_connected(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Number of requests written whose responses have not arrived yet.
    pub fn in_flight(&self) -> usize {
        self.shared.pending_len()
    }

    /// Open the socket. A connection that died on its own may be replaced; a
    /// live one may not.
    pub async fn connect(&mut self) -> Result<(), ModemError> {
        if self.is_connected() {
            return Err(ModemError::AlreadyConnected);
        }
        self.teardown();

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|err| ModemError::Connect {
                path: self.socket_path.clone(),
                source: Arc::new(err),
            })?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);
        self.shared = Arc::clone(&shared);
        *self.writer.get_mut() = Some(write_half);
        self.reader = Some(tokio::spawn(read_loop(read_half, shared)));

        debug!(socket = %self.socket_path.display(), "connected to daemon");
        Ok(())
    }

    /// Queue `callback` and write `request`.
    ///
    /// If the write itself fails the connection is declared dead: every
    /// queued callback, this one included, receives the error, and the same
    /// error is returned.
    pub async fn send(
        &self,
        request: &RequestDescriptor,
        callback: ResponseCallback,
    ) -> Result<(), ModemError> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(ModemError::NotConnected);
        };

        let bytes = request.to_bytes();
        trace!(method = %request.method(), path = request.path(), bytes = bytes.len(), "sending daemon request");
        self.shared.enqueue(callback)?;

        let written = match stream.write_all(&bytes).await {
            Ok(()) => stream.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            let err = ModemError::io(err);
            warn!(path = request.path(), error = %err, "daemon write failed");
            self.shared.fail_all(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Send `request` and wait for its response.
    pub async fn request(&self, request: &RequestDescriptor) -> Result<ResponseMessage, ModemError> {
        let (tx, rx) = oneshot::channel();
        self.send(
            request,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )
        .await?;
        rx.await.map_err(|_| ModemError::Closed)?
    }

    /// Flush and close the socket. Requests still waiting fail with
    /// [`ModemError::Closed`].
    pub async fn disconnect(&mut self) -> Result<(), ModemError> {
        let Some(mut stream) = self.writer.get_mut().take() else {
            return Err(ModemError::NotConnected);
        };
        let shutdown = stream.shutdown().await;
        self.teardown();
        debug!(socket = %self.socket_path.display(), "disconnected from daemon");
        shutdown.map_err(ModemError::io)
    }

    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer.get_mut().take();
        self.shared.fail_all(ModemError::Closed);
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for Modem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Modem")
            .field("socket_path", &self.socket_path)
            .field("connected", &self.is_connected())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
    let mut parser = ResponseParser::new();
    let mut buf = vec![0u8; READ_BUFFER_BYTES];

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => {
                shared.fail_all(ModemError::Closed);
                return;
            }
            Ok(read) => read,
            Err(err) => {
                shared.fail_all(ModemError::io(err));
                return;
            }
        };
        trace!(bytes = read, "daemon bytes received");

        let mut parsed = parser.feed(&buf[..read]);
        loop {
            match parsed {
                Ok(Some(message)) => {
                    trace!(status = message.status(), "daemon response complete");
                    if !shared.deliver(message) {
                        warn!("daemon response arrived with no request waiting");
                        shared.fail_all(ModemError::UnsolicitedResponse);
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "discarding daemon connection after parse failure");
                    shared.fail_all(ModemError::Protocol(err));
                    return;
                }
            }
            parsed = parser.poll();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daemon_wire::Method;

    #[tokio::test]
    async fn send_without_connection_is_a_usage_error() {
        let modem = Modem::new("/nonexistent/daemon.sock");
        let request = RequestDescriptor::new(Method::Get, "/_ping");

        let err = modem
            .send(&request, Box::new(|_| panic!("callback must not run")))
            .await
            .unwrap_err();
        assert!(matches!(err, ModemError::NotConnected));
        assert_eq!(modem.in_flight(), 0);
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_usage_error() {
        let mut modem = Modem::new("/nonexistent/daemon.sock");
        assert!(matches!(
            modem.disconnect().await,
            Err(ModemError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn unreachable_socket_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");

        let err = Modem::open(&path).await.unwrap_err();
        match err {
            ModemError::Connect { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[test]
    fn fail_all_drains_in_order() {
        let shared = Shared::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            shared.queue().push_back(Box::new(move |result| {
                assert!(matches!(result, Err(ModemError::Closed)));
                seen.lock().unwrap().push(i);
            }));
        }

        shared.fail_all(ModemError::Closed);

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(shared.pending_len(), 0);
    }

    #[test]
    fn enqueue_after_failure_is_refused() {
        let shared = Shared::default();
        shared.alive.store(true, Ordering::SeqCst);
        assert!(shared.enqueue(Box::new(|_| {})).is_ok());
        assert_eq!(shared.pending_len(), 1);

        shared.fail_all(ModemError::Closed);

        let err = shared
            .enqueue(Box::new(|_| panic!("callback must not be queued on a dead connection")))
            .unwrap_err();
        assert!(matches!(err, ModemError::Closed));
        assert_eq!(shared.pending_len(), 0);
    }

    #[test]
    fn enqueue_racing_fail_all_is_never_stranded() {
        for _ in 0..200 {
            let shared = Arc::new(Shared::default());
            shared.alive.store(true, Ordering::SeqCst);
            let answered = Arc::new(AtomicBool::new(false));

            let killer = {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || shared.fail_all(ModemError::Closed))
            };
            let flag = Arc::clone(&answered);
            let queued = shared.enqueue(Box::new(move |result| {
                assert!(matches!(result, Err(ModemError::Closed)));
                flag.store(true, Ordering::SeqCst);
            }));
            killer.join().unwrap();

            // Either refused up front or failed by the drain, never left queued.
            assert_eq!(shared.pending_len(), 0);
            assert_eq!(queued.is_ok(), answered.load(Ordering::SeqCst));
        }
    }
}
