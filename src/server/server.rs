use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::core::error::Result;
use crate::server::dispatcher;
use crate::server::worker_pool::WorkerPool;
use crate::store::controller::Store;

/// One request per recv, up to 8 KiB per read.
const READ_BUFFER_SIZE: usize = 8192;

/// Multi-threaded TCP front end.
///
/// The accept loop is single-threaded and blocking; each accepted session is
/// handed to the worker pool and runs on one worker for its lifetime. Client
/// sockets are tracked in a registry so shutdown can force workers out of
/// recv; removal happens under the lock before shutdown, so a socket is
/// closed exactly once.
pub struct Server {
    store: Arc<Store>,
    listener: TcpListener,
    worker_threads: usize,
    running: AtomicBool,
    next_session: AtomicU64,
    sessions: Mutex<HashMap<u64, TcpStream>>,
}

impl Server {
    pub fn bind(store: Arc<Store>, port: u16, worker_threads: usize) -> Result<Server> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(Server {
            store,
            listener,
            worker_threads,
            running: AtomicBool::new(false),
            next_session: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Blocks the calling thread until `stop` is invoked.
    pub fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let pool = WorkerPool::new(self.worker_threads);

        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "Network: AevumDB listening"),
            Err(_) => info!("Network: AevumDB listening"),
        }

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        // Shutdown raced the accept.
                        let _ = stream.shutdown(Shutdown::Both);
                        break;
                    }
                    info!(%peer, "Network: new connection");
                    let session = self.register(&stream);
                    let server = Arc::clone(&self);
                    pool.execute(move || server.handle_client(session, stream));
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!(error = %e, "Network: accept failed");
                    } else {
                        break;
                    }
                }
            }
        }

        info!("Network: server event loop terminated");
        // Dropping the pool drains in-flight sessions and joins the workers.
    }

    /// Session loop: read one request, dispatch, write one response.
    fn handle_client(&self, session: u64, mut stream: TcpStream) {
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        while self.running.load(Ordering::SeqCst) {
            let read = match stream.read(&mut buffer) {
                Ok(0) => {
                    info!("Network: client disconnected cleanly");
                    break;
                }
                Ok(n) => n,
                Err(_) => {
                    debug!("Network: socket read error");
                    break;
                }
            };

            let request = String::from_utf8_lossy(&buffer[..read]);
            let response = dispatcher::process(&self.store, request.trim());

            if stream.write_all(response.as_bytes()).is_err() {
                break;
            }
            if response.contains("\"status\":\"goodbye\"") {
                info!("Network: client requested disconnect via protocol");
                break;
            }
        }

        self.deregister(session);
    }

    fn register(&self, stream: &TcpStream) -> u64 {
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        if let Ok(tracked) = stream.try_clone() {
            self.sessions.lock().insert(session, tracked);
        }
        session
    }

    fn deregister(&self, session: u64) {
        if let Some(stream) = self.sessions.lock().remove(&session) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Graceful shutdown: stop accepting, unblock the blocked accept call,
    /// and force every tracked session out of recv. Workers drain after
    /// their current operation.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Network: shutdown signal received, stopping server");

        // std exposes no way to unblock a blocking accept; shutdown(2) on the
        // listening socket does.
        unsafe {
            libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR);
        }

        let tracked: Vec<TcpStream> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, stream)| stream).collect()
        };
        for stream in tracked {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
