// Command dispatcher
//
// All traffic goes through one exclusive session on the link, so exactly one
// frame is ever in flight no matter how many threads share the driver. The
// cancellation flag lives outside the lock: `request_stop` can raise it while
// a move holds the session, and the move's wait loop sees it on its next poll.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::codec::{self, Opcode, ResponseLayout};
use super::error::{Mpc325Error, Result};
use super::link::{Link, LinkSettings, Transport};

/// How often a waiting move checks for its acknowledgment and for cancellation
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a wait for a move acknowledgment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Acknowledged,
    Cancelled,
}

pub struct Dispatcher {
    link: Mutex<Link>,
    connected: AtomicBool,
    cancel: AtomicBool,
}

impl Dispatcher {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            link: Mutex::new(Link::new(settings)),
            connected: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    /// Run `op` with exclusive ownership of the link.
    ///
    /// Other callers block until `op` returns; the lock is released on every
    /// exit path, errors included.
    pub fn exclusive<T>(&self, op: impl FnOnce(&mut Session<'_>) -> Result<T>) -> Result<T> {
        let mut session = Session {
            link: self.link.lock(),
            cancel: &self.cancel,
        };
        op(&mut session)
    }

    pub fn open(&self, port_name: &str) -> Result<()> {
        let mut link = self.link.lock();
        link.open(port_name)?;
        self.connected.store(link.is_connected(), Ordering::SeqCst);
        Ok(())
    }

    pub fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        let mut link = self.link.lock();
        link.attach(transport)?;
        self.connected.store(link.is_connected(), Ordering::SeqCst);
        Ok(())
    }

    /// Close the link once any in-flight command has finished
    pub fn close(&self) {
        let mut link = self.link.lock();
        link.close();
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Connection state, readable without waiting for the session
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True while some caller holds the session
    pub fn is_busy(&self) -> bool {
        self.link.is_locked()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn set_cancelled(&self, cancelled: bool) {
        self.cancel.store(cancelled, Ordering::SeqCst);
    }

    pub fn recovery_flushes(&self) -> u64 {
        self.link.lock().recovery_flushes()
    }

    /// Abort the current motion.
    ///
    /// Raises the cancellation flag without taking the lock, so a move that is
    /// waiting for its acknowledgment gives up the session within one poll
    /// interval. Then sends the stop command itself and lowers the flag while
    /// still holding the session, so no queued command sees a stale stop.
    pub fn request_stop(&self) -> Result<()> {
        info!("Stop requested");
        self.cancel.store(true, Ordering::SeqCst);

        self.exclusive(|session| {
            let acked = session
                .transact(&codec::encode(Opcode::Stop, &[]), ResponseLayout::ACK)
                .map(|_| ());
            session.clear_cancel();
            acked
        })
    }
}

/// Exclusive access to the link for the duration of one driver operation
pub struct Session<'a> {
    link: MutexGuard<'a, Link>,
    cancel: &'a AtomicBool,
}

impl Session<'_> {
    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Hard per-read timeout of the link
    pub fn read_timeout(&self) -> Duration {
        self.link.settings().timeout
    }

    /// Flush, then write a new command frame
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.link.flush()?;
        self.link.write(frame)
    }

    /// Write a continuation of the current command without flushing
    pub fn send_continuation(&mut self, bytes: &[u8]) -> Result<()> {
        self.link.write(bytes)
    }

    /// One full round trip for a short query: send, blocking read, validate
    pub fn transact(&mut self, frame: &[u8], layout: ResponseLayout) -> Result<Vec<u32>> {
        self.send(frame)?;
        let bytes = self.link.read_exact(layout.byte_len())?;
        self.validate(layout, &bytes)
    }

    /// Decode a response; a protocol fault flushes the link before returning
    pub fn validate(&mut self, layout: ResponseLayout, bytes: &[u8]) -> Result<Vec<u32>> {
        match codec::decode_and_validate(layout, bytes) {
            Ok(fields) => Ok(fields),
            Err(e) if e.is_protocol_fault() => {
                warn!("{}", e);
                if let Err(flush_err) = self.link.recover() {
                    warn!("Recovery flush failed: {}", flush_err);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for a move's one-byte acknowledgment.
    ///
    /// Polls every `POLL_INTERVAL` for either an incoming byte or a stop
    /// request. A stop ends the wait without reading; the ack, if it ever
    /// comes, is dropped by the next flush.
    pub fn wait_for_ack(&mut self, deadline: Duration) -> Result<Completion> {
        let started = Instant::now();
        loop {
            if self.link.bytes_available()? > 0 {
                let bytes = self.link.read_exact(ResponseLayout::ACK.byte_len())?;
                self.validate(ResponseLayout::ACK, &bytes)?;
                debug!("Move acknowledged after {:?}", started.elapsed());
                return Ok(Completion::Acknowledged);
            }

            if self.cancel_requested() {
                info!("Move wait cancelled after {:?}", started.elapsed());
                return Ok(Completion::Cancelled);
            }

            if started.elapsed() > deadline {
                return Err(Mpc325Error::Timeout {
                    expected: ResponseLayout::ACK.byte_len(),
                    received: 0,
                });
            }

            sleep(POLL_INTERVAL);
        }
    }
}
