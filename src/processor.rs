//! Datagram processor: one listener thread plus request/response correlation.
//!
//! A [`Processor`] owns a [`Transport`] and a background thread reading from
//! it. Each decoded message is routed:
//!
//! - `SEARCH_RESPONSE` to [`MessageHandler::on_search_response`]
//! - other responses into the single pending-exchange slot, waking the
//!   caller blocked in [`Processor::exchange`]. Only the response type that
//!   answers the outstanding request completes the wait; the first one wins.
//!   A response of another type is held back and handed out only if the
//!   right one never arrives.
//! - requests to [`MessageHandler::on_request`]
//!
//! The listener is fail-stop: any decode or receive error ends the thread,
//! wakes a waiting caller with `ListenerStopped` and reports the error
//! through [`MessageHandler::on_listener_stopped`]. Restarting is up to the
//! owner.
//!
//! Only one exchange is in flight at a time. [`Processor::lock`] hands out an
//! [`ExchangeGuard`] so a caller can keep other exchanges out across several
//! steps.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{KnxError, Result};
use crate::net::transport::Transport;
use crate::protocol::constants::{ServiceType, MAX_FRAME_SIZE};
use crate::protocol::message::{Message, MessageKind};
use crate::protocol::services::SearchResponse;

/// Receiver of messages the listener thread does not correlate.
///
/// Callbacks run on the listener thread.
pub trait MessageHandler: Send + Sync {
    /// Request-kind message from a peer (inbound tunneled frame, gateway
    /// disconnect, ...)
    fn on_request(&self, message: Message, source: SocketAddrV4);

    /// Gateway answer to a search request
    fn on_search_response(&self, _response: SearchResponse, _source: SocketAddrV4) {}

    /// The listener thread terminated because of `error`
    fn on_listener_stopped(&self, _error: &KnxError) {}
}

#[derive(Debug, Default)]
struct Slot {
    /// Response type of the outstanding exchange, `None` while idle
    expected: Option<ServiceType>,
    response: Option<Message>,
    /// First response of another type seen during the wait
    stray: Option<Message>,
    running: bool,
}

impl Slot {
    fn arm(&mut self, expected: ServiceType) {
        self.expected = Some(expected);
        self.response = None;
        self.stray = None;
    }

    fn disarm(&mut self) {
        self.expected = None;
        self.stray = None;
    }

    /// Offer a response to the outstanding exchange.
    ///
    /// Returns true if it completed the wait.
    fn offer(&mut self, message: Message) -> bool {
        let Some(expected) = self.expected else {
            log::debug!("dropping uncorrelated {:?}", message.service_type());
            return false;
        };
        if self.response.is_some() {
            log::debug!("dropping extra {:?}", message.service_type());
            return false;
        }
        if message.service_type() == expected {
            self.response = Some(message);
            return true;
        }
        log::debug!("holding {:?} while waiting for {expected:?}", message.service_type());
        if self.stray.is_none() {
            self.stray = Some(message);
        }
        false
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    slot: Mutex<Slot>,
    response_ready: Condvar,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_stopped(&self) {
        let mut slot = self.slot();
        slot.running = false;
        slot.disarm();
        drop(slot);
        self.response_ready.notify_all();
    }
}

struct Listener {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Listener thread plus exchange correlator over one transport.
pub struct Processor {
    shared: Arc<Shared>,
    exchange_lock: Mutex<()>,
    listener: Mutex<Option<Listener>>,
    local_addr: Mutex<Option<SocketAddrV4>>,
    skip_unknown_services: bool,
}

impl core::fmt::Debug for Processor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Processor")
            .field("transport", &self.shared.transport)
            .field("running", &self.is_running())
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl Processor {
    /// Create a stopped processor.
    pub fn new(transport: Arc<dyn Transport>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                handler,
                slot: Mutex::new(Slot::default()),
                response_ready: Condvar::new(),
            }),
            exchange_lock: Mutex::new(()),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            skip_unknown_services: false,
        }
    }

    /// Drop datagrams with unknown service types instead of stopping.
    ///
    /// Used on the multicast group, which also carries routing traffic.
    #[must_use]
    pub const fn skipping_unknown_services(mut self) -> Self {
        self.skip_unknown_services = true;
        self
    }

    /// Bind the transport on `source` and start the listener thread.
    ///
    /// Returns once the listener is receiving, with the bound local address.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the listener is already running; transport errors
    /// from binding.
    pub fn start(&self, source: SocketAddrV4) -> Result<SocketAddrV4> {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = listener.take() {
            if !previous.handle.is_finished() {
                *listener = Some(previous);
                return Err(KnxError::InvalidState);
            }
            if previous.handle.join().is_err() {
                log::error!("previous listener thread panicked");
            }
        }

        let local = self.shared.transport.bind(source)?;
        *self.shared.slot() = Slot {
            running: true,
            ..Slot::default()
        };

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);
        let skip_unknown = self.skip_unknown_services;
        let spawned = thread::Builder::new()
            .name(String::from("knx-listener"))
            .spawn(move || {
                // Receiver outlives this send: start() blocks on it
                let _ = ready_tx.send(());
                listen(&shared, &thread_stop, skip_unknown);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.mark_stopped();
                self.shared.transport.close();
                return Err(e.into());
            }
        };
        if ready_rx.recv().is_err() {
            stop.store(true, Ordering::SeqCst);
            self.shared.mark_stopped();
            self.shared.transport.close();
            if handle.join().is_err() {
                log::error!("listener thread panicked");
            }
            return Err(KnxError::listener_stopped());
        }

        *listener = Some(Listener { handle, stop });
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local);
        log::debug!("processor listening on {local}");
        Ok(local)
    }

    /// Stop the listener thread and close the transport.
    ///
    /// Idempotent. Called from the listener thread itself (from a handler
    /// callback), the thread is left to finish on its own.
    pub fn stop(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listener) = listener else {
            return;
        };

        listener.stop.store(true, Ordering::SeqCst);
        self.shared.transport.close();
        self.shared.mark_stopped();
        self.local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if listener.handle.thread().id() == thread::current().id() {
            return;
        }
        if listener.handle.join().is_err() {
            log::error!("listener thread panicked");
        }
        log::debug!("processor stopped");
    }

    /// True while the listener thread is receiving
    pub fn is_running(&self) -> bool {
        self.shared.slot().running
    }

    /// Local address of the bound transport while running
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the exchange lock.
    ///
    /// Other exchanges block until the guard is dropped.
    pub fn lock(&self) -> ExchangeGuard<'_> {
        ExchangeGuard {
            processor: self,
            _guard: self
                .exchange_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Encode and send `message` without waiting for an answer.
    pub fn send(&self, message: &Message, dest: SocketAddrV4) -> Result<()> {
        let bytes = message.to_bytes()?;
        log::debug!("-> {:?} to {dest}", message.service_type());
        self.shared.transport.send_to(&bytes, dest)
    }

    /// Send `message` and wait up to `message.timeout()` for the response.
    ///
    /// The wait ends early only on the response type that answers
    /// `message`. If none arrives in time, the first response of another
    /// type seen meanwhile is returned instead, so the caller can report it.
    ///
    /// # Errors
    ///
    /// `ListenerStopped` if the listener is not running or terminates while
    /// waiting. `Ok(None)` means the timeout elapsed.
    pub fn exchange(&self, message: &Message, dest: SocketAddrV4) -> Result<Option<Message>> {
        self.lock().exchange(message, dest)
    }

    /// [`exchange`](Self::exchange) with an explicit timeout.
    pub fn exchange_timeout(
        &self,
        message: &Message,
        dest: SocketAddrV4,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        self.lock().exchange_timeout(message, dest, timeout)
    }

    fn exchange_locked(
        &self,
        message: &Message,
        dest: SocketAddrV4,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        let Some(expected) = message.expected_response() else {
            self.send(message, dest)?;
            return Ok(None);
        };
        {
            let mut slot = self.shared.slot();
            if !slot.running {
                return Err(KnxError::listener_stopped());
            }
            slot.arm(expected);
        }

        if let Err(e) = self.send(message, dest) {
            self.shared.slot().disarm();
            return Err(e);
        }

        let slot = self.shared.slot();
        let (mut slot, _) = self
            .shared
            .response_ready
            .wait_timeout_while(slot, timeout, |s| s.running && s.response.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        let stray = slot.stray.take();
        slot.disarm();

        if let Some(response) = slot.response.take() {
            return Ok(Some(response));
        }
        if !slot.running {
            return Err(KnxError::listener_stopped());
        }
        if stray.is_some() {
            return Ok(stray);
        }
        log::debug!("no response to {:?} within {timeout:?}", message.service_type());
        Ok(None)
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Exclusive right to run exchanges on a [`Processor`].
#[derive(Debug)]
#[must_use = "the exchange lock is released when the guard is dropped"]
pub struct ExchangeGuard<'a> {
    processor: &'a Processor,
    _guard: MutexGuard<'a, ()>,
}

impl ExchangeGuard<'_> {
    /// See [`Processor::exchange`].
    pub fn exchange(&self, message: &Message, dest: SocketAddrV4) -> Result<Option<Message>> {
        self.processor
            .exchange_locked(message, dest, message.timeout())
    }

    /// See [`Processor::exchange_timeout`].
    pub fn exchange_timeout(
        &self,
        message: &Message,
        dest: SocketAddrV4,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        self.processor.exchange_locked(message, dest, timeout)
    }

    /// See [`Processor::send`].
    pub fn send(&self, message: &Message, dest: SocketAddrV4) -> Result<()> {
        self.processor.send(message, dest)
    }
}

fn listen(shared: &Shared, stop: &AtomicBool, skip_unknown: bool) {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    while !stop.load(Ordering::SeqCst) {
        let result = shared
            .transport
            .recv_from(&mut buf)
            .and_then(|received| match received {
                Some((len, source)) => route(shared, &buf[..len], source, skip_unknown),
                None => Ok(()),
            });

        if let Err(e) = result {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            log::error!("listener stopped: {e}");
            shared.mark_stopped();
            shared.handler.on_listener_stopped(&e);
            return;
        }
    }
}

fn route(shared: &Shared, data: &[u8], source: SocketAddrV4, skip_unknown: bool) -> Result<()> {
    let message = match Message::decode(data) {
        Ok(message) => message,
        Err(e) if skip_unknown && e.is_unexpected_service_type() => {
            log::trace!("skipping unknown service from {source}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    log::debug!("<- {:?} from {source}", message.service_type());

    match (message, source) {
        (Message::SearchResponse(response), source) => {
            shared.handler.on_search_response(response, source);
        }
        (message, source) if message.kind() == MessageKind::Request => {
            shared.handler.on_request(message, source);
        }
        (message, _) => {
            let completed = shared.slot().offer(message);
            if completed {
                shared.response_ready.notify_all();
            }
        }
    }
    Ok(())
}
