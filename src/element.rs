use crate::dialog::{Dialog, DialogId, DialogState};
use crate::header::{SipHeader, SipMessageType, SipMethod};
use crate::timer::TimerQueue;
use crate::transaction::{
    CachedPacket, SipTimer, TimerLetter, Transaction, TransactionId, TransactionState, T1, T2, T4,
};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Transport path: (serialized packet, destination, header just sent).
pub type SendCallback = Arc<dyn Fn(&[u8], SocketAddr, &SipHeader) + Send + Sync>;
/// Per-call delivery: (payload after the header, header, transaction state).
pub type ReceiveCallback = Arc<dyn Fn(&[u8], &SipHeader, TransactionState) + Send + Sync>;
/// Per-call diagnostics and terminal failures.
pub type EventCallback = Arc<dyn Fn(&'static str, TransactionState) + Send + Sync>;

/// Reason markers passed to the event callback.
pub mod events {
    pub const ACK_RECEIVED: &str = "ACK received";
    pub const TRYING_RECEIVED: &str = "Trying received";
    pub const REQUEST_TIMEOUT: &str = "Request timeout";
    pub const TIMER_A_EXPIRED: &str = "Timer A expired";
    pub const TIMER_B_EXPIRED: &str = "Timer B expired";
    pub const TIMER_C_EXPIRED: &str = "Timer C expired";
    pub const TIMER_E_EXPIRED: &str = "Timer E expired";
    pub const TIMER_F_EXPIRED: &str = "Timer F expired";
    pub const TIMER_I_EXPIRED: &str = "Timer I expired";
    pub const TIMER_J_EXPIRED: &str = "Timer J expired";
    pub const TIMER_K_EXPIRED: &str = "Timer K expired";
}

/// Engine tuning knobs.  Defaults follow RFC 3261.
#[derive(Debug, Clone)]
pub struct SipConfig {
    /// With a reliable transport the quiesce timers (I/J/K) fire
    /// immediately; there are no retransmissions to absorb.
    pub reliable_transport: bool,
    /// RTT estimate; base interval for retransmit timers.
    pub t1: Duration,
    /// Cap on the non-INVITE retransmit interval.
    pub t2: Duration,
    /// Maximum time a message remains in the network.
    pub t4: Duration,
    /// Relay-only wait for a final response to forward.
    pub timer_c: Duration,
}

impl Default for SipConfig {
    fn default() -> Self {
        SipConfig {
            reliable_transport: false,
            t1: T1,
            t2: T2,
            t4: T4,
            timer_c: Duration::from_secs(180),
        }
    }
}

/// The base signaling element.
///
/// Owns the transaction and dialog tables and the timer queue; all
/// state transitions are driven by `send_*` calls, `receive`, and
/// `process_timers`.  The element is single-threaded: every mutation
/// happens synchronously inside whichever of those entry points is
/// running.
///
/// Time is virtual.  The element keeps its own clock, advanced only by
/// `process_timers`: first to each fired deadline, then to the polled
/// instant.  New timers are anchored to that clock, so a retransmit
/// rescheduled from an expiry handler counts its interval from the
/// firing instant no matter how fast the owner drives the clock.
pub struct SipElement {
    config: SipConfig,
    dialogs: HashMap<DialogId, Dialog>,
    transactions: HashMap<TransactionId, Transaction>,
    receive_callbacks: HashMap<u16, ReceiveCallback>,
    event_callbacks: HashMap<u16, EventCallback>,
    default_send_callback: Option<SendCallback>,
    timers: TimerQueue<SipTimer>,
    now: Instant,
}

fn build_packet(header: &SipHeader, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SipHeader::SERIALIZED_SIZE + body.len());
    header.serialize(&mut buf);
    buf.extend_from_slice(body);
    buf.freeze()
}

impl SipElement {
    pub fn new(config: SipConfig) -> Self {
        SipElement {
            config,
            dialogs: HashMap::new(),
            transactions: HashMap::new(),
            receive_callbacks: HashMap::new(),
            event_callbacks: HashMap::new(),
            default_send_callback: None,
            timers: TimerQueue::new(),
            now: Instant::now(),
        }
    }

    /// Start an INVITE transaction and its dialog, send the request and
    /// arm timers A and B.
    #[allow(clippy::too_many_arguments)]
    pub fn send_invite(
        &mut self,
        body: &[u8],
        destination: SocketAddr,
        request_uri: u32,
        from: u32,
        to: u32,
        call_id: u16,
        send_callback: SendCallback,
    ) -> Result<()> {
        let did = DialogId::new(call_id, from, to);
        let tid = TransactionId::new(call_id, from, to);
        self.create_dialog(did, send_callback.clone())?;
        self.set_dialog_state(did, DialogState::Trying)?;
        self.create_transaction(tid, send_callback.clone());
        self.set_transaction_state(tid, TransactionState::Calling)?;

        let header = SipHeader::request(SipMethod::Invite, request_uri, from, to, call_id);
        let packet = build_packet(&header, body);
        self.cache_transaction_packet(tid, packet.clone(), destination, header)?;
        send_callback(&packet, destination, &header);
        debug!(%tid, "sent INVITE");
        self.schedule_timer_a(tid, 1);
        self.schedule_timer_b(tid);
        Ok(())
    }

    /// Tear down an established dialog with a BYE, arming timers E and F.
    #[allow(clippy::too_many_arguments)]
    pub fn send_bye(
        &mut self,
        body: &[u8],
        destination: SocketAddr,
        request_uri: u32,
        from: u32,
        to: u32,
        call_id: u16,
        send_callback: SendCallback,
    ) -> Result<()> {
        let did = DialogId::new(call_id, from, to);
        let tid = TransactionId::new(call_id, from, to);
        match self.dialogs.get_mut(&did) {
            Some(dialog) => dialog.send_callback = send_callback.clone(),
            None => return Err(Error::Dialog(format!("dialog {} not found", did))),
        }
        self.set_dialog_state(did, DialogState::Terminated)?;
        if let Some(tx) = self.transactions.get_mut(&tid) {
            // The BYE reuses the key of the earlier INVITE transaction.
            tx.send_callback = send_callback.clone();
        } else {
            self.create_transaction(tid, send_callback.clone());
        }
        self.set_transaction_state(tid, TransactionState::Trying)?;

        let header = SipHeader::request(SipMethod::Bye, request_uri, from, to, call_id);
        let packet = build_packet(&header, body);
        self.cache_transaction_packet(tid, packet.clone(), destination, header)?;
        send_callback(&packet, destination, &header);
        debug!(%tid, "sent BYE");
        self.schedule_timer_e(tid, 1);
        self.schedule_timer_f(tid);
        Ok(())
    }

    /// Send a response on an existing dialog.  A 100 moves both state
    /// machines to PROCEEDING; a 200 confirms the dialog (INVITE side)
    /// or completes the BYE server transaction and arms timer J.
    #[allow(clippy::too_many_arguments)]
    pub fn send_response(
        &mut self,
        body: &[u8],
        destination: SocketAddr,
        status_code: u16,
        from: u32,
        to: u32,
        call_id: u16,
        send_callback: SendCallback,
    ) -> Result<()> {
        let did = DialogId::new(call_id, from, to);
        let tid = TransactionId::new(call_id, from, to);
        let dialog_state = match self.dialogs.get_mut(&did) {
            Some(dialog) => {
                dialog.send_callback = send_callback.clone();
                dialog.state
            }
            None => return Err(Error::Dialog(format!("dialog {} not found", did))),
        };
        match status_code {
            100 => {
                self.set_dialog_state(did, DialogState::Proceeding)?;
                self.set_transaction_state(tid, TransactionState::Proceeding)?;
            }
            200 => match dialog_state {
                DialogState::Trying | DialogState::Proceeding => {
                    self.set_dialog_state(did, DialogState::Confirmed)?;
                    self.set_transaction_state(tid, TransactionState::Completed)?;
                }
                DialogState::Terminated => {
                    self.set_transaction_state(tid, TransactionState::Completed)?;
                    self.schedule_timer_j(tid);
                }
                other => {
                    return Err(Error::Dialog(format!(
                        "cannot send 200 from dialog state {}",
                        other
                    )));
                }
            },
            _ => {}
        }
        let header = SipHeader::response(status_code, from, to, call_id);
        let packet = build_packet(&header, body);
        send_callback(&packet, destination, &header);
        debug!(%tid, status_code, "sent response");
        Ok(())
    }

    /// Single ingress point for packets from the transport.
    pub fn receive(&mut self, packet: &[u8], source: SocketAddr) -> Result<()> {
        let mut cursor = packet;
        let header = SipHeader::deserialize(&mut cursor)?;
        let payload = &packet[SipHeader::SERIALIZED_SIZE..];
        debug!(%header, %source, "received packet");

        let receive_cb = self
            .receive_callbacks
            .get(&header.call_id)
            .cloned()
            .ok_or_else(|| {
                Error::Endpoint(format!("call id {} has no receive callback", header.call_id))
            })?;
        let event_cb = self
            .event_callbacks
            .get(&header.call_id)
            .cloned()
            .ok_or_else(|| {
                Error::Endpoint(format!("call id {} has no event callback", header.call_id))
            })?;

        let tid = TransactionId::new(header.call_id, header.from, header.to);
        let did = DialogId::new(header.call_id, header.from, header.to);
        match header.message_type {
            SipMessageType::Response => {
                self.receive_response(&header, payload, source, tid, did, receive_cb, event_cb)
            }
            SipMessageType::Request => {
                self.receive_request(&header, payload, tid, did, receive_cb, event_cb)
            }
            SipMessageType::Invalid => Err(Error::Codec(
                "received message with invalid type".to_string(),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn receive_response(
        &mut self,
        header: &SipHeader,
        payload: &[u8],
        source: SocketAddr,
        tid: TransactionId,
        did: DialogId,
        receive_cb: ReceiveCallback,
        event_cb: EventCallback,
    ) -> Result<()> {
        let dialog_state = self.dialogs.get(&did).map(|d| d.state);
        match header.status_code {
            100 => match dialog_state {
                Some(DialogState::Trying) | Some(DialogState::Proceeding) => {
                    event_cb(events::TRYING_RECEIVED, TransactionState::Proceeding);
                    self.set_dialog_state(did, DialogState::Proceeding)?;
                    self.set_transaction_state(tid, TransactionState::Proceeding)?;
                    self.cancel_timer_a(tid);
                    self.cancel_timer_b(tid);
                    self.free_transaction_packet(tid);
                    Ok(())
                }
                _ => {
                    debug!(%tid, "provisional response ignored in dialog state {:?}", dialog_state);
                    Ok(())
                }
            },
            200 => match dialog_state {
                Some(DialogState::Trying) | Some(DialogState::Proceeding) => {
                    // Final answer to our INVITE.
                    self.cancel_timer_a(tid);
                    self.cancel_timer_b(tid);
                    self.set_transaction_state(tid, TransactionState::Completed)?;
                    self.free_transaction_packet(tid);
                    self.set_dialog_state(did, DialogState::Confirmed)?;
                    // Deliver before the ACK: the OK may carry session data.
                    receive_cb(payload, header, TransactionState::Completed);
                    self.send_ack(header, source, did)?;
                    self.set_transaction_state(tid, TransactionState::Terminated)?;
                    Ok(())
                }
                Some(DialogState::Confirmed) => {
                    // Duplicate 200; our ACK was probably lost.
                    debug!(%tid, "resending ACK");
                    self.send_ack(header, source, did)
                }
                Some(DialogState::Terminated) => {
                    // Answer to our BYE; no ACK for a non-INVITE final.
                    self.set_transaction_state(tid, TransactionState::Completed)?;
                    receive_cb(payload, header, TransactionState::Completed);
                    self.cancel_timer_e(tid);
                    self.cancel_timer_f(tid);
                    self.schedule_timer_k(tid);
                    Ok(())
                }
                _ => Err(Error::Transaction(format!(
                    "200 OK for {} in unexpected dialog state {:?}",
                    tid, dialog_state
                ))),
            },
            408 => {
                self.cancel_timer_a(tid);
                self.cancel_timer_b(tid);
                self.free_transaction_packet(tid);
                self.set_dialog_state(did, DialogState::Terminated)?;
                self.set_transaction_state(tid, TransactionState::Failed)?;
                receive_cb(payload, header, TransactionState::Failed);
                Ok(())
            }
            other => {
                debug!(%tid, status_code = other, "unknown response ignored");
                Ok(())
            }
        }
    }

    fn receive_request(
        &mut self,
        header: &SipHeader,
        payload: &[u8],
        tid: TransactionId,
        did: DialogId,
        receive_cb: ReceiveCallback,
        event_cb: EventCallback,
    ) -> Result<()> {
        match header.method {
            SipMethod::Invite => {
                if self.dialogs.contains_key(&did) {
                    debug!(%did, "dialog exists; ignoring INVITE retransmission");
                    return Ok(());
                }
                let default_cb = self.default_send_callback()?;
                self.create_dialog(did, default_cb.clone())?;
                self.set_dialog_state(did, DialogState::Trying)?;
                self.create_transaction(tid, default_cb);
                self.set_transaction_state(tid, TransactionState::Trying)?;
                receive_cb(payload, header, TransactionState::Trying);
                Ok(())
            }
            SipMethod::Bye => {
                self.set_dialog_state(did, DialogState::Terminated)?;
                if self.transaction_exists(tid) {
                    // A BYE may reach a server still in CONFIRMED,
                    // waiting out timer I.
                    self.disarm(tid, TimerLetter::I);
                } else {
                    let default_cb = self.default_send_callback()?;
                    self.create_transaction(tid, default_cb);
                }
                self.set_transaction_state(tid, TransactionState::Trying)?;
                receive_cb(payload, header, TransactionState::Trying);
                Ok(())
            }
            SipMethod::Ack => {
                event_cb(events::ACK_RECEIVED, TransactionState::Confirmed);
                self.set_transaction_state(tid, TransactionState::Confirmed)?;
                self.schedule_timer_i(tid);
                Ok(())
            }
            other => {
                warn!(%tid, method = %other, "unhandled request method");
                Ok(())
            }
        }
    }

    fn send_ack(&mut self, header: &SipHeader, source: SocketAddr, did: DialogId) -> Result<()> {
        let ack = SipHeader::request(
            SipMethod::Ack,
            header.request_uri,
            header.from,
            header.to,
            header.call_id,
        );
        let packet = build_packet(&ack, &[]);
        let send_callback = self
            .dialogs
            .get(&did)
            .map(|d| d.send_callback.clone())
            .ok_or_else(|| Error::Dialog(format!("dialog {} not found", did)))?;
        // ACK goes back to the source address of the incoming 200.
        send_callback(&packet, source, &ack);
        Ok(())
    }

    /// Bind the per-call delivery and event channels.  May be called
    /// once per call id.
    pub fn set_callbacks(
        &mut self,
        call_id: u16,
        receive_callback: ReceiveCallback,
        event_callback: EventCallback,
    ) -> Result<()> {
        if self.receive_callbacks.contains_key(&call_id)
            || self.event_callbacks.contains_key(&call_id)
        {
            return Err(Error::Endpoint(format!(
                "call id {} already has callbacks",
                call_id
            )));
        }
        self.receive_callbacks.insert(call_id, receive_callback);
        self.event_callbacks.insert(call_id, event_callback);
        Ok(())
    }

    /// Fallback transport path, used when a request arrives before the
    /// owner has supplied a per-call callback.
    pub fn set_default_send_callback(&mut self, send_callback: SendCallback) {
        self.default_send_callback = Some(send_callback);
    }

    fn default_send_callback(&self) -> Result<SendCallback> {
        self.default_send_callback
            .clone()
            .ok_or_else(|| Error::Endpoint("default send callback not set".to_string()))
    }

    /// Fire every timer due at or before `now`, advancing the virtual
    /// clock to each deadline as it goes.  The owner's event loop drives
    /// this; the element never reads the clock on its own.
    pub fn process_timers(&mut self, now: Instant) {
        for (deadline, timer) in self.timers.poll(now) {
            if deadline > self.now {
                self.now = deadline;
            }
            debug!(%timer, "timer fired");
            match timer {
                SipTimer::A { id, backoff } => self.handle_timer_a(id, backoff),
                SipTimer::B(id) => self.handle_timer_b(id),
                SipTimer::C(id) => self.handle_timer_c(id),
                SipTimer::E { id, backoff } => self.handle_timer_e(id, backoff),
                SipTimer::F(id) => self.handle_timer_f(id),
                SipTimer::I(id) => self.handle_timer_i(id),
                SipTimer::J(id) => self.handle_timer_j(id),
                SipTimer::K(id) => self.handle_timer_k(id),
            }
        }
        if now > self.now {
            self.now = now;
        }
    }

    /// Number of timers still pending, across all transactions.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn transaction_state(&self, id: TransactionId) -> Option<TransactionState> {
        self.transactions.get(&id).map(|tx| tx.state)
    }

    pub fn dialog_state(&self, id: DialogId) -> Option<DialogState> {
        self.dialogs.get(&id).map(|d| d.state)
    }

    // Transaction and dialog table operations.

    pub(crate) fn create_dialog(&mut self, id: DialogId, send_callback: SendCallback) -> Result<()> {
        if self.dialogs.contains_key(&id) {
            return Err(Error::Dialog(format!("dialog {} already exists", id)));
        }
        debug!(%id, "dialog created");
        self.dialogs.insert(id, Dialog::new(send_callback));
        Ok(())
    }

    pub(crate) fn dialog_exists(&self, id: DialogId) -> bool {
        self.dialogs.contains_key(&id)
    }

    pub(crate) fn set_dialog_state(&mut self, id: DialogId, state: DialogState) -> Result<()> {
        match self.dialogs.get_mut(&id) {
            Some(dialog) => {
                debug!(%id, from = %dialog.state, to = %state, "dialog state");
                dialog.state = state;
                Ok(())
            }
            None => Err(Error::Dialog(format!("dialog {} not found", id))),
        }
    }

    /// Insert a new IDLE transaction, or reset an existing one for
    /// reuse (a BYE reuses the key of the earlier INVITE): running
    /// quiesce timers are cancelled and the state returns to IDLE.
    pub(crate) fn create_transaction(&mut self, id: TransactionId, send_callback: SendCallback) {
        if let Some(tx) = self.transactions.get_mut(&id) {
            for letter in [TimerLetter::I, TimerLetter::J, TimerLetter::K] {
                if let Some(token) = tx.token_mut(letter).take() {
                    debug!(%id, "cancelling quiesce timer on reuse");
                    self.timers.cancel(token);
                }
            }
            for letter in [
                TimerLetter::A,
                TimerLetter::B,
                TimerLetter::C,
                TimerLetter::E,
                TimerLetter::F,
            ] {
                if tx.token(letter).is_some() {
                    warn!(%id, "recreating transaction with a request timer armed");
                }
            }
            tx.state = TransactionState::Idle;
            tx.send_callback = send_callback;
            // The previous request must not be retransmittable from the
            // reused entry.
            tx.cached = None;
            debug!(%id, "transaction reset to IDLE");
        } else {
            self.transactions.insert(id, Transaction::new(send_callback));
            debug!(%id, "transaction created");
        }
    }

    pub(crate) fn transaction_exists(&self, id: TransactionId) -> bool {
        self.transactions.contains_key(&id)
    }

    pub(crate) fn set_transaction_state(
        &mut self,
        id: TransactionId,
        state: TransactionState,
    ) -> Result<()> {
        match self.transactions.get_mut(&id) {
            Some(tx) => {
                debug!(%id, from = %tx.state, to = %state, "transaction state");
                tx.state = state;
                Ok(())
            }
            None => Err(Error::Transaction(format!("transaction {} not found", id))),
        }
    }

    pub(crate) fn cache_transaction_packet(
        &mut self,
        id: TransactionId,
        packet: Bytes,
        destination: SocketAddr,
        header: SipHeader,
    ) -> Result<()> {
        match self.transactions.get_mut(&id) {
            Some(tx) => {
                tx.cached = Some(CachedPacket {
                    packet,
                    destination,
                    header,
                });
                Ok(())
            }
            None => Err(Error::Transaction(format!("transaction {} not found", id))),
        }
    }

    /// The cached packet, if one is still retained.  `None` after
    /// release is the expected "nothing to retransmit" answer, not an
    /// error.
    pub(crate) fn get_transaction_packet(&self, id: TransactionId) -> Option<&CachedPacket> {
        self.transactions.get(&id).and_then(|tx| tx.cached.as_ref())
    }

    pub(crate) fn free_transaction_packet(&mut self, id: TransactionId) {
        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.cached = None;
        }
    }

    // Timer scheduling.  Each transaction tracks one token per letter;
    // arming replaces (and cancels) any earlier instance, so a token in
    // the table always refers to a live queue entry.

    fn arm(&mut self, id: TransactionId, letter: TimerLetter, delay: Duration, timer: SipTimer) {
        if !self.transactions.contains_key(&id) {
            warn!(%id, "cannot arm timer for unknown transaction");
            return;
        }
        let token = self.timers.schedule_at(self.now + delay, timer);
        if let Some(tx) = self.transactions.get_mut(&id) {
            if let Some(old) = tx.token_mut(letter).replace(token) {
                self.timers.cancel(old);
            }
        }
    }

    fn disarm(&mut self, id: TransactionId, letter: TimerLetter) {
        if let Some(tx) = self.transactions.get_mut(&id) {
            if let Some(token) = tx.token_mut(letter).take() {
                self.timers.cancel(token);
            }
        }
    }

    pub(crate) fn schedule_timer_a(&mut self, id: TransactionId, backoff: u32) {
        let delay = self.config.t1 * backoff;
        self.arm(id, TimerLetter::A, delay, SipTimer::A { id, backoff });
    }

    pub(crate) fn schedule_timer_b(&mut self, id: TransactionId) {
        let delay = self.config.t1 * 64;
        self.arm(id, TimerLetter::B, delay, SipTimer::B(id));
    }

    pub(crate) fn schedule_timer_c(&mut self, id: TransactionId) {
        let delay = self.config.timer_c;
        self.arm(id, TimerLetter::C, delay, SipTimer::C(id));
    }

    pub(crate) fn schedule_timer_e(&mut self, id: TransactionId, backoff: u32) {
        // Non-INVITE retransmit interval is capped at T2.
        let delay = std::cmp::min(self.config.t1 * backoff, self.config.t2);
        self.arm(id, TimerLetter::E, delay, SipTimer::E { id, backoff });
    }

    pub(crate) fn schedule_timer_f(&mut self, id: TransactionId) {
        let delay = self.config.t1 * 64;
        self.arm(id, TimerLetter::F, delay, SipTimer::F(id));
    }

    pub(crate) fn schedule_timer_i(&mut self, id: TransactionId) {
        let delay = self.quiesce_delay(self.config.t4);
        self.arm(id, TimerLetter::I, delay, SipTimer::I(id));
    }

    pub(crate) fn schedule_timer_j(&mut self, id: TransactionId) {
        let delay = self.quiesce_delay(self.config.t1 * 64);
        self.arm(id, TimerLetter::J, delay, SipTimer::J(id));
    }

    pub(crate) fn schedule_timer_k(&mut self, id: TransactionId) {
        let delay = self.quiesce_delay(self.config.t4);
        self.arm(id, TimerLetter::K, delay, SipTimer::K(id));
    }

    fn quiesce_delay(&self, unreliable: Duration) -> Duration {
        if self.config.reliable_transport {
            Duration::ZERO
        } else {
            unreliable
        }
    }

    pub(crate) fn cancel_timer_a(&mut self, id: TransactionId) {
        self.disarm(id, TimerLetter::A);
    }

    pub(crate) fn cancel_timer_b(&mut self, id: TransactionId) {
        self.disarm(id, TimerLetter::B);
    }

    pub(crate) fn cancel_timer_c(&mut self, id: TransactionId) {
        self.disarm(id, TimerLetter::C);
    }

    pub(crate) fn cancel_timer_e(&mut self, id: TransactionId) {
        self.disarm(id, TimerLetter::E);
    }

    pub(crate) fn cancel_timer_f(&mut self, id: TransactionId) {
        self.disarm(id, TimerLetter::F);
    }

    // Timer expiry handlers.  Each one first re-checks the table: the
    // token must still be armed and the state must match, otherwise the
    // firing is stale and absorbed silently.

    fn take_fired(
        &mut self,
        id: TransactionId,
        letter: TimerLetter,
        expected: TransactionState,
    ) -> bool {
        match self.transactions.get_mut(&id) {
            Some(tx) if tx.token(letter).is_some() && tx.state == expected => {
                *tx.token_mut(letter) = None;
                true
            }
            _ => {
                debug!(%id, ?letter, "stale timer firing ignored");
                false
            }
        }
    }

    fn handle_timer_a(&mut self, id: TransactionId, backoff: u32) {
        if !self.take_fired(id, TimerLetter::A, TransactionState::Calling) {
            return;
        }
        self.emit_event(id.call_id, events::TIMER_A_EXPIRED, TransactionState::Calling);
        self.retransmit(id);
        self.schedule_timer_a(id, backoff << 1);
    }

    fn handle_timer_b(&mut self, id: TransactionId) {
        if !self.take_fired(id, TimerLetter::B, TransactionState::Calling) {
            return;
        }
        self.cancel_timer_a(id);
        self.free_transaction_packet(id);
        let _ = self.set_transaction_state(id, TransactionState::Failed);
        let did = DialogId::new(id.call_id, id.from, id.to);
        if self.dialog_exists(did) {
            let _ = self.set_dialog_state(did, DialogState::Terminated);
        }
        self.emit_event(id.call_id, events::TIMER_B_EXPIRED, TransactionState::Failed);
        self.emit_event(id.call_id, events::REQUEST_TIMEOUT, TransactionState::Failed);
    }

    fn handle_timer_c(&mut self, id: TransactionId) {
        if !self.take_fired(id, TimerLetter::C, TransactionState::Proceeding) {
            return;
        }
        let _ = self.set_transaction_state(id, TransactionState::Failed);
        let did = DialogId::new(id.call_id, id.from, id.to);
        if self.dialog_exists(did) {
            let _ = self.set_dialog_state(did, DialogState::Terminated);
        }
        self.emit_event(id.call_id, events::TIMER_C_EXPIRED, TransactionState::Failed);
        self.emit_event(id.call_id, events::REQUEST_TIMEOUT, TransactionState::Failed);
    }

    fn handle_timer_e(&mut self, id: TransactionId, backoff: u32) {
        if !self.take_fired(id, TimerLetter::E, TransactionState::Trying) {
            return;
        }
        self.emit_event(id.call_id, events::TIMER_E_EXPIRED, TransactionState::Trying);
        self.retransmit(id);
        self.schedule_timer_e(id, backoff << 1);
    }

    fn handle_timer_f(&mut self, id: TransactionId) {
        if !self.take_fired(id, TimerLetter::F, TransactionState::Trying) {
            return;
        }
        self.cancel_timer_e(id);
        self.free_transaction_packet(id);
        let _ = self.set_transaction_state(id, TransactionState::Failed);
        self.emit_event(id.call_id, events::TIMER_F_EXPIRED, TransactionState::Failed);
        self.emit_event(id.call_id, events::REQUEST_TIMEOUT, TransactionState::Failed);
    }

    fn handle_timer_i(&mut self, id: TransactionId) {
        if !self.take_fired(id, TimerLetter::I, TransactionState::Confirmed) {
            return;
        }
        self.emit_event(id.call_id, events::TIMER_I_EXPIRED, TransactionState::Confirmed);
        self.free_transaction_packet(id);
        let _ = self.set_transaction_state(id, TransactionState::Terminated);
    }

    fn handle_timer_j(&mut self, id: TransactionId) {
        if !self.take_fired(id, TimerLetter::J, TransactionState::Completed) {
            return;
        }
        self.emit_event(id.call_id, events::TIMER_J_EXPIRED, TransactionState::Completed);
        self.free_transaction_packet(id);
        let _ = self.set_transaction_state(id, TransactionState::Terminated);
    }

    fn handle_timer_k(&mut self, id: TransactionId) {
        if !self.take_fired(id, TimerLetter::K, TransactionState::Completed) {
            return;
        }
        self.emit_event(id.call_id, events::TIMER_K_EXPIRED, TransactionState::Completed);
        self.free_transaction_packet(id);
        let _ = self.set_transaction_state(id, TransactionState::Terminated);
    }

    fn retransmit(&mut self, id: TransactionId) {
        let cached = self.get_transaction_packet(id).cloned();
        let send_callback = self.transactions.get(&id).map(|tx| tx.send_callback.clone());
        match (cached, send_callback) {
            (Some(cached), Some(send_callback)) => {
                debug!(%id, "retransmitting cached packet");
                send_callback(&cached.packet, cached.destination, &cached.header);
            }
            _ => warn!(%id, "retransmit timer fired with no cached packet"),
        }
    }

    fn emit_event(&self, call_id: u16, reason: &'static str, state: TransactionState) {
        match self.event_callbacks.get(&call_id) {
            Some(cb) => cb(reason, state),
            None => warn!(call_id, reason, "event callback not registered"),
        }
    }
}
