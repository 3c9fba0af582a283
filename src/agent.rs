use crate::dialog::{DialogId, DialogState};
use crate::element::{EventCallback, ReceiveCallback, SendCallback, SipConfig, SipElement};
use crate::transaction::{TransactionId, TransactionState};
use crate::Result;
use std::net::SocketAddr;
use std::time::Instant;

/// A user-agent endpoint: originates and answers calls.
///
/// Thin shell over [`SipElement`]; it exists so an application that is
/// purely an endpoint never touches relay-only machinery.
pub struct SipAgent {
    element: SipElement,
}

impl SipAgent {
    pub fn new(config: SipConfig) -> Self {
        SipAgent {
            element: SipElement::new(config),
        }
    }

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
        self.element
            .send_invite(body, destination, request_uri, from, to, call_id, send_callback)
    }

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
        self.element
            .send_bye(body, destination, request_uri, from, to, call_id, send_callback)
    }

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
        self.element
            .send_response(body, destination, status_code, from, to, call_id, send_callback)
    }

    pub fn receive(&mut self, packet: &[u8], source: SocketAddr) -> Result<()> {
        self.element.receive(packet, source)
    }

    pub fn set_callbacks(
        &mut self,
        call_id: u16,
        receive_callback: ReceiveCallback,
        event_callback: EventCallback,
    ) -> Result<()> {
        self.element
            .set_callbacks(call_id, receive_callback, event_callback)
    }

    pub fn set_default_send_callback(&mut self, send_callback: SendCallback) {
        self.element.set_default_send_callback(send_callback);
    }

    pub fn process_timers(&mut self, now: Instant) {
        self.element.process_timers(now);
    }

    pub fn pending_timers(&self) -> usize {
        self.element.pending_timers()
    }

    pub fn transaction_state(&self, id: TransactionId) -> Option<TransactionState> {
        self.element.transaction_state(id)
    }

    pub fn dialog_state(&self, id: DialogId) -> Option<DialogState> {
        self.element.dialog_state(id)
    }
}
