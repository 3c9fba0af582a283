use crate::dialog::{DialogId, DialogState};
use crate::element::{EventCallback, ReceiveCallback, SendCallback, SipConfig, SipElement};
use crate::transaction::{TransactionId, TransactionState};
use crate::Result;
use std::net::SocketAddr;
use std::time::Instant;

/// A stateful relay.
///
/// Behaves like [`SipAgent`] except around provisional responses: when
/// the relay answers an INVITE with a 100 it arms timer C, the bound on
/// how long it will wait for a final response to forward.  Forwarding a
/// final response disarms it; expiry fails the transaction.
pub struct SipProxy {
    element: SipElement,
}

impl SipProxy {
    pub fn new(config: SipConfig) -> Self {
        SipProxy {
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

    /// Send a response upstream.  A 100 additionally arms timer C; a
    /// final response disarms it.
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
            .send_response(body, destination, status_code, from, to, call_id, send_callback)?;
        let tid = TransactionId::new(call_id, from, to);
        if status_code == 100 {
            self.element.schedule_timer_c(tid);
        } else if status_code >= 200 {
            self.element.cancel_timer_c(tid);
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::events;
    use crate::header::{SipHeader, SipMethod};
    use bytes::BytesMut;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "10.0.0.1:5060".parse().unwrap()
    }

    fn encode(header: &SipHeader) -> Vec<u8> {
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        buf.to_vec()
    }

    fn relay_with_invite(events_seen: Arc<Mutex<Vec<&'static str>>>) -> SipProxy {
        let mut proxy = SipProxy::new(SipConfig::default());
        proxy.set_default_send_callback(Arc::new(|_, _, _| {}));
        proxy
            .set_callbacks(
                7,
                Arc::new(|_, _, _| {}),
                Arc::new(move |reason, _| events_seen.lock().unwrap().push(reason)),
            )
            .unwrap();
        let invite = SipHeader::request(SipMethod::Invite, 2, 1, 2, 7);
        proxy.receive(&encode(&invite), addr()).unwrap();
        proxy
    }

    #[test]
    fn trying_response_arms_timer_c() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut proxy = relay_with_invite(seen.clone());
        let sends = Arc::new(AtomicUsize::new(0));
        let sends_cb = sends.clone();
        proxy
            .send_response(
                b"",
                addr(),
                100,
                1,
                2,
                7,
                Arc::new(move |_, _, _| {
                    sends_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(sends.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.pending_timers(), 1);

        proxy.process_timers(Instant::now() + Duration::from_secs(181));
        let tid = TransactionId::new(7, 1, 2);
        assert_eq!(proxy.transaction_state(tid), Some(TransactionState::Failed));
        assert_eq!(
            proxy.dialog_state(DialogId::new(7, 1, 2)),
            Some(DialogState::Terminated)
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![events::TIMER_C_EXPIRED, events::REQUEST_TIMEOUT]
        );
    }

    #[test]
    fn final_response_disarms_timer_c() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut proxy = relay_with_invite(seen.clone());
        proxy
            .send_response(b"", addr(), 100, 1, 2, 7, Arc::new(|_, _, _| {}))
            .unwrap();
        proxy
            .send_response(b"answer", addr(), 200, 1, 2, 7, Arc::new(|_, _, _| {}))
            .unwrap();
        assert_eq!(proxy.pending_timers(), 0);

        proxy.process_timers(Instant::now() + Duration::from_secs(600));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(
            proxy.dialog_state(DialogId::new(7, 1, 2)),
            Some(DialogState::Confirmed)
        );
    }
}
