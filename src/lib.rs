//! A SIP-like call control core.
//!
//! Drives request/response transactions and multi-message dialogs
//! (INVITE / ACK / BYE) between two signaling elements, with RFC 3261
//! style retransmission and timeout timers.  The engine never opens a
//! socket: packets go out through caller-supplied send callbacks, and
//! time advances only when the owner polls the timer queue.

pub mod agent;
pub mod dialog;
pub mod element;
pub mod error;
pub mod header;
pub mod proxy;
pub mod timer;
pub mod transaction;

pub use agent::SipAgent;
pub use dialog::{DialogId, DialogState};
pub use element::{events, EventCallback, ReceiveCallback, SendCallback, SipConfig, SipElement};
pub use error::{Error, Result};
pub use header::{status_code_to_string, SipHeader, SipMessageType, SipMethod};
pub use proxy::SipProxy;
pub use timer::TimerQueue;
pub use transaction::{TransactionId, TransactionState};
