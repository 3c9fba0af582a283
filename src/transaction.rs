use crate::element::SendCallback;
use crate::header::SipHeader;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// RFC 3261 RTT estimate.
pub const T1: Duration = Duration::from_millis(500);
/// Maximum retransmit interval for non-INVITE requests.
pub const T2: Duration = Duration::from_secs(4);
/// Maximum duration a message will remain in the network.
pub const T4: Duration = Duration::from_secs(5);

/// Key addressing one transaction: (call id, from URI, to URI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub call_id: u16,
    pub from: u32,
    pub to: u32,
}

impl TransactionId {
    pub fn new(call_id: u16, from: u32, to: u32) -> Self {
        TransactionId { call_id, from, to }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.call_id, self.from, self.to)
    }
}

/// Progression of a transaction, after RFC 3261 figure 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    /// Initial client state for an INVITE transaction.
    Calling,
    /// Initial client and server state for a non-INVITE transaction.
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Idle => "IDLE",
            TransactionState::Calling => "CALLING",
            TransactionState::Trying => "TRYING",
            TransactionState::Proceeding => "PROCEEDING",
            TransactionState::Completed => "COMPLETED",
            TransactionState::Confirmed => "CONFIRMED",
            TransactionState::Terminated => "TERMINATED",
            TransactionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The timer letters a transaction may have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerLetter {
    A = 0,
    B = 1,
    C = 2,
    E = 3,
    F = 4,
    I = 5,
    J = 6,
    K = 7,
}

pub(crate) const TIMER_LETTERS: usize = 8;

/// Payload carried in the timer queue; identifies which timer fired
/// for which transaction.  Retransmit timers carry the backoff
/// multiplier they were scheduled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SipTimer {
    A { id: TransactionId, backoff: u32 },
    B(TransactionId),
    C(TransactionId),
    E { id: TransactionId, backoff: u32 },
    F(TransactionId),
    I(TransactionId),
    J(TransactionId),
    K(TransactionId),
}

impl fmt::Display for SipTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipTimer::A { id, backoff } => write!(f, "TimerA({}): {}", backoff, id),
            SipTimer::B(id) => write!(f, "TimerB: {}", id),
            SipTimer::C(id) => write!(f, "TimerC: {}", id),
            SipTimer::E { id, backoff } => write!(f, "TimerE({}): {}", backoff, id),
            SipTimer::F(id) => write!(f, "TimerF: {}", id),
            SipTimer::I(id) => write!(f, "TimerI: {}", id),
            SipTimer::J(id) => write!(f, "TimerJ: {}", id),
            SipTimer::K(id) => write!(f, "TimerK: {}", id),
        }
    }
}

/// The last request sent on a transaction, retained for retransmission.
#[derive(Clone)]
pub(crate) struct CachedPacket {
    pub packet: Bytes,
    pub destination: SocketAddr,
    pub header: SipHeader,
}

/// Per-transaction state owned by the signaling element's table.
pub(crate) struct Transaction {
    pub send_callback: SendCallback,
    pub state: TransactionState,
    /// At most one message is cached at a time; freed once no
    /// retransmission can be required.
    pub cached: Option<CachedPacket>,
    tokens: [Option<u64>; TIMER_LETTERS],
}

impl Transaction {
    pub fn new(send_callback: SendCallback) -> Self {
        Transaction {
            send_callback,
            state: TransactionState::Idle,
            cached: None,
            tokens: [None; TIMER_LETTERS],
        }
    }

    pub fn token(&self, letter: TimerLetter) -> Option<u64> {
        self.tokens[letter as usize]
    }

    pub fn token_mut(&mut self, letter: TimerLetter) -> &mut Option<u64> {
        &mut self.tokens[letter as usize]
    }
}
