use crate::element::SendCallback;
use std::fmt;

/// Key addressing one dialog: (call id, lower URI, higher URI).
///
/// The constructor normalizes URI order so the same dialog is found
/// regardless of which endpoint derives the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: u16,
    pub low_uri: u32,
    pub high_uri: u32,
}

impl DialogId {
    pub fn new(call_id: u16, uri_a: u32, uri_b: u32) -> Self {
        if uri_a < uri_b {
            DialogId {
                call_id,
                low_uri: uri_a,
                high_uri: uri_b,
            }
        } else {
            DialogId {
                call_id,
                low_uri: uri_b,
                high_uri: uri_a,
            }
        }
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.call_id, self.low_uri, self.high_uri)
    }
}

/// Progression of a dialog, after RFC 4235 figure 3.
///
/// The derived ordering is the monotonic progression; a dialog's state
/// never decreases, though `Early` may be skipped entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DialogState {
    Uninitialized,
    Trying,
    Proceeding,
    /// Reserved for forking flows; not entered by the current engine.
    Early,
    Confirmed,
    Terminated,
}

impl DialogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogState::Uninitialized => "UNINITIALIZED",
            DialogState::Trying => "TRYING",
            DialogState::Proceeding => "PROCEEDING",
            DialogState::Early => "EARLY",
            DialogState::Confirmed => "CONFIRMED",
            DialogState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dialog state owned by the signaling element's table.
pub(crate) struct Dialog {
    pub state: DialogState,
    /// Send path for subsequent in-dialog requests (BYE, ACK).
    pub send_callback: SendCallback,
}

impl Dialog {
    pub fn new(send_callback: SendCallback) -> Self {
        Dialog {
            state: DialogState::Uninitialized,
            send_callback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_id_is_order_normalized() {
        assert_eq!(DialogId::new(7, 1, 2), DialogId::new(7, 2, 1));
        assert_eq!(DialogId::new(7, 1, 2).low_uri, 1);
        assert_eq!(DialogId::new(7, 1, 2).high_uri, 2);
        assert_ne!(DialogId::new(7, 1, 2), DialogId::new(8, 1, 2));
    }

    #[test]
    fn dialog_states_are_ordered() {
        assert!(DialogState::Uninitialized < DialogState::Trying);
        assert!(DialogState::Trying < DialogState::Proceeding);
        assert!(DialogState::Proceeding < DialogState::Early);
        assert!(DialogState::Early < DialogState::Confirmed);
        assert!(DialogState::Confirmed < DialogState::Terminated);
    }
}
