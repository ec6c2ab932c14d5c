//! Post-close tuple quarantine.
//!
//! After an orderly close the socket record is replaced by a much smaller [`TimeWait`] record.
//! It keeps just enough sequence state to answer stray retransmissions from the old incarnation
//! and blocks the tuple from being reused until the grace period expires.
//!
//! [`TimeWait`]: struct.TimeWait.html
use crate::wire::{Flags, SeqNumber, TcpRepr};

use super::timers::Timer;
use super::FourTuple;

/// What remains of a connection while its tuple cools off.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeWait {
    /// The quarantined identity.
    pub tuple: FourTuple,
    /// The next sequence number we would have accepted.
    pub rcv_nxt: SeqNumber,
    /// The next sequence number we would have sent.
    pub snd_nxt: SeqNumber,
    /// The expiry deadline.
    pub timer: Timer,
}

impl TimeWait {
    /// The bare ACK answering a non-RST segment from the old incarnation.
    ///
    /// Restates our final sequence position so a confused peer can resynchronize or reset.
    pub fn re_ack(&self) -> TcpRepr {
        TcpRepr {
            flags: Flags::default(),
            seq_number: self.snd_nxt,
            ack_number: Some(self.rcv_nxt),
            window_len: 0,
            ..TcpRepr::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_ack_restates_sequence_state() {
        let record = TimeWait {
            rcv_nxt: SeqNumber(500),
            snd_nxt: SeqNumber(900),
            ..TimeWait::default()
        };

        let repr = record.re_ack();
        assert_eq!(repr.seq_number, SeqNumber(900));
        assert_eq!(repr.ack_number, Some(SeqNumber(500)));
        assert!(!repr.flags.syn() && !repr.flags.rst() && !repr.flags.fin());
        assert_eq!(repr.sequence_len(), 0);
    }
}
