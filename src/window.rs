/// Sliding anti-replay window for record sequence numbers.
///
/// Maintains the latest authenticated sequence number and a 64-bit bitmap of
/// the last 64 seen sequence numbers. Checking and marking are separate: a
/// record is checked before decryption and only marked once it authenticated,
/// so a forged record can never advance the window.
///
/// Each epoch has its own `ReplayWindow`.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    max_seq: u64,
    window: u64,
    seen_any: bool,
}

impl ReplayWindow {
    const SIZE: u64 = 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest sequence number still inside the window.
    pub fn floor(&self) -> u64 {
        (self.max_seq + 1).saturating_sub(Self::SIZE)
    }

    /// Highest sequence number marked so far.
    pub fn max_seq(&self) -> Option<u64> {
        self.seen_any.then_some(self.max_seq)
    }

    /// Returns true if `seqno` is neither a duplicate nor below the floor.
    pub fn check(&self, seqno: u64) -> bool {
        if !self.seen_any || seqno > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seqno;
        if offset >= Self::SIZE {
            return false;
        }
        self.window & (1u64 << offset) == 0
    }

    /// Record `seqno` as received. Call only after the record authenticated.
    pub fn mark(&mut self, seqno: u64) {
        if !self.seen_any {
            self.seen_any = true;
            self.max_seq = seqno;
            self.window = 1;
            return;
        }

        if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            self.window = if delta >= Self::SIZE {
                0
            } else {
                self.window << delta
            };
            self.window |= 1;
            self.max_seq = seqno;
        } else {
            let offset = self.max_seq - seqno;
            if offset < Self::SIZE {
                self.window |= 1u64 << offset;
            }
        }
    }

    /// Mark everything `other` has seen.
    pub fn merge(&mut self, other: &ReplayWindow) {
        if !other.seen_any {
            return;
        }
        for offset in (0..Self::SIZE).rev() {
            if other.window & (1u64 << offset) != 0 {
                if let Some(seqno) = other.max_seq.checked_sub(offset) {
                    self.mark(seqno);
                }
            }
        }
    }

    /// Check and mark in one step, for plaintext epochs.
    pub fn check_and_mark(&mut self, seqno: u64) -> bool {
        if !self.check(seqno) {
            return false;
        }
        self.mark(seqno);
        true
    }
}
