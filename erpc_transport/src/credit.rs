//! See [`CreditWindow`].

/// Tracks a session's request credits: the number of requests that may be
/// outstanding (occupying a slot) at once.
///
/// Adapted from `aeronet_transport::limit::TokenBucket`'s try-then-commit
/// split, simplified to a single always-integer counter since a credit is
/// consumed and released in whole units (one per in-flight request), never
/// a variable byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditWindow {
    cap: usize,
    rem: usize,
    /// Set when the receiver could not allocate a reassembly buffer for an
    /// incoming large transfer; while withheld, [`CreditWindow::release`]
    /// does not hand a credit back to the sender until
    /// [`CreditWindow::stop_withholding`] is called. This is the window's
    /// congestion-control role (`spec.md` §4.4).
    withheld: usize,
}

/// Returned by [`CreditWindow::try_consume`] when no credit is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("no credits available: {used}/{cap} in use")]
pub struct NoCredits {
    /// Credits currently in use.
    pub used: usize,
    /// Total configured credit count.
    pub cap: usize,
}

impl CreditWindow {
    /// Creates a window with `cap` credits, all initially available.
    #[must_use]
    pub const fn new(cap: usize) -> Self {
        Self {
            cap,
            rem: cap,
            withheld: 0,
        }
    }

    /// Total configured credit count (equal to the session's slot count).
    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Credits currently available to consume.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.rem
    }

    /// Attempts to consume one credit, occupying a slot for the lifetime
    /// of a request.
    ///
    /// # Errors
    ///
    /// Returns [`NoCredits`] if every credit is in use.
    pub fn try_consume(&mut self) -> Result<(), NoCredits> {
        if self.rem == 0 {
            return Err(NoCredits {
                used: self.cap - self.rem,
                cap: self.cap,
            });
        }
        self.rem -= 1;
        Ok(())
    }

    /// Returns one credit, e.g. once a request's response has been fully
    /// received. A no-op (the credit stays withheld) if
    /// [`CreditWindow::withhold`] is currently in effect.
    pub fn release(&mut self) {
        if self.withheld > 0 {
            self.withheld -= 1;
            return;
        }
        debug_assert!(self.rem < self.cap, "released more credits than consumed");
        self.rem = (self.rem + 1).min(self.cap);
    }

    /// Withholds the next [`CreditWindow::release`] instead of returning
    /// the credit immediately: used when the receiver cannot yet allocate
    /// a reassembly buffer for a large transfer, delaying the implicit
    /// acknowledgement this credit return represents.
    pub fn withhold(&mut self) {
        self.withheld += 1;
    }

    /// Releases every currently withheld credit, e.g. once reassembly
    /// buffer pressure clears.
    pub fn stop_withholding(&mut self) {
        let n = self.withheld;
        self.withheld = 0;
        self.rem = (self.rem + n).min(self.cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_and_release_round_trip() {
        let mut window = CreditWindow::new(8);
        window.try_consume().expect("consume");
        assert_eq!(window.remaining(), 7);
        window.release();
        assert_eq!(window.remaining(), 8);
    }

    #[test]
    fn exhausted_window_rejects_consume() {
        let mut window = CreditWindow::new(2);
        window.try_consume().expect("consume 1");
        window.try_consume().expect("consume 2");
        let err = window.try_consume().unwrap_err();
        assert_eq!(err, NoCredits { used: 2, cap: 2 });
    }

    #[test]
    fn withheld_credit_does_not_return_until_released() {
        let mut window = CreditWindow::new(4);
        window.try_consume().expect("consume");
        window.withhold();
        window.release();
        assert_eq!(window.remaining(), 3, "credit should still be withheld");
        window.stop_withholding();
        assert_eq!(window.remaining(), 4);
    }
}
