//! An in-process [`Transport`] backed by `std::sync::mpsc`.
//!
//! Used by every test and demo in this workspace in place of real NIC
//! hardware, the same role `aeronet_channel::ChannelIo` plays for `aeronet`'s
//! own test suite. This is test tooling standing in for absent hardware, not
//! an emulation of verbs semantics: there is no queue pair, no completion
//! queue depth limit, and registration always succeeds.

use std::{
    collections::{HashMap, VecDeque},
    sync::mpsc::{Receiver, Sender, TryRecvError, channel},
};

use tracing::trace;

use crate::{CompletionEvent, IoError, Mr, OutgoingPacket, RecvSlot, Transport};

/// Creates a connected pair of [`LoopbackTransport`]s: packets posted on one
/// side arrive as completions on the other.
#[must_use]
pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
    let (tx_a, rx_b) = channel::<Vec<u8>>();
    let (tx_b, rx_a) = channel::<Vec<u8>>();
    (
        LoopbackTransport::new(tx_a, rx_a),
        LoopbackTransport::new(tx_b, rx_b),
    )
}

struct PostedRecv {
    wr_id: u64,
    /// Raw pointer into a buffer supplied by a previous `post_recv` call.
    ///
    /// # Safety
    ///
    /// The caller must keep the pointed-to memory alive and not move it
    /// until the matching completion is observed, the same invariant real
    /// NIC-registered memory must uphold.
    ptr: *mut u8,
    cap: usize,
}

/// In-process loopback [`Transport`], optionally dropping a fraction of
/// outbound packets to exercise the retransmission path (see `spec.md` §8,
/// "Injected loss").
pub struct LoopbackTransport {
    send: Sender<Vec<u8>>,
    recv: Receiver<Vec<u8>>,
    next_mr: u32,
    regions: HashMap<u32, (usize, usize)>,
    recv_slots: VecDeque<PostedRecv>,
    send_completions: VecDeque<u64>,
    /// Deterministic drop counter: drops one packet every `drop_every` sends
    /// when set. `None` disables injected loss.
    drop_every: Option<u32>,
    send_count: u32,
}

impl LoopbackTransport {
    fn new(send: Sender<Vec<u8>>, recv: Receiver<Vec<u8>>) -> Self {
        Self {
            send,
            recv,
            next_mr: 0,
            regions: HashMap::new(),
            recv_slots: VecDeque::new(),
            send_completions: VecDeque::new(),
            drop_every: None,
            send_count: 0,
        }
    }

    /// Enables injected packet loss: one in `every` outbound packets is
    /// silently dropped instead of being delivered to the peer.
    ///
    /// # Panics
    ///
    /// Panics if `every == 0`.
    pub fn set_drop_every(&mut self, every: u32) {
        assert!(every > 0, "drop_every must be nonzero");
        self.drop_every = Some(every);
    }
}

impl Transport for LoopbackTransport {
    unsafe fn register_region(&mut self, base: *mut u8, len: usize) -> Result<Mr, IoError> {
        let id = self.next_mr;
        self.next_mr += 1;
        self.regions.insert(id, (base as usize, len));
        trace!(mr = id, len, "registered loopback memory region");
        Ok(Mr(id))
    }

    fn deregister_region(&mut self, mr: Mr) {
        self.regions.remove(&mr.0);
    }

    fn post_send(&mut self, packets: &[OutgoingPacket<'_>]) {
        for pkt in packets {
            self.send_count += 1;
            let drop_this = self
                .drop_every
                .is_some_and(|every| self.send_count % every == 0);
            if drop_this {
                trace!(wr_id = pkt.wr_id, "injected loss: dropping packet");
                continue;
            }
            let _ = self.send.send(pkt.data.to_vec());
            self.send_completions.push_back(pkt.wr_id);
        }
    }

    fn post_recv(&mut self, buffers: &mut [RecvSlot<'_>]) {
        for slot in buffers {
            self.recv_slots.push_back(PostedRecv {
                wr_id: slot.wr_id,
                ptr: slot.buf.as_mut_ptr(),
                cap: slot.buf.len(),
            });
        }
    }

    fn poll_completions(&mut self, max: usize) -> Vec<CompletionEvent> {
        let mut out = Vec::new();
        while out.len() < max {
            if let Some(wr_id) = self.send_completions.pop_front() {
                out.push(CompletionEvent::Send { wr_id });
                continue;
            }
            match self.recv.try_recv() {
                Ok(bytes) => {
                    let Some(slot) = self.recv_slots.pop_front() else {
                        trace!("no posted receive buffer available, dropping packet");
                        continue;
                    };
                    let len = bytes.len().min(slot.cap);
                    // SAFETY: `slot.ptr`/`slot.cap` came from a `&mut [u8]`
                    // passed to `post_recv` and has not been moved since.
                    unsafe {
                        std::ptr::copy_nonoverlapping(bytes.as_ptr(), slot.ptr, len);
                    }
                    out.push(CompletionEvent::Recv {
                        wr_id: slot.wr_id,
                        len,
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    out.push(CompletionEvent::Error {
                        reason: "peer loopback transport dropped".to_owned(),
                    });
                    break;
                }
            }
        }
        out
    }

    fn tx_flush(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_completion_observed_before_recv() {
        let (mut a, _b) = pair();
        let data = vec![1, 2, 3];
        a.post_send(&[OutgoingPacket { data: &data, wr_id: 7 }]);
        let events = a.poll_completions(8);
        assert_eq!(events, vec![CompletionEvent::Send { wr_id: 7 }]);
    }

    #[test]
    fn round_trip_delivers_bytes_into_posted_buffer() {
        let (mut a, mut b) = pair();
        let data = vec![9, 8, 7, 6];
        a.post_send(&[OutgoingPacket { data: &data, wr_id: 1 }]);
        a.poll_completions(8);

        let mut buf = [0u8; 8];
        b.post_recv(&mut [RecvSlot { buf: &mut buf, wr_id: 42 }]);
        let events = b.poll_completions(8);
        assert_eq!(events, vec![CompletionEvent::Recv { wr_id: 42, len: 4 }]);
        assert_eq!(&buf[..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn recv_without_posted_buffer_is_dropped_not_errored() {
        let (mut a, mut b) = pair();
        let data = vec![1];
        a.post_send(&[OutgoingPacket { data: &data, wr_id: 1 }]);
        a.poll_completions(8);

        // no post_recv on b: the packet should be silently dropped, not panic
        // or surface as a CompletionEvent::Error.
        let events = b.poll_completions(8);
        assert!(events.is_empty());
    }

    #[test]
    fn injected_loss_drops_every_nth_send() {
        let (mut a, mut b) = pair();
        a.set_drop_every(2);
        let mut buf = [0u8; 8];
        for i in 0..4u64 {
            let data = vec![i as u8];
            a.post_send(&[OutgoingPacket { data: &data, wr_id: i }]);
            b.post_recv(&mut [RecvSlot { buf: &mut buf, wr_id: i }]);
        }
        let send_events = a.poll_completions(8);
        let recv_events = b.poll_completions(8);
        // sends 1 and 3 (1-indexed: the 2nd and 4th) are dropped, so only two
        // of the four sends produce a completion on either side.
        assert_eq!(send_events.len(), 2);
        assert_eq!(recv_events.len(), 2);
    }

    #[test]
    #[should_panic(expected = "drop_every must be nonzero")]
    fn set_drop_every_zero_panics() {
        let (mut a, _b) = pair();
        a.set_drop_every(0);
    }
}
