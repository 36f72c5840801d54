//! See [`EndpointStats`].

/// Slow-path bookkeeping counters for one [`crate::RpcEndpoint`].
///
/// `spec.md` §4.7 scopes statistics collection to the slow path: nothing
/// here is read on the hot path, it only accumulates. Modeled on
/// `aeronet_transport::message::MessageStats`: a plain `Add`/`AddAssign`
/// struct of counters rather than a metrics-exporter integration, since a
/// full observability backend is out of scope for the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[derive(derive_more::Add, derive_more::AddAssign, derive_more::Sub, derive_more::SubAssign)]
pub struct EndpointStats {
    /// Requests successfully enqueued via `enqueue_request`.
    pub requests_enqueued: u64,
    /// Responses successfully enqueued via `enqueue_response`.
    pub responses_enqueued: u64,
    /// Request packets retransmitted after a PTO deadline expired.
    pub retransmissions: u64,
    /// `enqueue_request` calls rejected with `NoCredits`.
    pub credit_rejections: u64,
    /// Sessions that reached `Connected`.
    pub sessions_connected: u64,
    /// Sessions that reached `Disconnected` after having been connected.
    pub sessions_disconnected: u64,
    /// Sessions that were torn down via `ResetInProgress` with outstanding
    /// requests.
    pub sessions_reset: u64,
    /// Management packets dropped from the background inbox because they
    /// named an unknown session or malformed content.
    pub management_packets_dropped: u64,
}
