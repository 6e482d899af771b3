//! Interface tunables

use crate::ba::BaConfig;

/// Receive path tunables, fixed at interface attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub ba: BaConfig,
    /// Receive lifetime of a partially reassembled MSDU.
    pub defrag_lifetime_us: u64,
    /// How long an outbound ADDBA request waits for its response.
    pub addba_resp_timeout_us: u64,
    /// SA Query retransmission interval.
    pub sa_query_timeout_us: u64,
    /// SA Query attempts before the association is considered stale.
    pub sa_query_max_count: u8,
    /// Upper bound on peers kept in the node table.
    pub max_nodes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ba: BaConfig::default(),
            defrag_lifetime_us: 1_000_000,
            addba_resp_timeout_us: 1_000_000,
            sa_query_timeout_us: 10_000,
            sa_query_max_count: 3,
            max_nodes: 512,
        }
    }
}
