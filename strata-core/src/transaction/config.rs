//! Transaction manager configuration.

/// Limits of the transaction manager.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Most mutation records one transaction may hold.
    pub max_records_per_transaction: usize,
    /// Events kept by the transaction trace.
    pub trace_capacity: usize,
    /// Buffered commit notifications for mirroring subscribers.
    pub commit_channel_capacity: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_records_per_transaction: 256,
            trace_capacity: 4096,
            commit_channel_capacity: 64,
        }
    }
}

impl TransactionConfig {
    /// Set the per-transaction record limit.
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records_per_transaction = max.max(1);
        self
    }

    /// Set the trace capacity.
    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }
}
