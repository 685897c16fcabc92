//! Cycle-scoped accumulator of operator-visible errors.

/// Collects the errors raised during one control-loop cycle.
///
/// The ledger starts empty every cycle and its contents replace
/// `csp-config.errors` wholesale when the cycle persists. Every recorded
/// entry is also logged.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    entries: Vec<String>,
}

impl ErrorLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operator-visible error.
    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(error = %message, "cycle error recorded");
        self.entries.push(message);
    }

    /// Whether any error was recorded this cycle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The recorded entries, in order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Consume the ledger, yielding the entries for the csp-config write.
    #[must_use]
    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }
}
