//! Gas schedule: the protocol constants the executive consumes.

/// The subset of the gas schedule that drives transaction-level
/// accounting. Per-opcode costs live with the VM backend.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Intrinsic gas of a plain transaction.
    pub tx_gas: u64,
    /// Intrinsic gas of a contract-creating transaction.
    pub tx_create_gas: u64,
    /// Intrinsic gas per zero byte of transaction data.
    pub tx_data_zero_gas: u64,
    /// Intrinsic gas per non-zero byte of transaction data.
    pub tx_data_non_zero_gas: u64,
    /// Gas charged per byte of deployed contract code.
    pub create_data_gas: u64,
    /// Refund credited per self-destruct.
    pub suicide_refund_gas: u64,
    /// Refund credited per storage slot cleared.
    pub sstore_refund_gas: u64,
    /// Ceiling on deployed code size; deployments above it fail.
    pub max_code_size: usize,
    /// Whether an unaffordable code deposit consumes all gas instead of
    /// silently leaving the account code empty.
    pub exceptional_failed_code_deposit: bool,
}

impl Schedule {
    /// The launch-era schedule.
    pub fn frontier() -> Self {
        Self {
            tx_gas: 21_000,
            tx_create_gas: 21_000,
            tx_data_zero_gas: 4,
            tx_data_non_zero_gas: 68,
            create_data_gas: 200,
            suicide_refund_gas: 24_000,
            sstore_refund_gas: 15_000,
            max_code_size: usize::MAX,
            exceptional_failed_code_deposit: false,
        }
    }

    /// The homestead schedule: creation carries its surcharge and failed
    /// code deposits become exceptional.
    pub fn homestead() -> Self {
        Self {
            tx_create_gas: 53_000,
            exceptional_failed_code_deposit: true,
            ..Self::frontier()
        }
    }

    /// The EIP-158-era schedule, adding the deployed-code size ceiling.
    pub fn eip158() -> Self {
        Self { max_code_size: 0x6000, ..Self::homestead() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_schedules_layer() {
        let frontier = Schedule::frontier();
        assert_eq!(frontier.tx_create_gas, frontier.tx_gas);
        assert!(!frontier.exceptional_failed_code_deposit);

        let homestead = Schedule::homestead();
        assert_eq!(homestead.tx_create_gas, 53_000);
        assert!(homestead.exceptional_failed_code_deposit);
        assert_eq!(homestead.max_code_size, usize::MAX);

        let eip158 = Schedule::eip158();
        assert_eq!(eip158.max_code_size, 24_576);
    }
}
