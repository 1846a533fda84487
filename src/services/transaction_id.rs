use chrono::Utc;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

const RANDOM_SUFFIX_LEN: usize = 20;

/// Issues the idempotency key shared by an order, its payment and every
/// gateway callback for it. Implementations must not perform I/O.
pub trait TransactionIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `txn_{unix_millis}_{20 alphanumerics from the OS CSPRNG}`
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTransactionIdGenerator;

impl TransactionIdGenerator for RandomTransactionIdGenerator {
    fn generate(&self) -> String {
        let suffix: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(char::from)
            .collect();

        format!("txn_{}_{}", Utc::now().timestamp_millis(), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn format_has_timestamp_and_random_suffix() {
        let id = RandomTransactionIdGenerator.generate();
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "txn");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), RANDOM_SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn ids_do_not_collide_within_a_burst() {
        let generator = RandomTransactionIdGenerator;
        let ids: HashSet<String> = (0..10_000).map(|_| generator.generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
