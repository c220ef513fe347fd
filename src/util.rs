use rand::distr::{Alphanumeric, SampleString};

/// A random alphanumeric identifier, used for replication ids (40 chars)
/// and subscription ids (32 chars).
pub fn random_id(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), len)
}
