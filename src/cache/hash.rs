//! Key hashing

/// Hash function used to pick a bucket
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &[u8]) -> u32;
}

/// Bob Jenkins' one-at-a-time hash
#[inline]
pub fn jenkins_one_at_a_time(key: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in key {
        h = h.wrapping_add(b as u32);
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h.wrapping_add(h << 15)
}

/// Default [`KeyHasher`]: [`jenkins_one_at_a_time`]
#[derive(Debug, Default, Clone, Copy)]
pub struct JenkinsHasher;

impl KeyHasher for JenkinsHasher {
    #[inline]
    fn hash(&self, key: &[u8]) -> u32 {
        jenkins_one_at_a_time(key)
    }
}
