use sha2::{Digest, Sha256};

/// One send attempt's payload: recipient phone plus rendered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTask {
    pub phone: String,
    pub body: String,
    pub body_hash: String,
}

impl SendTask {
    pub fn new(phone: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let body_hash = body_digest(&body);
        Self {
            phone: phone.into(),
            body,
            body_hash,
        }
    }
}

/// SHA-256 of the exact rendered body, hex encoded.
pub fn body_digest(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_hash_is_stable() {
        let a = SendTask::new("0700000001", "Hello Amina");
        let b = SendTask::new("0700000002", "Hello Amina");
        assert_eq!(a.body_hash, b.body_hash);
        assert_eq!(a.body_hash.len(), 64);
        assert_ne!(a.body_hash, body_digest("Hello amina"));
    }
}
