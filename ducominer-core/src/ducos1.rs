//! DUCO-S1 参考校验
//!
//! 候选消息为 `last_hash` 的 ASCII 字节后接 nonce 的十进制表示，
//! 其 SHA1 摘要等于任务目标摘要时 nonce 有效。

use crate::error::CoreError;
use crate::types::{Job, DIGEST_LEN};
use sha1::{Digest, Sha1};

/// 自检向量前缀，nonce 0 对应消息 "test0"
pub const SELF_TEST_LAST_HASH: &str = "test";

/// 自检目标摘要 SHA1("test0")
pub const SELF_TEST_DIGEST_HEX: &str = "9b4bf5cdb7381fe38284a05d44d0631cf253c095";

/// SHA1("test")，不对应任何 nonce，可用作无解任务
pub const UNSOLVABLE_DIGEST_HEX: &str = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";

/// u32 十进制表示的最大位数
pub const MAX_NONCE_DIGITS: usize = 10;

/// 将 nonce 写成十进制 ASCII，不分配堆内存
pub fn write_decimal(mut nonce: u32, buf: &mut [u8; MAX_NONCE_DIGITS]) -> &[u8] {
    let mut pos = MAX_NONCE_DIGITS;
    loop {
        pos -= 1;
        buf[pos] = b'0' + (nonce % 10) as u8;
        nonce /= 10;
        if nonce == 0 {
            break;
        }
    }
    &buf[pos..]
}

/// 计算候选消息的摘要
pub fn candidate_digest(last_hash: &str, nonce: u32) -> [u8; DIGEST_LEN] {
    let mut digits = [0u8; MAX_NONCE_DIGITS];
    let mut hasher = Sha1::new();
    hasher.update(last_hash.as_bytes());
    hasher.update(write_decimal(nonce, &mut digits));
    hasher.finalize().into()
}

/// 校验 nonce 是否满足任务
pub fn verify_nonce(job: &Job, nonce: u32) -> bool {
    nonce <= job.max_nonce() && candidate_digest(job.last_hash(), nonce) == *job.expected_digest()
}

/// 解析 40 位十六进制摘要
pub fn decode_digest(hex_digest: &str) -> Result<[u8; DIGEST_LEN], CoreError> {
    let bytes = hex::decode(hex_digest.trim())
        .map_err(|e| CoreError::invalid_job(format!("摘要不是有效的十六进制: {}", e)))?;
    bytes
        .try_into()
        .map_err(|raw: Vec<u8>| CoreError::invalid_job(format!("摘要长度为 {} 字节，应为 {}", raw.len(), DIGEST_LEN)))
}

/// 自检任务: 难度 1，唯一解为 nonce 0
pub fn self_test_job() -> Result<Job, CoreError> {
    Job::from_hex(SELF_TEST_LAST_HASH, SELF_TEST_DIGEST_HEX, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_decimal() {
        let mut buf = [0u8; MAX_NONCE_DIGITS];
        assert_eq!(write_decimal(0, &mut buf), b"0");
        assert_eq!(write_decimal(42, &mut buf), b"42");
        assert_eq!(write_decimal(u32::MAX, &mut buf), b"4294967295");
    }

    #[test]
    fn test_candidate_matches_sha1_of_concatenation() {
        let mut hasher = Sha1::new();
        hasher.update(b"abc123");
        let expected: [u8; DIGEST_LEN] = hasher.finalize().into();
        assert_eq!(candidate_digest("abc", 123), expected);
    }

    #[test]
    fn test_self_test_vector() {
        let job = self_test_job().unwrap();
        assert!(verify_nonce(&job, 0), "nonce 0 应该通过自检");
        assert!(!verify_nonce(&job, 1));
        assert!(!verify_nonce(&job, 1000), "超出范围的 nonce 应该被拒绝");
    }

    #[test]
    fn test_bare_prefix_digest_has_no_nonce() {
        let job = Job::from_hex(SELF_TEST_LAST_HASH, UNSOLVABLE_DIGEST_HEX, 1).unwrap();
        assert!((0..=job.max_nonce()).all(|nonce| !verify_nonce(&job, nonce)));
    }

    #[test]
    fn test_decode_digest_lengths() {
        assert!(decode_digest(SELF_TEST_DIGEST_HEX).is_ok());
        assert!(decode_digest("").is_err());
        assert!(decode_digest(&"ab".repeat(21)).is_err());
    }
}
