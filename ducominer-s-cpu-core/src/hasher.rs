//! DUCO-S1 搜索循环

use crate::throttle::Throttle;
use ducominer_core::ducos1::{write_decimal, MAX_NONCE_DIGITS};
use ducominer_core::Job;
use sha1::{Digest, Sha1};
use std::time::{Duration, Instant};

/// 一次搜索的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOutcome {
    /// 找到的 nonce
    pub nonce: Option<u32>,
    /// 已检查的候选数量
    pub checked: u64,
    /// 搜索耗时
    pub elapsed: Duration,
}

/// 前缀状态复用：last_hash 只吸收一次，每个 nonce 克隆中间状态
pub fn search_prefix(job: &Job, throttle: &Throttle) -> SearchOutcome {
    let started = Instant::now();
    let expected = job.expected_digest();
    let mut prefix = Sha1::new();
    prefix.update(job.last_hash().as_bytes());

    let mut digits = [0u8; MAX_NONCE_DIGITS];
    for nonce in 0..=job.max_nonce() {
        let checked = nonce as u64;
        throttle.tick(checked);

        let mut hasher = prefix.clone();
        hasher.update(write_decimal(nonce, &mut digits));
        if hasher.finalize().as_slice() == expected.as_slice() {
            return SearchOutcome {
                nonce: Some(nonce),
                checked: checked + 1,
                elapsed: started.elapsed(),
            };
        }
    }

    SearchOutcome {
        nonce: None,
        checked: job.nonce_limit(),
        elapsed: started.elapsed(),
    }
}

/// 顺序实现：每个 nonce 重新拼接完整消息
pub fn search_sequential(job: &Job, throttle: &Throttle) -> SearchOutcome {
    let started = Instant::now();
    let expected = job.expected_digest();

    for nonce in 0..=job.max_nonce() {
        let checked = nonce as u64;
        throttle.tick(checked);

        let message = format!("{}{}", job.last_hash(), nonce);
        if Sha1::digest(message.as_bytes()).as_slice() == expected.as_slice() {
            return SearchOutcome {
                nonce: Some(nonce),
                checked: checked + 1,
                elapsed: started.elapsed(),
            };
        }
    }

    SearchOutcome {
        nonce: None,
        checked: job.nonce_limit(),
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ducominer_core::{candidate_digest, verify_nonce};

    fn job_with_solution(last_hash: &str, nonce: u32, difficulty: u64) -> Job {
        Job::new(last_hash, candidate_digest(last_hash, nonce), difficulty).unwrap()
    }

    #[test]
    fn test_both_loops_find_same_nonce() {
        let job = job_with_solution("e563cf9d9b1b1c7a7e1e08ec0ac8f9e6a1f3c1d2", 4321, 50);
        let throttle = Throttle::unthrottled();

        let fast = search_prefix(&job, &throttle);
        let slow = search_sequential(&job, &throttle);

        assert_eq!(fast.nonce, Some(4321));
        assert_eq!(slow.nonce, Some(4321));
        assert_eq!(fast.checked, 4322);
        assert!(verify_nonce(&job, 4321));
    }

    #[test]
    fn test_exhausted_search_checks_whole_range() {
        let job = Job::from_hex("test", ducominer_core::ducos1::UNSOLVABLE_DIGEST_HEX, 1).unwrap();
        let outcome = search_prefix(&job, &Throttle::unthrottled());
        assert_eq!(outcome.nonce, None);
        assert_eq!(outcome.checked, 101);
    }

    #[test]
    fn test_last_nonce_in_range_is_found() {
        let job = job_with_solution("abc", 300, 3);
        assert_eq!(search_sequential(&job, &Throttle::unthrottled()).nonce, Some(300));
    }
}
