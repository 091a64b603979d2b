//! DUCO-S1 OpenCL 内核
//!
//! 每个工作项检查一个 nonce。命中者通过 `atomic_cmpxchg(found_flag, 0, 1)`
//! 抢占写入 `found_nonce`；标志已置位时其余工作项直接返回。
//! 因此找到的是任意一个有效 nonce，而不一定是最小的。
//!
//! [`host_digest`] 在主机上按内核完全相同的填充与轮函数计算摘要，
//! 虚拟设备和一致性测试使用它。

use ducominer_core::types::DIGEST_LEN;

/// 内核函数名
pub const KERNEL_NAME: &str = "ducos1";

/// 内核消息缓冲区大小
pub const MESSAGE_CAPACITY: usize = 80;

/// 内核参数顺序: base_msg, base_len, start_nonce, nonce_count, expected, found_nonce, found_flag
pub const KERNEL_SOURCE: &str = r#"
#define ROTL32(x, n) (((x) << (n)) | ((x) >> (32 - (n))))

__kernel void ducos1(
    __global const uchar* base_msg,
    const uchar base_len,
    const uint start_nonce,
    const uint nonce_count,
    __global const uchar* expected,
    __global uint* found_nonce,
    __global int* found_flag)
{
    size_t gid = get_global_id(0);
    if (gid >= nonce_count)
        return;
    if (atomic_or(found_flag, 0) != 0)
        return;

    uint nonce = start_nonce + (uint)gid;

    uchar digits[10];
    uint value = nonce;
    uint digit_count = 0;
    do {
        digits[digit_count++] = (uchar)('0' + (value % 10));
        value /= 10;
    } while (value > 0 && digit_count < 10);

    uint msg_len = base_len + digit_count;
    uint total_blocks = (msg_len + 9 > 64) ? 2 : 1;
    uint length_index = total_blocks * 64 - 8;

    uchar padded[128];
    for (uint i = 0; i < 128; ++i)
        padded[i] = 0;
    for (uint i = 0; i < base_len; ++i)
        padded[i] = base_msg[i];
    for (uint i = 0; i < digit_count; ++i)
        padded[base_len + i] = digits[digit_count - 1 - i];
    padded[msg_len] = 0x80;

    ulong bit_len = ((ulong)msg_len) * 8;
    for (uint i = 0; i < 8; ++i)
        padded[length_index + i] = (uchar)((bit_len >> (56 - 8 * i)) & 0xFF);

    uint h[5] = {0x67452301, 0xEFCDAB89, 0x98BADCFE, 0x10325476, 0xC3D2E1F0};

    for (uint block = 0; block < total_blocks; ++block) {
        uint w[80];
        uint offset = block * 64;
        for (uint t = 0; t < 16; ++t) {
            uint idx = offset + t * 4;
            w[t] = ((uint)padded[idx] << 24) | ((uint)padded[idx + 1] << 16) |
                   ((uint)padded[idx + 2] << 8) | ((uint)padded[idx + 3]);
        }
        for (uint t = 16; t < 80; ++t)
            w[t] = ROTL32(w[t - 3] ^ w[t - 8] ^ w[t - 14] ^ w[t - 16], 1);

        uint a = h[0], b = h[1], c = h[2], d = h[3], e = h[4];
        for (uint t = 0; t < 80; ++t) {
            uint f, k;
            if (t < 20) {
                f = (b & c) | ((~b) & d);
                k = 0x5A827999;
            } else if (t < 40) {
                f = b ^ c ^ d;
                k = 0x6ED9EBA1;
            } else if (t < 60) {
                f = (b & c) | (b & d) | (c & d);
                k = 0x8F1BBCDC;
            } else {
                f = b ^ c ^ d;
                k = 0xCA62C1D6;
            }
            uint next = ROTL32(a, 5) + f + e + k + w[t];
            e = d;
            d = c;
            c = ROTL32(b, 30);
            b = a;
            a = next;
        }
        h[0] += a; h[1] += b; h[2] += c; h[3] += d; h[4] += e;
    }

    for (uint i = 0; i < 20; ++i) {
        uchar byte = (uchar)((h[i / 4] >> (24 - 8 * (i % 4))) & 0xFF);
        if (byte != expected[i])
            return;
    }

    if (atomic_cmpxchg(found_flag, 0, 1) == 0)
        found_nonce[0] = nonce;
}
"#;

const H_INIT: [u32; 5] = [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476, 0xC3D2_E1F0];

/// 按内核的单/双块填充计算 SHA1，消息不超过 [`MESSAGE_CAPACITY`]
pub fn host_digest(message: &[u8]) -> [u8; DIGEST_LEN] {
    debug_assert!(message.len() <= MESSAGE_CAPACITY);
    let msg_len = message.len();
    let total_blocks = if msg_len + 9 > 64 { 2 } else { 1 };
    let length_index = total_blocks * 64 - 8;

    let mut padded = [0u8; 128];
    padded[..msg_len].copy_from_slice(message);
    padded[msg_len] = 0x80;
    let bit_len = (msg_len as u64) * 8;
    padded[length_index..length_index + 8].copy_from_slice(&bit_len.to_be_bytes());

    let mut h = H_INIT;
    for block in padded[..total_blocks * 64].chunks_exact(64) {
        compress(&mut h, block);
    }

    let mut digest = [0u8; DIGEST_LEN];
    for (chunk, word) in digest.chunks_exact_mut(4).zip(h.iter()) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    digest
}

fn compress(h: &mut [u32; 5], block: &[u8]) {
    let mut w = [0u32; 80];
    for (t, bytes) in block.chunks_exact(4).enumerate() {
        w[t] = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    for t in 16..80 {
        w[t] = (w[t - 3] ^ w[t - 8] ^ w[t - 14] ^ w[t - 16]).rotate_left(1);
    }

    let [mut a, mut b, mut c, mut d, mut e] = *h;
    for (t, word) in w.iter().enumerate() {
        let (f, k) = match t {
            0..=19 => ((b & c) | (!b & d), 0x5A82_7999),
            20..=39 => (b ^ c ^ d, 0x6ED9_EBA1),
            40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1B_BCDC),
            _ => (b ^ c ^ d, 0xCA62_C1D6),
        };
        let next = a
            .rotate_left(5)
            .wrapping_add(f)
            .wrapping_add(e)
            .wrapping_add(k)
            .wrapping_add(*word);
        e = d;
        d = c;
        c = b.rotate_left(30);
        b = a;
        a = next;
    }

    h[0] = h[0].wrapping_add(a);
    h[1] = h[1].wrapping_add(b);
    h[2] = h[2].wrapping_add(c);
    h[3] = h[3].wrapping_add(d);
    h[4] = h[4].wrapping_add(e);
}
