//! Precomputed wire responses for common replies.
//!
//! Serializing OK / PONG / NULL / small integers dominates reply traffic, so
//! these are encoded once as static byte slices.

/// +OK\r\n
pub const OK: &[u8] = b"+OK\r\n";

/// +PONG\r\n
pub const PONG: &[u8] = b"+PONG\r\n";

/// $-1\r\n (null bulk string)
pub const NULL_BULK: &[u8] = b"$-1\r\n";

/// $0\r\n\r\n (empty bulk string)
pub const EMPTY_BULK: &[u8] = b"$0\r\n\r\n";

/// *0\r\n (empty array)
pub const EMPTY_ARRAY: &[u8] = b"*0\r\n";

/// Precomputed integer replies for -1..=10.
const INTEGERS: [&[u8]; 12] = [
    b":-1\r\n",
    b":0\r\n",
    b":1\r\n",
    b":2\r\n",
    b":3\r\n",
    b":4\r\n",
    b":5\r\n",
    b":6\r\n",
    b":7\r\n",
    b":8\r\n",
    b":9\r\n",
    b":10\r\n",
];

/// Look up a precomputed integer reply, if one exists.
#[inline]
pub fn integer(n: i64) -> Option<&'static [u8]> {
    if (-1..=10).contains(&n) {
        Some(INTEGERS[(n + 1) as usize])
    } else {
        None
    }
}
