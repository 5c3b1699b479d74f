//! Store key layout.
//!
//! These names are shared with other readers of the same store and must not
//! change shape.

use crate::rolling::WindowName;

/// Hot-tier content hash for one item.
pub fn memory(user: &str, item: &str) -> String {
    format!("memory:{user}:{item}")
}

/// Access-timestamp log for one item.
pub fn frequency(item: &str) -> String {
    format!("freq:{item}")
}

/// Content-addressed embedding for one pattern.
pub fn engram(n_gram: u32, head: u8, hash: &str) -> String {
    format!("engram:{n_gram}gram:h{head}:{hash}")
}

/// Single-frame context for a user.
pub fn context(user: &str) -> String {
    format!("context:{user}")
}

pub fn anticipated(user: &str) -> String {
    format!("anticipated:{user}")
}

/// Ranked attention set for a user.
pub fn attention(user: &str) -> String {
    format!("attention:{user}")
}

/// Rolling event log for one window of one user.
pub fn window(name: WindowName, user: &str) -> String {
    format!("attention:window:{}:{user}", name.as_str())
}

/// Who/what/when/where histories for a user.
pub fn four_w(user: &str) -> String {
    format!("attention:4w:{user}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(memory("u1", "m1"), "memory:u1:m1");
        assert_eq!(frequency("m1"), "freq:m1");
        assert_eq!(engram(3, 7, "abcd"), "engram:3gram:h7:abcd");
        assert_eq!(context("u1"), "context:u1");
        assert_eq!(anticipated("u1"), "anticipated:u1");
        assert_eq!(attention("u1"), "attention:u1");
        assert_eq!(window(WindowName::Medium, "u1"), "attention:window:medium:u1");
        assert_eq!(four_w("u1"), "attention:4w:u1");
    }
}
