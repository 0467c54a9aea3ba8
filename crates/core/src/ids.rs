//! Identifier generators.
//!
//! Command ids are `cmd_<ms-since-epoch>_<4-char-base36>`; element ids are
//! minted by the perception engine as `a_<base36 counter>` or `e_<dom-id>`
//! using the [`base36`] helper here.

use rand::Rng;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Render `n` in lowercase base-36.
pub fn base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 alphabet is ascii")
}

/// New command id, unique within a session: millisecond timestamp plus a
/// 4-character random base-36 suffix.
pub fn command_id() -> String {
    let ms = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| BASE36[rng.gen_range(0..36)] as char)
        .collect();
    format!("cmd_{}_{}", ms, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_renders_known_values() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(1295), "zz");
    }

    #[test]
    fn command_id_shape() {
        let id = command_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "cmd");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn command_ids_do_not_collide_cheaply() {
        let a = command_id();
        let b = command_id();
        // Same millisecond is likely; the random suffix still separates them.
        assert_ne!(a, b);
    }
}
