pub mod auth;
pub mod file;
pub mod group;
pub mod message;

/// Seconds since epoch; the timestamp written into every row.
pub(crate) fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Opaque 128-bit identifier, 32 lowercase hex chars. Used for group and
/// file ids.
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_128_bit_hex() {
        let id = generate_id();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(generate_id(), generate_id());
    }
}
