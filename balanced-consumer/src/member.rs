use crate::types::MemberId;

/// Generate a stable member id for this process: `"<hostname>:<uuid>"`.
/// Unique with overwhelming probability across restarts; born once per
/// process lifetime and never regenerated.
pub fn generate_member_id() -> MemberId {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{host}:{}", uuid::Uuid::new_v4())
}

/// Milliseconds since the epoch, the unit `consumer_timeout_ms` is
/// expressed in.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_id_contains_colon_separated_uuid() {
        let id = generate_member_id();
        let (_, uuid_part) = id.rsplit_once(':').expect("member id has a colon");
        assert!(uuid::Uuid::parse_str(uuid_part).is_ok());
    }

    #[test]
    fn member_ids_are_unique() {
        assert_ne!(generate_member_id(), generate_member_id());
    }
}
