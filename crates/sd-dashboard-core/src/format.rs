use alloy_primitives::Address;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// `0xD2Ce9C0B385fB2f8b0F1254933142dDd36a4f99f` -> `0xD2Ce...f99f`
pub fn short_address(address: &Address) -> String {
    let full = address.to_checksum(None);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

pub fn relative_time(observed_at_ms: u128, now_ms: u128) -> String {
    const MINUTE: u128 = 60_000;
    const HOUR: u128 = 60 * MINUTE;
    const DAY: u128 = 24 * HOUR;

    let elapsed = now_ms.saturating_sub(observed_at_ms);
    match elapsed {
        e if e < MINUTE => "Just now".to_owned(),
        e if e < HOUR => format!("{}m ago", e / MINUTE),
        e if e < DAY => format!("{}h ago", e / HOUR),
        e => format!("{}d ago", e / DAY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sd_contracts::SHADOW_TOKEN_ADDRESS;

    #[test]
    fn short_address_keeps_prefix_and_suffix() {
        assert_eq!(short_address(&SHADOW_TOKEN_ADDRESS), "0xD2Ce...f99f");
    }

    #[test]
    fn relative_time_buckets() {
        let now = 10 * 24 * 3_600_000;
        assert_eq!(relative_time(now - 59_000, now), "Just now");
        assert_eq!(relative_time(now - 5 * 60_000, now), "5m ago");
        assert_eq!(relative_time(now - 3 * 3_600_000, now), "3h ago");
        assert_eq!(relative_time(now - 2 * 24 * 3_600_000, now), "2d ago");
        assert_eq!(relative_time(now + 1_000, now), "Just now");
    }
}
