use chrono::NaiveTime;

use super::StaffRole;

const GREETING: &str = "OM NAMO VENKATESAYA!";
const FOOTER: &str = "[SVSD COMMAND CENTER]";
const MANUAL_LINK_BASE: &str = "https://api.whatsapp.com/send";

/// Strip everything but ASCII digits from a phone number.
pub fn normalize_recipient(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Canonical alert text. This, not the raw input, is what gets sent or linked.
pub fn compose(role: StaffRole, body: &str, at: NaiveTime) -> String {
    format!(
        "{GREETING}\n\nTime: {}\nRole: {}\nAlert: {}\n\n{FOOTER}",
        at.format("%I:%M %p"),
        role,
        body
    )
}

/// Deep link that opens the messaging client pre-filled with recipient and envelope.
pub fn manual_link(recipient: &str, envelope: &str) -> String {
    format!(
        "{MANUAL_LINK_BASE}?phone={}&text={}",
        recipient,
        urlencoding::encode(envelope)
    )
}

pub fn sms_uri(recipient: &str, envelope: &str) -> String {
    format!("sms:{}?body={}", recipient, urlencoding::encode(envelope))
}
