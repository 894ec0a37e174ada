//! JID and phone number helpers

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// Keep only ASCII digits
pub fn digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Turn a phone number or JID into a JID. Returns None for inputs without digits.
pub fn to_jid(recipient: &str) -> Option<String> {
    let recipient = recipient.trim();
    if recipient.contains('@') {
        return Some(recipient.to_string());
    }
    let number = digits(recipient);
    if number.is_empty() {
        None
    } else {
        Some(format!("{}@{}", number, USER_SERVER))
    }
}

/// User part of a JID with any device suffix removed (`5511:3@s.whatsapp.net` -> `5511`)
pub fn user_part(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user)
}

/// E.164 phone number for a user JID, None for groups and other servers
pub fn jid_to_phone(jid: &str) -> Option<String> {
    if !jid.ends_with(USER_SERVER) {
        return None;
    }
    let number = digits(user_part(jid));
    if number.is_empty() {
        None
    } else {
        Some(format!("+{}", number))
    }
}

pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SERVER)
}

/// Compare two device JIDs ignoring the device index
pub fn same_account(a: &str, b: &str) -> bool {
    user_part(a) == user_part(b) && !user_part(a).is_empty()
}
