/// Permission level bound to an authenticated principal.
///
/// `None` is never stored; it is the result of an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    None,
    ReadOnly,
    ReadWrite,
    Admin,
}

impl Role {
    /// Parses a persisted role name. Unknown names degrade to read-only.
    pub fn parse(name: &str) -> Role {
        match name {
            "admin" => Role::Admin,
            "read_write" => Role::ReadWrite,
            _ => Role::ReadOnly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::None => "none",
            Role::ReadOnly => "read_only",
            Role::ReadWrite => "read_write",
            Role::Admin => "admin",
        }
    }
}

/// DJB2 hash of an API key, rendered as a decimal string.
///
/// Non-cryptographic by protocol: the persisted `_auth` records carry this
/// form, so changing it would be an on-disk migration.
pub fn hash_key(key: &str) -> String {
    let mut hash: u64 = 5381;
    for byte in key.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
    }
    hash.to_string()
}

/// Role/action authorization matrix.
///
/// Any authenticated principal may `exit`; admin-only maintenance actions
/// fall through to the `Admin` arm.
pub fn has_permission(role: Role, action: &str) -> bool {
    match role {
        Role::Admin => true,
        Role::ReadWrite => matches!(
            action,
            "insert" | "update" | "delete" | "upsert" | "find" | "count" | "exit"
        ),
        Role::ReadOnly => matches!(action, "find" | "count" | "exit"),
        Role::None => false,
    }
}
