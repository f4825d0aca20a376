//! Effective channel permission checks for the bot member.

use super::models::{BaseGuild, Channel, GuildMember, OverwriteKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Permission {
    ViewChannel = 1 << 10,
    Connect = 1 << 20,
    Speak = 1 << 21,
}

impl Permission {
    pub fn bits(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Unset,
    Allow,
    Deny,
}

/// Resolves `permission` for `member` in `channel`.
///
/// Channel overwrites take precedence: the first matching allow wins, a
/// matching deny otherwise denies. Without a matching overwrite the guild
/// permission bitset decides.
pub fn has_permission(
    member: &GuildMember,
    guild: &BaseGuild,
    channel: &Channel,
    permission: Permission,
) -> bool {
    match channel_permission(member, guild, channel, permission) {
        Value::Unset => guild_permission(guild, permission) == Value::Allow,
        value => value == Value::Allow,
    }
}

fn guild_permission(guild: &BaseGuild, permission: Permission) -> Value {
    match guild.permissions.as_deref() {
        Some(bits) if check(bits, permission) => Value::Allow,
        Some(_) => Value::Deny,
        None => Value::Unset,
    }
}

fn channel_permission(
    member: &GuildMember,
    guild: &BaseGuild,
    channel: &Channel,
    permission: Permission,
) -> Value {
    // The @everyone role shares its id with the guild.
    let everyone = channel
        .guild_id
        .as_ref()
        .map_or(guild.id.as_str(), |id| id.as_str());
    let user_id = member.user.as_ref().map(|u| u.id.as_str());

    let mut denied = false;
    for overwrite in &channel.permission_overwrites {
        let applies = match overwrite.kind {
            OverwriteKind::Role => {
                overwrite.id == everyone || member.roles.iter().any(|r| r.as_str() == overwrite.id)
            }
            OverwriteKind::Member => user_id == Some(overwrite.id.as_str()),
            OverwriteKind::Unknown(_) => false,
        };
        if !applies {
            continue;
        }
        if check(&overwrite.allow, permission) {
            return Value::Allow;
        }
        if check(&overwrite.deny, permission) {
            denied = true;
        }
    }

    if denied { Value::Deny } else { Value::Unset }
}

fn check(bits: &str, permission: Permission) -> bool {
    let mask = permission.bits();
    bits.parse::<u64>().map(|b| b & mask == mask).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::models::{Overwrite, User};

    fn guild(permissions: Option<u64>) -> BaseGuild {
        BaseGuild {
            id: "100".into(),
            name: "guild".into(),
            icon: None,
            permissions: permissions.map(|p| p.to_string()),
        }
    }

    fn member(roles: &[&str]) -> GuildMember {
        GuildMember {
            user: Some(User {
                id: "7".into(),
                username: "bot".into(),
                avatar: None,
                bot: true,
            }),
            roles: roles.iter().map(|r| (*r).into()).collect(),
        }
    }

    fn channel(overwrites: Vec<Overwrite>) -> Channel {
        Channel {
            id: "200".into(),
            kind: 2,
            guild_id: Some("100".into()),
            position: 0,
            name: Some("voice".into()),
            bitrate: Some(64_000),
            permission_overwrites: overwrites,
        }
    }

    fn overwrite(id: &str, kind: OverwriteKind, allow: u64, deny: u64) -> Overwrite {
        Overwrite {
            id: id.into(),
            kind,
            allow: allow.to_string(),
            deny: deny.to_string(),
        }
    }

    const CONNECT: u64 = 1 << 20;

    #[test]
    fn guild_bitset_decides_without_overwrites() {
        let c = channel(vec![]);
        assert!(has_permission(&member(&[]), &guild(Some(CONNECT)), &c, Permission::Connect));
        assert!(!has_permission(&member(&[]), &guild(Some(0)), &c, Permission::Connect));
        assert!(!has_permission(&member(&[]), &guild(None), &c, Permission::Connect));
    }

    #[test]
    fn everyone_deny_overrides_guild_allow() {
        let c = channel(vec![overwrite("100", OverwriteKind::Role, 0, CONNECT)]);
        assert!(!has_permission(&member(&[]), &guild(Some(CONNECT)), &c, Permission::Connect));
    }

    #[test]
    fn role_allow_wins_over_everyone_deny() {
        let c = channel(vec![
            overwrite("100", OverwriteKind::Role, 0, CONNECT),
            overwrite("55", OverwriteKind::Role, CONNECT, 0),
        ]);
        assert!(has_permission(&member(&["55"]), &guild(Some(0)), &c, Permission::Connect));
        assert!(!has_permission(&member(&["56"]), &guild(Some(0)), &c, Permission::Connect));
    }

    #[test]
    fn member_overwrite_matches_user_id() {
        let c = channel(vec![overwrite("7", OverwriteKind::Member, CONNECT, 0)]);
        assert!(has_permission(&member(&[]), &guild(None), &c, Permission::Connect));

        let other = channel(vec![overwrite("8", OverwriteKind::Member, CONNECT, 0)]);
        assert!(!has_permission(&member(&[]), &guild(None), &other, Permission::Connect));
    }

    #[test]
    fn unrelated_bits_do_not_match() {
        let c = channel(vec![overwrite("100", OverwriteKind::Role, 1 << 10, 0)]);
        assert!(!has_permission(&member(&[]), &guild(Some(0)), &c, Permission::Speak));
        assert!(has_permission(&member(&[]), &guild(Some(0)), &c, Permission::ViewChannel));
    }
}
