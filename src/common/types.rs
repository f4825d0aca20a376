/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Declares a Discord snowflake newtype.
///
/// Snowflakes travel as JSON strings, so the wrapper stays a `String` and only
/// parses when a numeric view is needed.
macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_u64(&self) -> Option<u64> {
                self.0.parse().ok()
            }
        }
    };
}

snowflake!(
    /// Guild (server) identifier.
    GuildId
);
snowflake!(
    /// Channel identifier.
    ChannelId
);
snowflake!(
    /// User identifier.
    UserId
);
snowflake!(
    /// Role identifier.
    RoleId
);

/// Connection lifecycle shared by both gateway families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Ready,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_serialize_as_plain_strings() {
        let id = GuildId::from("81384788765712384");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"81384788765712384\"");
        assert_eq!(id.as_u64(), Some(81384788765712384));

        let parsed: UserId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(parsed, UserId::from("42"));
    }
}
