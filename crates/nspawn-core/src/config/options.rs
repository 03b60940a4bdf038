//! Enumerated `systemd-nspawn` options.
//!
//! Each enum parses from the exact spelling the supervisor accepts and
//! renders back to it, so a parsed value can go straight onto the command line.

use std::{fmt, str::FromStr};

use crate::config::error::ConfigError;

macro_rules! option_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Name of the configuration field holding this option.
            pub const FIELD: &'static str = $field;

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ConfigError::InvalidValue {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

option_enum!(
    /// How the container journal is linked into the host.
    LinkJournal, "link_journal" {
        No => "no",
        Host => "host",
        TryHost => "try-host",
        Guest => "guest",
        TryGuest => "try-guest",
        Auto => "auto",
    }
);

option_enum!(
    /// Which parts of the root file system are backed by tmpfs.
    Volatile, "volatile" {
        Yes => "yes",
        State => "state",
        Overlay => "overlay",
        No => "no",
    }
);

option_enum!(
    Console, "console" {
        Interactive => "interactive",
        ReadOnly => "read-only",
        Passive => "passive",
        Pipe => "pipe",
    }
);

option_enum!(
    /// Handling of `/etc/resolv.conf` inside the container.
    ResolvConf, "resolv_conf" {
        Off => "off",
        CopyHost => "copy-host",
        CopyStatic => "copy-static",
        CopyUplink => "copy-uplink",
        CopyStub => "copy-stub",
        ReplaceHost => "replace-host",
        ReplaceStatic => "replace-static",
        ReplaceUplink => "replace-uplink",
        ReplaceStub => "replace-stub",
        BindHost => "bind-host",
        BindStatic => "bind-static",
        BindUplink => "bind-uplink",
        BindStub => "bind-stub",
        Delete => "delete",
        Auto => "auto",
    }
);

option_enum!(
    /// Format of a downloaded image.
    ImageKind, "image_download.type" {
        Tar => "tar",
        Raw => "raw",
    }
);

option_enum!(
    /// Verification applied to a downloaded image.
    Verify, "image_download.verify" {
        No => "no",
        Checksum => "checksum",
        Signature => "signature",
    }
);

impl Volatile {
    /// `true` if the host root may serve as the image in this mode.
    pub fn protects_root(&self) -> bool {
        matches!(self, Volatile::Yes | Volatile::State)
    }
}

/// Parse an optional option, treating an empty string as unset.
pub(crate) fn parse_opt<T>(raw: Option<&str>) -> Result<Option<T>, ConfigError>
where
    T: FromStr<Err = ConfigError>,
{
    match raw {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some),
    }
}
