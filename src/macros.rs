//! Declarative helpers for the protocol's closed tables (commands, versions, error codes).

/// Defines `CommandType` with its wire codes.
macro_rules! define_command_type {
    ($($name:ident = $code:literal),* $(,)?) => {
        /// Tuya LAN command codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum CommandType {
            $($name = $code),*
        }

        impl CommandType {
            /// Look up a command by its wire code.
            pub fn from_u32(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(CommandType::$name),)*
                    _ => None,
                }
            }

            /// Wire code of the command.
            pub fn code(self) -> u32 {
                self as u32
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(CommandType::$name => stringify!($name)),*
                }
            }
        }

        impl std::fmt::Display for CommandType {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}(0x{:02X})", self.name(), self.code())
            }
        }
    };
}

/// Defines `Version` and its string forms.
macro_rules! define_version {
    ($($name:ident = $text:literal),* $(,)?) => {
        /// Supported payload sub-protocols.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Version {
            $($name),*
        }

        impl Version {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Version::$name => $text),*
                }
            }

            pub fn as_bytes(&self) -> &'static [u8] {
                self.as_str().as_bytes()
            }
        }

        impl std::str::FromStr for Version {
            type Err = $crate::error::TuyaError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Version::$name),)*
                    other => Err($crate::error::TuyaError::UnsupportedVersion(other.to_string())),
                }
            }
        }

        impl std::fmt::Display for Version {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Defines numeric error code constants and `get_error_message`.
macro_rules! define_error_codes {
    ($($name:ident = $code:literal => $msg:literal),* $(,)?) => {
        $(pub const $name: u32 = $code;)*

        /// Human readable description of an error code.
        pub fn get_error_message(code: u32) -> &'static str {
            match code {
                $($code => $msg,)*
                _ => "Unknown Error",
            }
        }
    };
}
