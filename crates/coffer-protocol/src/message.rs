use std::fmt;

use serde::{Deserialize, Serialize};

use crate::table::{self, MessageSpec};

/// Which kind of object a message is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    Root,
    Repo,
    File,
    VersionReader,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Root, Scope::Repo, Scope::File, Scope::VersionReader];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Repo => "repo",
            Self::File => "file",
            Self::VersionReader => "versionReader",
        }
    }

    /// Whether messages of this scope target an object handle.
    pub const fn has_object(self) -> bool {
        !matches!(self, Self::Root)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declares the message enum of one scope from a single table.
///
/// Each line is `Variant = "wireName", args, optional`.
macro_rules! message_set {
    (
        $(#[$meta:meta])*
        $ty:ident in $scope:ident {
            $($variant:ident = $wire:literal, $args:expr, $optional:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $ty {
            $($variant,)*
        }

        impl $ty {
            pub const SCOPE: Scope = Scope::$scope;

            pub const ALL: &'static [$ty] = &[$($ty::$variant,)*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($wire => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub fn spec(self) -> MessageSpec {
                match self {
                    $(Self::$variant => MessageSpec {
                        name: $wire,
                        args: $args,
                        optional: $optional,
                    },)*
                }
            }
        }

        impl From<$ty> for MessageType {
            fn from(msg: $ty) -> Self {
                MessageType::$scope(msg)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

message_set! {
    /// Messages handled without a target object.
    RootMsg in Root {
        InitEnv = "initEnv", table::INIT_ENV, true;
        Version = "version", table::NO_ARGS, false;
        Exists = "exists", table::STRING, false;
        Destroy = "destroy", table::STRING, false;
        OpenRepo = "openRepo", table::OPEN_REPO, false;
        RepairSuperBlock = "repairSuperBlock", table::URI_AND_PWD, false;
    }
}

message_set! {
    /// Messages addressed to an open repository.
    RepoMsg in Repo {
        Close = "close", table::NO_ARGS, false;
        Info = "info", table::NO_ARGS, false;
        ResetPassword = "resetPassword", table::RESET_PASSWORD, false;
        PathExists = "pathExists", table::STRING, false;
        IsFile = "isFile", table::STRING, false;
        IsDir = "isDir", table::STRING, false;
        CreateFile = "createFile", table::STRING, false;
        OpenFile = "openFile", table::OPEN_FILE, false;
        CreateDir = "createDir", table::STRING, false;
        CreateDirAll = "createDirAll", table::STRING, false;
        ReadDir = "readDir", table::STRING, false;
        Metadata = "metadata", table::STRING, false;
        History = "history", table::STRING, false;
        Copy = "copy", table::FROM_TO, false;
        CopyDirAll = "copyDirAll", table::FROM_TO, false;
        RemoveFile = "removeFile", table::STRING, false;
        RemoveDir = "removeDir", table::STRING, false;
        RemoveDirAll = "removeDirAll", table::STRING, false;
        Rename = "rename", table::FROM_TO, false;
    }
}

message_set! {
    /// Messages addressed to an open file.
    FileMsg in File {
        Close = "close", table::NO_ARGS, false;
        Read = "read", table::BUFFER, false;
        ReadAll = "readAll", table::NO_ARGS, false;
        ReadAllString = "readAllString", table::NO_ARGS, false;
        Write = "write", table::STRING_OR_BUFFER, false;
        Finish = "finish", table::NO_ARGS, false;
        WriteOnce = "writeOnce", table::STRING_OR_BUFFER, false;
        Seek = "seek", table::SEEK, false;
        SetLen = "setLen", table::NUMBER, false;
        CurrVersion = "currVersion", table::NO_ARGS, false;
        Metadata = "metadata", table::NO_ARGS, false;
        History = "history", table::NO_ARGS, false;
        VersionReader = "versionReader", table::NUMBER, false;
    }
}

message_set! {
    /// Messages addressed to an open version reader.
    VersionReaderMsg in VersionReader {
        Close = "close", table::NO_ARGS, false;
        Version = "version", table::NO_ARGS, false;
        Read = "read", table::BUFFER, false;
        ReadAll = "readAll", table::NO_ARGS, false;
        ReadAllString = "readAllString", table::NO_ARGS, false;
        Seek = "seek", table::SEEK, false;
    }
}

/// Any message of any scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Root(RootMsg),
    Repo(RepoMsg),
    File(FileMsg),
    VersionReader(VersionReaderMsg),
}

impl MessageType {
    pub const fn scope(self) -> Scope {
        match self {
            Self::Root(_) => Scope::Root,
            Self::Repo(_) => Scope::Repo,
            Self::File(_) => Scope::File,
            Self::VersionReader(_) => Scope::VersionReader,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Root(m) => m.name(),
            Self::Repo(m) => m.name(),
            Self::File(m) => m.name(),
            Self::VersionReader(m) => m.name(),
        }
    }

    pub fn spec(self) -> MessageSpec {
        match self {
            Self::Root(m) => m.spec(),
            Self::Repo(m) => m.spec(),
            Self::File(m) => m.spec(),
            Self::VersionReader(m) => m.spec(),
        }
    }

    /// Look up a message by scope and wire name.
    pub fn parse(scope: Scope, name: &str) -> Option<Self> {
        match scope {
            Scope::Root => RootMsg::from_name(name).map(Self::Root),
            Scope::Repo => RepoMsg::from_name(name).map(Self::Repo),
            Scope::File => FileMsg::from_name(name).map(Self::File),
            Scope::VersionReader => VersionReaderMsg::from_name(name).map(Self::VersionReader),
        }
    }

    /// Every message of every scope, in table order.
    pub fn all() -> impl Iterator<Item = MessageType> {
        RootMsg::ALL
            .iter()
            .copied()
            .map(Self::from)
            .chain(RepoMsg::ALL.iter().copied().map(Self::from))
            .chain(FileMsg::ALL.iter().copied().map(Self::from))
            .chain(VersionReaderMsg::ALL.iter().copied().map(Self::from))
    }

    /// Whether the message closes the object it targets.
    pub const fn is_close(self) -> bool {
        matches!(
            self,
            Self::Repo(RepoMsg::Close)
                | Self::File(FileMsg::Close)
                | Self::VersionReader(VersionReaderMsg::Close)
        )
    }

    /// Whether the message's argument is a byte payload that is moved to
    /// the worker rather than copied.
    pub const fn carries_payload(self) -> bool {
        matches!(
            self,
            Self::File(FileMsg::Read | FileMsg::Write | FileMsg::WriteOnce)
                | Self::VersionReader(VersionReaderMsg::Read)
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope(), self.name())
    }
}
