//! Status codes, flag words and the protocol-state snapshot.
//!
//! Numeric values match the platform binding constants (`BINDSTATUS_*`,
//! `PI_*`, `BINDF_*`, `BSCF_*`) so they can cross into code that speaks the
//! same vocabulary unchanged.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A progress status code passed to [`ProtocolSink::report_progress`].
///
/// Kept as an open newtype rather than an enum: handlers may report codes
/// the proxy does not know, and the proxy must be able to see and reject them.
///
/// [`ProtocolSink::report_progress`]: crate::ProtocolSink::report_progress
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindStatus(pub u32);

impl BindStatus {
    pub const FINDING_RESOURCE: Self = Self(1);
    pub const CONNECTING: Self = Self(2);
    pub const REDIRECTING: Self = Self(3);
    pub const BEGIN_DOWNLOAD_DATA: Self = Self(4);
    pub const DOWNLOADING_DATA: Self = Self(5);
    pub const END_DOWNLOAD_DATA: Self = Self(6);
    pub const USING_CACHED_COPY: Self = Self(10);
    pub const SENDING_REQUEST: Self = Self(11);
    pub const CLASSID_AVAILABLE: Self = Self(12);
    pub const MIME_TYPE_AVAILABLE: Self = Self(13);
    pub const CACHE_FILENAME_AVAILABLE: Self = Self(14);
    pub const PROTOCOL_CLASSID: Self = Self(20);
    pub const ENCODING: Self = Self(21);
    pub const VERIFIED_MIME_TYPE_AVAILABLE: Self = Self(22);
    pub const DECODING: Self = Self(24);
    pub const DIRECT_BIND: Self = Self(30);
    pub const RAW_MIME_TYPE: Self = Self(31);
    pub const ACCEPT_RANGES: Self = Self(33);

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::FINDING_RESOURCE => "FINDINGRESOURCE",
            Self::CONNECTING => "CONNECTING",
            Self::REDIRECTING => "REDIRECTING",
            Self::BEGIN_DOWNLOAD_DATA => "BEGINDOWNLOADDATA",
            Self::DOWNLOADING_DATA => "DOWNLOADINGDATA",
            Self::END_DOWNLOAD_DATA => "ENDDOWNLOADDATA",
            Self::USING_CACHED_COPY => "USINGCACHEDCOPY",
            Self::SENDING_REQUEST => "SENDINGREQUEST",
            Self::CLASSID_AVAILABLE => "CLASSIDAVAILABLE",
            Self::MIME_TYPE_AVAILABLE => "MIMETYPEAVAILABLE",
            Self::CACHE_FILENAME_AVAILABLE => "CACHEFILENAMEAVAILABLE",
            Self::PROTOCOL_CLASSID => "PROTOCOLCLASSID",
            Self::ENCODING => "ENCODING",
            Self::VERIFIED_MIME_TYPE_AVAILABLE => "VERIFIEDMIMETYPEAVAILABLE",
            Self::DECODING => "DECODING",
            Self::DIRECT_BIND => "DIRECTBIND",
            Self::RAW_MIME_TYPE => "RAWMIMETYPE",
            Self::ACCEPT_RANGES => "ACCEPTRANGES",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for BindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "BindStatus({name})"),
            None => write!(f, "BindStatus({})", self.0),
        }
    }
}

impl fmt::Display for BindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

macro_rules! flag_word {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $flag:ident = $value:expr;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$cmeta])* pub const $flag: Self = Self($value);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_word! {
    /// Options passed to [`Protocol::start`](crate::Protocol::start).
    PiFlags {
        PARSE_URL = 0x0001;
        FILTER_MODE = 0x0002;
        FORCE_ASYNC = 0x0004;
        USE_WORKER_THREAD = 0x0008;
        MIME_VERIFICATION = 0x0010;
        CLSID_LOOKUP = 0x0020;
        DATA_PROGRESS = 0x0040;
        SYNCHRONOUS = 0x0080;
        /// Sink notifications must be delivered on the thread that created
        /// the proxy.
        APARTMENT_THREADED = 0x0100;
        CLASS_INSTALL = 0x0200;
        PASS_ON_BIND_CTX = 0x2000;
        NO_MIME_HANDLER = 0x8000;
        LOAD_APP_DIRECT = 0x4000;
    }
}

flag_word! {
    /// Binding flags returned from [`BindInfo::get_bind_info`](crate::BindInfo::get_bind_info).
    BindFlags {
        ASYNCHRONOUS = 0x0000_0001;
        ASYNC_STORAGE = 0x0000_0002;
        NO_PROGRESSIVE_RENDERING = 0x0000_0004;
        OFFLINE_OPERATION = 0x0000_0008;
        GET_NEW_EST_VERSION = 0x0000_0010;
        NO_WRITE_CACHE = 0x0000_0020;
        NEED_FILE = 0x0000_0040;
        PULL_DATA = 0x0000_0080;
        IGNORE_SECURITY_PROBLEM = 0x0000_0100;
        RESYNCHRONIZE = 0x0000_0200;
        HYPERLINK = 0x0000_0400;
        NO_UI = 0x0000_0800;
        SILENT_OPERATION = 0x0000_1000;
        PRAGMA_NO_CACHE = 0x0000_2000;
        GET_CLASS_OBJECT = 0x0000_4000;
        /// Set on every bind-info delivered through a [`BindingProxy`](crate::BindingProxy).
        FROM_URLMON = 0x0001_0000;
        FWD_BACK = 0x0002_0000;
        FORMS_SUBMIT = 0x0004_0000;
    }
}

flag_word! {
    /// Data-availability flags passed to [`ProtocolSink::report_data`](crate::ProtocolSink::report_data).
    BscFlags {
        FIRST_DATA_NOTIFICATION = 0x01;
        INTERMEDIATE_DATA_NOTIFICATION = 0x02;
        LAST_DATA_NOTIFICATION = 0x04;
        DATA_FULLY_AVAILABLE = 0x08;
        AVAILABLE_DATA_SIZE_UNKNOWN = 0x10;
    }
}

/// Selector for [`BindInfo::get_bind_string`](crate::BindInfo::get_bind_string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindStringKind(pub u32);

impl BindStringKind {
    pub const HEADERS: Self = Self(1);
    pub const ACCEPT_MIMES: Self = Self(2);
    pub const EXTRA_URL: Self = Self(3);
    pub const LANGUAGE: Self = Self(4);
    pub const USERNAME: Self = Self(5);
    pub const PASSWORD: Self = Self(6);
    pub const USER_AGENT: Self = Self(10);
    pub const ACCEPT_ENCODINGS: Self = Self(11);
    pub const POST_COOKIE: Self = Self(12);
    pub const POST_DATA_MIME: Self = Self(13);
    pub const URL: Self = Self(14);
}

/// Handler-private state handed out through `switch` and returned through
/// `continue_with` on the thread the consumer chooses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolData {
    pub flags: u32,
    pub state: u32,
    pub data: Vec<u8>,
}

impl ProtocolData {
    pub fn new(state: u32) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }
}
