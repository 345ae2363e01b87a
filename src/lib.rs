pub mod archive;
pub mod chunked;
pub mod client;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod logging;
pub mod magic;
pub mod net;
pub mod report;
pub mod server;

pub use error::{AirDropError, AirDropResult};
pub use identity::Identity;

/// Bit flags advertised in the mDNS `flags` TXT record.
///
/// Reverse-engineered from macOS `sharingd`; most bits are opaque to this
/// implementation and only `SUPPORTS_DISCOVER_MAYBE` is acted on directly.
pub mod flags {
    pub const SUPPORTS_URL: u32 = 0x001;
    pub const SUPPORTS_DVZIP: u32 = 0x002;
    pub const SUPPORTS_PIPELINING: u32 = 0x004;
    pub const SUPPORTS_MIXED_TYPES: u32 = 0x008;
    pub const SUPPORTS_UNKNOWN1: u32 = 0x010;
    pub const SUPPORTS_UNKNOWN2: u32 = 0x020;
    pub const SUPPORTS_IRIS: u32 = 0x040;
    pub const SUPPORTS_DISCOVER_MAYBE: u32 = 0x080;
    pub const SUPPORTS_UNKNOWN3: u32 = 0x100;
    pub const SUPPORTS_ASSET_BUNDLE: u32 = 0x200;
}
