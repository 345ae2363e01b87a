pub mod interface;
pub mod tls;

pub use interface::{append_zone_id, connect, ipv6_address_of, listen};
