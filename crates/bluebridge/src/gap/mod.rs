//! Generic Access Profile types shared by every layer
//!
//! Device addresses, advertising data and class-of-device filtering used by
//! discovery.

pub mod advertising;
pub mod constants;
pub mod types;


pub use advertising::{build_advertising_data, parse_advertising_data, AdvertisingData};
pub use constants::*;
pub use types::*;
