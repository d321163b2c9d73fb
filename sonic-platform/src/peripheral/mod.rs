//! Peripheral chip drivers.
//!
//! Drivers for the non-switching chips found on the supported boards: the
//! EMC2305 fan controller, PMBus power supplies, SFP/QSFP optics and FRU
//! EEPROMs. Drivers talk to hardware only through `hw_trait`.

pub mod emc2305;
pub mod fru;
pub mod pmbus;
pub mod sff;
