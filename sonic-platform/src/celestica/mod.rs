//! Celestica platform API: DX010 (Seastone), E1031 (Haliburton) and
//! Questone2BD.

pub mod chassis;
pub mod fan;
pub mod psu;
pub mod questone2bd;
pub mod watchdog;

pub use chassis::Chassis;
pub use fan::{Fan, PsuFan};
pub use psu::Psu;
pub use questone2bd::Questone2bdPsu;
pub use watchdog::Watchdog;

/// E1031 system management controller attributes
pub(crate) const SMC_DIR: &str = "/sys/devices/platform/e1031.smc";
