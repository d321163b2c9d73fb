//! Alibaba AS13-32H and AS23-128H plugins. Both boards keep fan and
//! firmware inventory on a BMC.

pub mod fan_util;
pub mod fwmgr_util;
pub mod optic_temp_util;

pub use fan_util::BmcFanUtil;
pub use fwmgr_util::AlibabaFwMgrUtil;
pub use optic_temp_util::I2cOpticTempUtil;
