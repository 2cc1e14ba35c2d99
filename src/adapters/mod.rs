//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter       | Implements                 | Connects to                 |
//! |---------------|----------------------------|-----------------------------|
//! | `hardware`    | InputSource, OutputDriver  | any `embedded-hal` pins     |
//! | `gpio`        | `embedded-hal` digital     | Linux `/sys/class/gpio`     |
//! | `simulated`   | InputSource, OutputDriver  | keyboard holds, memory      |
//! | `fs_store`    | SessionStore               | data directory              |
//! | `log_sink`    | EventSink                  | `log` facade                |
//! | `console_log` | `log::Log`                 | stderr + capture channel    |
//! | `console`     | (command producer)         | stdin                       |
//! | `time`        | (clock)                    | `std::time::Instant`        |

pub mod console;
pub mod console_log;
pub mod fs_store;
#[cfg(feature = "gpio-sysfs")]
pub mod gpio;
pub mod hardware;
pub mod log_sink;
pub mod simulated;
pub mod time;

use log::{info, warn};

use crate::config::DeviceConfig;

/// The IO variant chosen at startup.
pub enum IoVariant {
    #[cfg(feature = "gpio-sysfs")]
    Hardware(hardware::HardwareIo<gpio::SysfsPin, gpio::SysfsPin>),
    Simulated(simulated::SimulatedIo),
}

impl IoVariant {
    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }
}

/// Open the hardware variant unless simulation is forced; any hardware
/// failure falls back to simulation with a warning.
pub fn select(device: &DeviceConfig) -> IoVariant {
    if device.force_simulation {
        info!("IO: simulation forced by config");
        return IoVariant::Simulated(simulated::open());
    }

    #[cfg(feature = "gpio-sysfs")]
    match gpio::open(gpio::SYSFS_ROOT, &device.pins, device.debounce_us()) {
        Ok(hw) => {
            info!("IO: hardware (sysfs GPIO)");
            return IoVariant::Hardware(hw);
        }
        Err(e) => warn!("IO: {}, falling back to keyboard simulation", e),
    }

    #[cfg(not(feature = "gpio-sysfs"))]
    warn!("IO: built without a GPIO backend, using keyboard simulation");

    IoVariant::Simulated(simulated::open())
}
