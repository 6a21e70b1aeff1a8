//! Network link providers
//!
//! The controller checks the link before every attempt; a link that is down is
//! not counted as a broker failure.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Reports whether the underlying network link is usable
pub trait LinkProvider: Send {
    fn is_link_up(&self) -> bool;
}

/// One provider shared by the controller and the publisher
impl<L: LinkProvider + Sync + ?Sized> LinkProvider for Arc<L> {
    fn is_link_up(&self) -> bool {
        (**self).is_link_up()
    }
}

/// Link that is always considered up, for hosts without a dedicated interface
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUp;

impl LinkProvider for AlwaysUp {
    fn is_link_up(&self) -> bool {
        true
    }
}

/// Link state read from the kernel's operstate of a network interface
#[derive(Debug, Clone)]
pub struct InterfaceLink {
    interface: String,
    operstate_path: PathBuf,
}

impl InterfaceLink {
    pub fn new(interface: impl Into<String>) -> Self {
        let interface = interface.into();
        let operstate_path = PathBuf::from(format!("/sys/class/net/{interface}/operstate"));
        Self {
            interface,
            operstate_path,
        }
    }

    /// Read operstate from an arbitrary file instead of sysfs
    pub fn with_operstate_path(interface: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            interface: interface.into(),
            operstate_path: path.into(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl LinkProvider for InterfaceLink {
    fn is_link_up(&self) -> bool {
        match std::fs::read_to_string(&self.operstate_path) {
            Ok(state) => state.trim() == "up",
            Err(e) => {
                debug!(interface = %self.interface, "Cannot read operstate: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_always_up() {
        assert!(AlwaysUp.is_link_up());
    }

    #[test]
    fn test_interface_link_reads_operstate() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "up").unwrap();
        let link = InterfaceLink::with_operstate_path("wlan0", file.path());
        assert!(link.is_link_up());
        assert_eq!(link.interface(), "wlan0");
    }

    #[test]
    fn test_interface_link_down_states() {
        for state in ["down", "dormant", "unknown", ""] {
            let mut file = NamedTempFile::new().unwrap();
            writeln!(file, "{state}").unwrap();
            let link = InterfaceLink::with_operstate_path("eth0", file.path());
            assert!(!link.is_link_up(), "state '{state}' must be down");
        }
    }

    #[test]
    fn test_shared_provider_reads_one_source() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "up").unwrap();
        let link: Arc<dyn LinkProvider + Sync> =
            Arc::new(InterfaceLink::with_operstate_path("wlan0", file.path()));
        let shared = link.clone();
        assert!(link.is_link_up());

        std::fs::write(file.path(), "down\n").unwrap();
        assert!(!shared.is_link_up());
        assert_eq!(Arc::strong_count(&link), 2);
    }

    #[test]
    fn test_missing_interface_is_down() {
        let link = InterfaceLink::new("definitely-not-an-interface0");
        assert!(!link.is_link_up());
    }
}
