/// mDNS/DNS-SD announcer (component N): registers `_equilibrium._tcp` on
/// startup so LAN clients can find the control plane without a fixed
/// address, deregisters on shutdown.
///
/// Grounded on `examples/other_examples/manifests/Hakolsound-MIDInet`'s use
/// of `mdns-sd`. Ambient network-presence behavior, not excluded by any
/// Non-goal.
use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::error::{Error, Result};

pub struct Announcer {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Announcer {
    /// `instance_name` is the configured device name; `service_type` is
    /// typically `"_equilibrium._tcp"`.
    pub fn start(service_type: &str, instance_name: &str, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Fatal(e.to_string()))?;

        let host_name = format!("{}.local.", hostname());
        let service = ServiceInfo::new(service_type, instance_name, &host_name, "", port, None::<std::collections::HashMap<String, String>>)
            .map_err(|e| Error::Fatal(e.to_string()))?
            .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        daemon.register(service).map_err(|e| Error::Fatal(e.to_string()))?;
        log::info!("announcing {instance_name} ({service_type}) on port {port}");

        Ok(Self { daemon, fullname })
    }

    pub fn stop(&self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            log::warn!("failed to deregister mDNS service: {e}");
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "equilibrium".to_string())
}
