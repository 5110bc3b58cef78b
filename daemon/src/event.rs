use crate::config::Config;
use crate::host::HostRequest;

pub enum DaemonEvent {
    /// Periodic poll signal from the ticker task.
    Tick,
    /// A request read from the host connection.
    Host(HostRequest),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received or the host asked us to stop.
    Shutdown,
}
