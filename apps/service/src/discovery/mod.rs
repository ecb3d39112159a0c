/// Discovery engine
///
/// Sweeps address ranges for live hosts (ARP, then ICMP, then a common-port
/// sweep) and characterises each one: reverse DNS, MAC vendor, open
/// capability ports and SNMP sysDescr. Results are kept in memory only and
/// replaced wholesale by the next scan.
pub mod liveness;
pub mod scanner;
pub mod state;
pub mod targets;
pub mod vendor;

pub use scanner::{DiscoveryScanner, HostProbe, NetworkHostProbe, SCAN_SUBNETS_SETTING, ScanError};
pub use state::{DiscoveredHost, LivenessMethod, ScanState, ScanStatus};
pub use vendor::{OuiTable, VendorLookup};
