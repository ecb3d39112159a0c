pub mod config;
pub mod crypto;
pub mod database;
pub mod discovery;
pub mod monitoring;
pub mod notify;
pub mod orchestrator;
pub mod pool;
pub mod remote;
pub mod snmp;
pub mod traps;
pub mod validation;
