//! Environment-driven configuration
//!
//! Kept in its own test binary: it is the only test that touches the
//! process environment.

use ipam::IpamError;
use ipam::config::{IpamConfig, MAX_RETRIES_ENV};

#[test]
fn test_from_env_reads_max_retries() {
    unsafe {
        std::env::remove_var(MAX_RETRIES_ENV);
    }
    assert_eq!(IpamConfig::from_env().unwrap(), IpamConfig::default());

    unsafe {
        std::env::set_var(MAX_RETRIES_ENV, "4");
    }
    assert_eq!(IpamConfig::from_env().unwrap().max_retries, 4);

    unsafe {
        std::env::set_var(MAX_RETRIES_ENV, "0");
    }
    assert!(matches!(IpamConfig::from_env(), Err(IpamError::InvalidConfig(_))));

    unsafe {
        std::env::remove_var(MAX_RETRIES_ENV);
    }
}
