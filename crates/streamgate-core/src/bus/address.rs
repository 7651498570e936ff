// Well-known bus addresses, header names and control payloads

/// Broadcast address every unit listens on for start commands.
pub const START_ADDRESS: &str = "streamgate.start";

/// Control payloads understood by the lifecycle runner.
pub const START: &str = "start";
pub const STOP: &str = "stop";

/// Present on the start broadcast sent once at process startup.
pub const HEADER_IS_STARTUP: &str = "startup";

/// Asks the auth broker to drop cached credentials and lift its login lock.
pub const HEADER_RESET_AUTH: &str = "auth-reset";

/// Where a dedup gate forwards an event it lets through. May repeat.
pub const HEADER_FINAL_DESTINATION: &str = "final-destination";

/// Per-unit stop address.
pub fn stop_address(unit_id: &str) -> String {
    format!("stop:{unit_id}")
}

/// Request/reply address of the auth broker for `provider`.
pub fn auth_address(provider: &str) -> String {
    format!("auth:{provider}")
}

/// Intake address of the dedup gate named `gate`.
pub fn dedup_address(gate: &str) -> String {
    format!("dedup:{gate}")
}
