//! Adapter health snapshots

use crate::session::Session;
use common::Result;
use protocol::HealthStatus;
use std::fmt::Write;

impl Session {
    /// Read a health snapshot; one control round-trip, nothing buffered
    pub fn health(&mut self) -> Result<HealthStatus> {
        self.control().get_health()
    }
}

/// Human-readable multi-line rendering of a health snapshot
pub fn format_health(health: &HealthStatus) -> String {
    let flags = [
        ("started", health.started),
        ("controls allowed", health.controls_allowed),
        ("gas interceptor", health.gas_interceptor_detected),
        ("started signal", health.started_signal_detected),
        ("started (alt)", health.started_alt),
    ];

    let mut out = format!(
        "voltage: {:.3} V\ncurrent: {} mA\n",
        health.voltage_volts(),
        health.current
    );
    for (name, set) in flags {
        let _ = writeln!(out, "{}: {}", name, if set { "yes" } else { "no" });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClaimTable, DeviceRegistry};
    use common::test_utils::MockBackend;

    #[test]
    fn test_health_is_read_fresh_each_time() {
        let backend = MockBackend::with_adapters(1);
        let adapter = backend.adapters()[0].clone();
        let registry = DeviceRegistry::with_claims(backend, ClaimTable::new());
        let mut session = registry.open("").unwrap();

        assert_eq!(session.health().unwrap().voltage, 12_000);
        adapter.state().health.controls_allowed = true;
        adapter.state().health.voltage = 11_800;

        let health = session.health().unwrap();
        assert!(health.controls_allowed);
        assert_eq!(health.voltage, 11_800);
    }

    #[test]
    fn test_format_health() {
        let health = HealthStatus {
            voltage: 12_345,
            current: 210,
            started: true,
            ..HealthStatus::default()
        };
        let text = format_health(&health);
        assert!(text.contains("voltage: 12.345 V"));
        assert!(text.contains("current: 210 mA"));
        assert!(text.contains("started: yes"));
        assert!(text.contains("controls allowed: no"));
    }
}
