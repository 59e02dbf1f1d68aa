//! Change detection over the hardware and virtual MIDI endpoints.

use autopatch_types::PortId;

/// Concatenated endpoint names. A change detector, not an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareFingerprint(String);

impl HardwareFingerprint {
    pub fn compute<'a>(ports: impl IntoIterator<Item = &'a PortId>) -> Self {
        let mut text = String::new();
        for port in ports {
            text.push_str(port.client());
            text.push(':');
            text.push_str(port.port());
            text.push('\n');
        }
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Remembers the fingerprint of the last full pass.
#[derive(Debug, Default)]
pub struct FingerprintGuard {
    last: Option<HardwareFingerprint>,
}

impl FingerprintGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a full pass is due. Forced passes always run; otherwise only
    /// a changed fingerprint does. The stored fingerprint is updated
    /// whenever this returns true.
    pub fn should_run_full(&mut self, current: HardwareFingerprint, force: bool) -> bool {
        if !force && self.last.as_ref() == Some(&current) {
            return false;
        }
        self.last = Some(current);
        true
    }

    /// Forget the stored fingerprint so the next check runs.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn print(names: &[&str]) -> HardwareFingerprint {
        let ids: Vec<PortId> = names.iter().map(|n| PortId::parse(n).unwrap()).collect();
        HardwareFingerprint::compute(&ids)
    }

    #[test]
    fn first_check_always_runs() {
        let mut guard = FingerprintGuard::new();
        assert!(guard.should_run_full(print(&["system:midi_capture_1"]), false));
        assert!(!guard.should_run_full(print(&["system:midi_capture_1"]), false));
    }

    #[test]
    fn change_or_force_runs() {
        let mut guard = FingerprintGuard::new();
        guard.should_run_full(print(&["a:x"]), false);
        assert!(guard.should_run_full(print(&["a:x"]), true));
        assert!(guard.should_run_full(print(&["a:x", "b:y"]), false));
        assert!(!guard.should_run_full(print(&["a:x", "b:y"]), false));
    }

    #[test]
    fn names_do_not_run_together() {
        assert_ne!(print(&["ab:c"]), print(&["a:bc"]));
        assert_ne!(print(&["a:b", "c:d"]), print(&["a:bc:d"]));
    }

    #[test]
    fn reset_forces_next_check() {
        let mut guard = FingerprintGuard::new();
        guard.should_run_full(print(&["a:x"]), false);
        guard.reset();
        assert!(guard.should_run_full(print(&["a:x"]), false));
    }
}
