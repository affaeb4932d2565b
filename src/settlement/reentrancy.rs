use super::errors::EngineError;

/// Per-call guard for state-mutating entry points.
///
/// The surrounding ledger serializes calls, but a value transfer attached to
/// a call can trigger a nested call back into the engine before the outer
/// one returns. The guard turns any such nested entry into a hard rejection:
/// the flag is set on entry and cleared on exit, success or failure.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: bool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the engine entered. Fails if a call is already in progress.
    pub fn enter(&mut self) -> Result<(), EngineError> {
        if self.entered {
            return Err(EngineError::ReentrantCall);
        }
        self.entered = true;
        Ok(())
    }

    /// Clear the flag when the outermost call returns.
    pub fn exit(&mut self) {
        self.entered = false;
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_entry_rejected() {
        let mut guard = ReentrancyGuard::new();
        guard.enter().unwrap();
        assert_eq!(guard.enter(), Err(EngineError::ReentrantCall));
    }

    #[test]
    fn test_exit_reopens_the_guard() {
        let mut guard = ReentrancyGuard::new();
        guard.enter().unwrap();
        guard.exit();
        assert!(guard.enter().is_ok());
    }

    #[test]
    fn test_fresh_guard_is_open() {
        let guard = ReentrancyGuard::new();
        assert!(!guard.is_entered());
    }
}
