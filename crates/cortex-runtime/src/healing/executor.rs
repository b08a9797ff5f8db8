use std::process::Command;
use std::time::{Duration, Instant};

/// Runs one runbook step's argv with a timeout. Implementations never
/// panic; failures come back as strings for the audit trail.
pub trait StepRunner: Send + Sync {
    fn run(&self, argv: &[String], timeout_ms: u64) -> std::result::Result<(), String>;
}

/// Default runner: spawns the argv directly (no shell) and polls for
/// completion. A timeout kills the child and counts as step failure.
pub struct SubprocessRunner;

impl StepRunner for SubprocessRunner {
    fn run(&self, argv: &[String], timeout_ms: u64) -> std::result::Result<(), String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "empty argv".to_string())?;
        let mut child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| format!("spawn {}: {}", program, e))?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => return Err(format!("{} exited with {}", program, status)),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(format!("{} timed out after {} ms", program, timeout_ms));
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => return Err(format!("wait on {}: {}", program, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_command() {
        let runner = SubprocessRunner;
        assert!(runner.run(&["true".to_string()], 5_000).is_ok());
    }

    #[test]
    fn test_failing_command() {
        let runner = SubprocessRunner;
        let result = runner.run(&["false".to_string()], 5_000);
        assert!(result.is_err());
    }

    #[test]
    fn test_timeout_kills_child() {
        let runner = SubprocessRunner;
        let start = Instant::now();
        let result = runner.run(&["sleep".to_string(), "10".to_string()], 200);
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(result.unwrap_err().contains("timed out"));
    }

    #[test]
    fn test_missing_program() {
        let runner = SubprocessRunner;
        assert!(runner
            .run(&["definitely-not-a-real-binary".to_string()], 1_000)
            .is_err());
    }
}
