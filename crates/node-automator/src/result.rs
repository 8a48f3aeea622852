//! Turns the outcome of a lifecycle call into a [`TaskResult`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::{error, info};

use crate::types::{Operation, TaskOutput, TaskResult};
use crate::{Error, ProviderName, Result};

/// Map an outcome onto the result envelope.
pub fn finish(provider: ProviderName, op: Operation, outcome: Result<TaskOutput>) -> TaskResult {
    match outcome {
        Ok(output) => {
            info!(%provider, operation = %op, "{op} finished successfully");
            TaskResult::success(output)
        }
        Err(e) => {
            error!(%provider, operation = %op, kind = e.kind(), error = %e, "{op} failed");
            TaskResult::failure(format!("{provider} {op} failed: {e}"))
        }
    }
}

/// Await a lifecycle step, catching panics so the caller always gets a result.
pub async fn guarded<F>(provider: ProviderName, op: Operation, step: F) -> TaskResult
where
    F: Future<Output = Result<TaskOutput>>,
{
    let outcome = match AssertUnwindSafe(step).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(Error::Unexpected(panic_message(payload.as_ref()))),
    };
    finish(provider, op, outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    #[test]
    fn errors_become_failures_with_context() {
        let result = finish(
            ProviderName::Joyent,
            Operation::Confirm,
            Err(Error::NoUsableAddress),
        );
        assert_eq!(result.status(), TaskStatus::Failure);
        assert_eq!(
            result.stderr(),
            Some("joyent confirm failed: no IP address available for bootstrapping")
        );
        assert!(result.output().is_none());
    }

    #[test]
    fn success_carries_output_only() {
        let result = finish(ProviderName::Hetzner, Operation::Delete, Ok(TaskOutput::default()));
        assert!(result.is_success());
        assert!(result.stderr().is_none());
        assert!(result.output().is_some());
    }

    async fn explode() -> Result<TaskOutput> {
        panic!("provider client exploded")
    }

    #[tokio::test]
    async fn panics_are_converted() {
        let result = guarded(ProviderName::Joyent, Operation::Create, explode()).await;
        assert_eq!(result.status(), TaskStatus::Failure);
        let stderr = result.stderr().unwrap();
        assert!(stderr.contains("unexpected error: provider client exploded"));
    }
}
