//! Demo job handlers.

use std::time::Duration;

use actors::{JobHandlerRegistry, job_handler};

/// Register the `echo`, `sleep` and `fail` handlers.
pub fn register_demo_handlers(registry: &JobHandlerRegistry) {
    registry.register(
        "echo",
        job_handler!(|job| {
            tracing::info!(job_id = %job.id, "Echo job: {}", job.payload);
            Ok(())
        }),
    );

    // Payload: {"seconds": 5}
    registry.register(
        "sleep",
        job_handler!(|job| {
            let seconds = job
                .payload
                .get("seconds")
                .and_then(|v| v.as_u64())
                .unwrap_or(5);
            tracing::info!(job_id = %job.id, "Sleeping for {} seconds", seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            Ok(())
        }),
    );

    // Payload: {"fail": false} to succeed; fails by default, for exercising retries
    registry.register(
        "fail",
        job_handler!(|job| {
            let should_fail = job
                .payload
                .get("fail")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if should_fail {
                Err("Intentional failure".to_string())
            } else {
                Ok(())
            }
        }),
    );
}
