//! One verify task: run the primary check, fall back to reconcile on
//! anything but success, and always leave the exists record in a terminal
//! status. Per §7's propagation policy the worker never lets an error
//! escape — it converts it into FAILED plus a log line so the pool keeps
//! draining.

use iaudit_domain::InstanceExists;
use iaudit_store::Store;
use tracing::warn;

use crate::outcome::VerifyOutcome;
use crate::{reconcile, verify};

/// Returns `(verified, exists)` with `exists` already saved in its terminal
/// status.
pub async fn verify_one(store: &dyn Store, mut exists: InstanceExists) -> (bool, InstanceExists) {
    let primary = match verify::verify(store, &exists).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(instance_id = %exists.instance_id, error = %e, "verification failed");
            finish_failed(store, &mut exists, e.to_string()).await;
            return (false, exists);
        }
    };

    if primary.is_ok() {
        exists.mark_verified().expect("verifying -> verified is always a valid transition");
        let _ = store.save_instance_exists(&exists).await;
        return (true, exists);
    }

    match reconcile::verify_against_reconcile(store, &exists).await {
        Ok(VerifyOutcome::Ok) => {
            exists.mark_reconciled(primary.to_string()).expect("verifying -> reconciled is always a valid transition");
            let _ = store.save_instance_exists(&exists).await;
            (false, exists)
        }
        Ok(VerifyOutcome::NotFound(_)) => {
            finish_failed(store, &mut exists, primary.to_string()).await;
            (false, exists)
        }
        Ok(reconcile_outcome) => {
            finish_failed(store, &mut exists, reconcile_outcome.to_string()).await;
            (false, exists)
        }
        Err(e) => {
            warn!(instance_id = %exists.instance_id, error = %e, "reconcile check failed");
            finish_failed(store, &mut exists, e.to_string()).await;
            (false, exists)
        }
    }
}

async fn finish_failed(store: &dyn Store, exists: &mut InstanceExists, reason: String) {
    exists.mark_failed(reason).expect("verifying -> failed is always a valid transition");
    let _ = store.save_instance_exists(exists).await;
}
