//! Retries the same field comparisons against `InstanceReconcile` — the
//! fallback path taken whenever the primary verification path doesn't
//! succeed (§4.H "On any VerificationException from the primary path...").

use iaudit_domain::{date_equals_second, second_window, InstanceExists};
use iaudit_store::Store;

use crate::error::VerifyError;
use crate::outcome::VerifyOutcome;

pub async fn verify_against_reconcile(store: &dyn Store, exists: &InstanceExists) -> Result<VerifyOutcome, VerifyError> {
    let rows = store.find_reconcile_in_range(&exists.instance_id, second_window(exists.launched_at)).await?;

    let row = match rows.len() {
        0 => return Ok(VerifyOutcome::NotFound("InstanceReconcile".into())),
        1 => &rows[0],
        _ => return Ok(VerifyOutcome::Ambiguous("InstanceReconcile".into())),
    };

    if !row.launched_at.is_some_and(|la| date_equals_second(la, exists.launched_at)) {
        return Ok(VerifyOutcome::mismatch(
            "launched_at",
            exists.launched_at.to_rfc3339(),
            row.launched_at.map(|d| d.to_rfc3339()).unwrap_or_else(|| "<none>".into()),
        ));
    }
    if row.instance_type_id.as_deref() != Some(exists.instance_type_id.as_str()) {
        return Ok(VerifyOutcome::mismatch(
            "instance_type_id",
            &exists.instance_type_id,
            row.instance_type_id.as_deref().unwrap_or("<none>"),
        ));
    }
    if row.tenant != exists.tenant {
        return Ok(VerifyOutcome::mismatch("tenant", &exists.tenant, &row.tenant));
    }
    if row.image.rax_options != exists.image.rax_options {
        return Ok(VerifyOutcome::mismatch("rax_options", &exists.image.rax_options, &row.image.rax_options));
    }
    if row.image.os_architecture != exists.image.os_architecture {
        return Ok(VerifyOutcome::mismatch("os_architecture", &exists.image.os_architecture, &row.image.os_architecture));
    }
    if row.image.os_version != exists.image.os_version {
        return Ok(VerifyOutcome::mismatch("os_version", &exists.image.os_version, &row.image.os_version));
    }
    if row.image.os_distro != exists.image.os_distro {
        return Ok(VerifyOutcome::mismatch("os_distro", &exists.image.os_distro, &row.image.os_distro));
    }
    if let Some(expected_deleted_at) = exists.deleted_at {
        if !row.deleted_at.is_some_and(|da| date_equals_second(da, expected_deleted_at)) {
            return Ok(VerifyOutcome::mismatch(
                "deleted_at",
                expected_deleted_at.to_rfc3339(),
                row.deleted_at.map(|d| d.to_rfc3339()).unwrap_or_else(|| "<none>".into()),
            ));
        }
    }

    Ok(VerifyOutcome::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use iaudit_domain::{InstanceReconcile, OsImage};
    use iaudit_store::{InMemoryStore, NewInstanceExists};

    #[tokio::test]
    async fn matching_reconcile_row_verifies() {
        let store = InMemoryStore::new();
        let launched = Utc.with_ymd_and_hms(2013, 1, 25, 13, 38, 23).unwrap();
        let image = OsImage { os_architecture: "x86".into(), os_version: "22.04".into(), os_distro: "ubuntu".into(), rax_options: "0".into() };

        store
            .seed_reconcile(vec![InstanceReconcile {
                id: 1,
                instance_id: "inst-1".into(),
                launched_at: Some(launched),
                deleted_at: None,
                instance_type_id: Some("1".into()),
                tenant: "T1".into(),
                image: image.clone(),
            }])
            .await;

        let exists = store
            .create_instance_exists(NewInstanceExists {
                message_id: "m-1".into(),
                instance_id: "inst-1".into(),
                launched_at: launched,
                deleted_at: None,
                audit_period_beginning: launched,
                audit_period_ending: launched,
                instance_type_id: "1".into(),
                tenant: "T1".into(),
                image,
                usage_id: None,
                delete_id: None,
                raw_id: 1,
            })
            .await
            .unwrap();

        assert_eq!(verify_against_reconcile(&store, &exists).await.unwrap(), VerifyOutcome::Ok);
    }

    #[tokio::test]
    async fn no_reconcile_row_is_not_found() {
        let store = InMemoryStore::new();
        let launched = Utc.with_ymd_and_hms(2013, 1, 25, 13, 38, 23).unwrap();
        let exists = store
            .create_instance_exists(NewInstanceExists {
                message_id: "m-1".into(),
                instance_id: "inst-1".into(),
                launched_at: launched,
                deleted_at: None,
                audit_period_beginning: launched,
                audit_period_ending: launched,
                instance_type_id: "1".into(),
                tenant: "T1".into(),
                image: Default::default(),
                usage_id: None,
                delete_id: None,
                raw_id: 1,
            })
            .await
            .unwrap();
        assert_eq!(
            verify_against_reconcile(&store, &exists).await.unwrap(),
            VerifyOutcome::NotFound("InstanceReconcile".into())
        );
    }
}
