//! Component H's primary verification path (§4.H steps 2-3).

use iaudit_domain::{date_equals_second, second_window, InstanceExists};
use iaudit_store::Store;

use crate::error::VerifyError;
use crate::outcome::VerifyOutcome;

/// Runs `_verify_for_launch` then, if it succeeds, `_verify_for_delete`.
/// Never returns early on an `Err` produced by the store — that propagates,
/// the caller (the worker) is the one that converts it to a terminal status.
pub async fn verify(store: &dyn Store, exists: &InstanceExists) -> Result<VerifyOutcome, VerifyError> {
    let outcome = verify_for_launch(store, exists).await?;
    if !outcome.is_ok() {
        return Ok(outcome);
    }
    verify_for_delete(store, exists).await
}

/// Resolves a Usage — preferring the exists's bound `usage_id` — and compares
/// every field in the exact order the source checks them (§10.5): the first
/// mismatch is reported.
pub async fn verify_for_launch(store: &dyn Store, exists: &InstanceExists) -> Result<VerifyOutcome, VerifyError> {
    let usages = match exists.usage_id {
        Some(id) => store.get_instance_usage(id).await?.into_iter().collect::<Vec<_>>(),
        None => store.find_instance_usage_in_range(&exists.instance_id, second_window(exists.launched_at)).await?,
    };

    let usage = match usages.len() {
        0 => return Ok(VerifyOutcome::NotFound("InstanceUsage".into())),
        1 => &usages[0],
        _ => return Ok(VerifyOutcome::Ambiguous("InstanceUsage".into())),
    };

    if !usage.launched_at.is_some_and(|la| date_equals_second(la, exists.launched_at)) {
        return Ok(VerifyOutcome::mismatch(
            "launched_at",
            exists.launched_at.to_rfc3339(),
            usage.launched_at.map(|d| d.to_rfc3339()).unwrap_or_else(|| "<none>".into()),
        ));
    }
    if usage.instance_type_id.as_deref() != Some(exists.instance_type_id.as_str()) {
        return Ok(VerifyOutcome::mismatch(
            "instance_type_id",
            &exists.instance_type_id,
            usage.instance_type_id.as_deref().unwrap_or("<none>"),
        ));
    }
    if usage.tenant != exists.tenant {
        return Ok(VerifyOutcome::mismatch("tenant", &exists.tenant, &usage.tenant));
    }
    if usage.image.rax_options != exists.image.rax_options {
        return Ok(VerifyOutcome::mismatch("rax_options", &exists.image.rax_options, &usage.image.rax_options));
    }
    if usage.image.os_architecture != exists.image.os_architecture {
        return Ok(VerifyOutcome::mismatch(
            "os_architecture",
            &exists.image.os_architecture,
            &usage.image.os_architecture,
        ));
    }
    if usage.image.os_version != exists.image.os_version {
        return Ok(VerifyOutcome::mismatch("os_version", &exists.image.os_version, &usage.image.os_version));
    }
    if usage.image.os_distro != exists.image.os_distro {
        return Ok(VerifyOutcome::mismatch("os_distro", &exists.image.os_distro, &usage.image.os_distro));
    }

    Ok(VerifyOutcome::Ok)
}

/// §4.H step 3. Permissive by design when neither `delete_id` nor
/// `deleted_at` is set on the exists record (documented open question,
/// preserved unchanged) — but a Delete we never heard about, seen before the
/// audit period ended, is still reported.
pub async fn verify_for_delete(store: &dyn Store, exists: &InstanceExists) -> Result<VerifyOutcome, VerifyError> {
    if exists.delete_id.is_some() || exists.deleted_at.is_some() {
        let delete = match exists.delete_id {
            Some(id) => store.get_instance_delete(id).await?,
            None => {
                let deleted_at = exists.deleted_at.expect("guarded by the outer if");
                store.find_instance_delete_in_range(&exists.instance_id, second_window(deleted_at)).await?.into_iter().next()
            }
        };

        let Some(delete) = delete else { return Ok(VerifyOutcome::NotFound("InstanceDelete".into())) };

        if !delete.launched_at.is_some_and(|la| date_equals_second(la, exists.launched_at)) {
            return Ok(VerifyOutcome::mismatch(
                "launched_at",
                exists.launched_at.to_rfc3339(),
                delete.launched_at.map(|d| d.to_rfc3339()).unwrap_or_else(|| "<none>".into()),
            ));
        }
        if let Some(expected_deleted_at) = exists.deleted_at {
            if !date_equals_second(delete.deleted_at, expected_deleted_at) {
                return Ok(VerifyOutcome::mismatch(
                    "deleted_at",
                    expected_deleted_at.to_rfc3339(),
                    delete.deleted_at.to_rfc3339(),
                ));
            }
        }
        return Ok(VerifyOutcome::Ok);
    }

    // No delete expected. Check we didn't miss one.
    let unexplained = store.find_instance_delete_before(&exists.instance_id, exists.audit_period_ending).await?;
    if let Some(found) = unexplained.first() {
        return Ok(VerifyOutcome::Structural(format!(
            "found InstanceDelete({}) for {} that the exists record doesn't know about",
            found.id, exists.instance_id
        )));
    }
    Ok(VerifyOutcome::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use iaudit_domain::OsImage;
    use iaudit_store::{InMemoryStore, NewInstanceExists};

    fn launched() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 1, 25, 13, 38, 23).unwrap()
    }

    async fn seed_matching_exists(store: &InMemoryStore) -> InstanceExists {
        let (mut usage, _) = store.get_or_create_instance_usage("inst-1", "req-1").await.unwrap();
        usage.launched_at = Some(launched());
        usage.instance_type_id = Some("1".into());
        usage.tenant = "T1".into();
        usage.image = OsImage { os_architecture: "x86".into(), os_version: "22.04".into(), os_distro: "ubuntu".into(), rax_options: "0".into() };
        store.save_instance_usage(&usage).await.unwrap();

        store
            .create_instance_exists(NewInstanceExists {
                message_id: "m-1".into(),
                instance_id: "inst-1".into(),
                launched_at: launched(),
                deleted_at: None,
                audit_period_beginning: launched(),
                audit_period_ending: launched(),
                instance_type_id: "1".into(),
                tenant: "T1".into(),
                image: usage.image.clone(),
                usage_id: Some(usage.id),
                delete_id: None,
                raw_id: 1,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn matching_usage_and_no_delete_verifies_clean() {
        let store = InMemoryStore::new();
        let exists = seed_matching_exists(&store).await;
        assert_eq!(verify(&store, &exists).await.unwrap(), VerifyOutcome::Ok);
    }

    #[tokio::test]
    async fn two_matching_usages_are_ambiguous() {
        let store = InMemoryStore::new();
        let exists = seed_matching_exists(&store).await;
        let (mut usage2, _) = store.get_or_create_instance_usage("inst-1", "req-2").await.unwrap();
        usage2.launched_at = Some(launched());
        store.save_instance_usage(&usage2).await.unwrap();

        // Force an unbound lookup so both usages are considered.
        let mut unbound = exists.clone();
        unbound.usage_id = None;
        assert_eq!(verify_for_launch(&store, &unbound).await.unwrap(), VerifyOutcome::Ambiguous("InstanceUsage".into()));
    }

    #[tokio::test]
    async fn tenant_mismatch_is_reported() {
        let store = InMemoryStore::new();
        let mut exists = seed_matching_exists(&store).await;
        exists.tenant = "OTHER".into();
        match verify_for_launch(&store, &exists).await.unwrap() {
            VerifyOutcome::Mismatch { field, .. } => assert_eq!(field, "tenant"),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unexplained_delete_before_audit_end_is_structural() {
        let store = InMemoryStore::new();
        let exists = seed_matching_exists(&store).await;
        store.get_or_create_instance_delete("inst-1", launched() + chrono::Duration::hours(1)).await.unwrap();

        let mut exists = exists;
        exists.audit_period_ending = launched() + chrono::Duration::hours(2);
        assert!(matches!(verify_for_delete(&store, &exists).await.unwrap(), VerifyOutcome::Structural(_)));
    }
}
