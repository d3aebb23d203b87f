//! Component F: InstanceUsage / InstanceDelete / InstanceExists derivation.

use chrono::{DateTime, Utc};
use iaudit_domain::{parse_timestamp, second_window, OsImage, RawData};
use iaudit_parser::Envelope;
use iaudit_store::{NewInstanceExists, Store};
use serde_json::Value;
use tracing::warn;

use crate::error::AggregateError;

fn nested_str<'a>(envelope: &'a Envelope, key: &str) -> Option<&'a str> {
    envelope.payload.get("payload").and_then(|p| p.get(key)).and_then(Value::as_str)
}

fn nested_datetime(envelope: &Envelope, key: &str) -> Result<Option<DateTime<Utc>>, AggregateError> {
    match nested_str(envelope, key) {
        Some(s) => Ok(Some(parse_timestamp(s)?)),
        None => Ok(None),
    }
}

fn extract_image(envelope: &Envelope) -> OsImage {
    OsImage {
        os_architecture: nested_str(envelope, "os_architecture").unwrap_or_default().to_string(),
        os_version: nested_str(envelope, "os_version").unwrap_or_default().to_string(),
        os_distro: nested_str(envelope, "os_distro").unwrap_or_default().to_string(),
        rax_options: nested_str(envelope, "rax_options").unwrap_or_default().to_string(),
    }
}

fn extract_instance_type(envelope: &Envelope, use_new: bool) -> Option<String> {
    let key = if use_new { "new_instance_type_id" } else { "instance_type_id" };
    nested_str(envelope, key).map(str::to_string)
}

/// Entry point, dispatching on `raw.event` per §4.F's table.
pub async fn aggregate_usage(store: &dyn Store, raw: &RawData, envelope: &Envelope) -> Result<(), AggregateError> {
    match raw.event.as_str() {
        "compute.instance.create.start"
        | "compute.instance.rebuild.start"
        | "compute.instance.resize.prep.start"
        | "compute.instance.resize.revert.start" => process_usage_for_new_launch(store, raw, envelope).await,
        "compute.instance.create.end" => process_usage_for_updates(store, raw, envelope, false).await,
        "compute.instance.resize.prep.end" => process_usage_for_updates(store, raw, envelope, true).await,
        "compute.instance.resize.revert.end" => process_usage_for_updates(store, raw, envelope, false).await,
        "compute.instance.delete.end" => process_delete(store, raw, envelope).await,
        "compute.instance.exists" => process_exists(store, raw, envelope).await,
        _ => Ok(()),
    }
}

/// Sets `launched_at` only if currently absent — idempotent across retried
/// `.start` deliveries (§8 invariant 3).
async fn process_usage_for_new_launch(
    store: &dyn Store,
    raw: &RawData,
    envelope: &Envelope,
) -> Result<(), AggregateError> {
    let (Some(instance_id), Some(request_id)) = (raw.instance_id.as_deref(), raw.request_id.as_deref()) else {
        return Ok(());
    };
    let (mut usage, _) = store.get_or_create_instance_usage(instance_id, request_id).await?;
    usage.tenant = nested_str(envelope, "tenant_id").unwrap_or_default().to_string();
    usage.image = extract_image(envelope);
    if let Some(t) = extract_instance_type(envelope, false) {
        usage.instance_type_id = Some(t);
    }
    if usage.launched_at.is_none() {
        usage.launched_at = nested_datetime(envelope, "launched_at")?;
    }
    store.save_instance_usage(&usage).await?;
    Ok(())
}

/// Overwrites `launched_at` unconditionally (§8 invariant 4). Silently
/// skipped when the payload carries `message == "Error"`. `use_new_type`
/// selects `new_instance_type_id` over `instance_type_id` (resize.prep.end).
async fn process_usage_for_updates(
    store: &dyn Store,
    raw: &RawData,
    envelope: &Envelope,
    use_new_type: bool,
) -> Result<(), AggregateError> {
    if nested_str(envelope, "message") == Some("Error") {
        return Ok(());
    }
    let (Some(instance_id), Some(request_id)) = (raw.instance_id.as_deref(), raw.request_id.as_deref()) else {
        return Ok(());
    };
    let (mut usage, _) = store.get_or_create_instance_usage(instance_id, request_id).await?;
    usage.tenant = nested_str(envelope, "tenant_id").unwrap_or_default().to_string();
    usage.image = extract_image(envelope);
    if let Some(t) = extract_instance_type(envelope, use_new_type) {
        usage.instance_type_id = Some(t);
    }
    if let Some(dt) = nested_datetime(envelope, "launched_at")? {
        usage.launched_at = Some(dt);
    }
    store.save_instance_usage(&usage).await?;
    Ok(())
}

async fn process_delete(store: &dyn Store, raw: &RawData, envelope: &Envelope) -> Result<(), AggregateError> {
    let Some(instance_id) = raw.instance_id.as_deref() else { return Ok(()) };
    let deleted_at = match nested_datetime(envelope, "deleted_at")? {
        Some(dt) => dt,
        None => iaudit_domain::from_decimal(raw.when)?,
    };
    let (mut delete, _) = store.get_or_create_instance_delete(instance_id, deleted_at).await?;
    if let Some(dt) = nested_datetime(envelope, "launched_at")? {
        delete.launched_at = Some(dt);
    }
    store.save_instance_delete(&delete).await?;
    Ok(())
}

async fn process_exists(store: &dyn Store, raw: &RawData, envelope: &Envelope) -> Result<(), AggregateError> {
    let Some(instance_id) = raw.instance_id.as_deref() else { return Ok(()) };

    let Some(launched_at) = nested_datetime(envelope, "launched_at")? else {
        warn!("Ignoring exists without launched_at. RawData({})", raw.id);
        return Ok(());
    };

    let usage_id = store
        .find_instance_usage_in_range(instance_id, second_window(launched_at))
        .await?
        .first()
        .map(|u| u.id);

    let deleted_at = nested_datetime(envelope, "deleted_at")?;
    let delete_id = match deleted_at {
        Some(deleted_at) => {
            store.find_instance_delete_in_range(instance_id, second_window(deleted_at)).await?.first().map(|d| d.id)
        }
        None => None,
    };

    let message_id = envelope
        .payload_str("message_id")
        .ok_or_else(|| AggregateError::Internal("exists event missing message_id".into()))?
        .to_string();

    let new_exists = NewInstanceExists {
        message_id,
        instance_id: instance_id.to_string(),
        launched_at,
        deleted_at,
        audit_period_beginning: nested_datetime(envelope, "audit_period_beginning")?.unwrap_or(launched_at),
        audit_period_ending: nested_datetime(envelope, "audit_period_ending")?.unwrap_or(launched_at),
        instance_type_id: nested_str(envelope, "instance_type_id").unwrap_or_default().to_string(),
        tenant: nested_str(envelope, "tenant_id").unwrap_or_default().to_string(),
        image: extract_image(envelope),
        usage_id,
        delete_id,
        raw_id: raw.id,
    };
    store.create_instance_exists(new_exists).await?;
    Ok(())
}
