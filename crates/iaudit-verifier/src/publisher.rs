use async_trait::async_trait;
use iaudit_domain::InstanceExists;

/// Component I's seam, owned here so the verifier can depend on the
/// abstraction without depending on a concrete broker crate. `iaudit-publisher`
/// implements this against a real AMQP connection; tests substitute a no-op
/// or recording stub freely.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, exists: &InstanceExists) -> anyhow::Result<()>;
}
