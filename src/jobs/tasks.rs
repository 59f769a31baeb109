/// Background task implementations
use crate::{context::AppContext, db::models::InstanceStatus, error::MonaliasResult};

/// One watchdog cycle
pub async fn run_identity_check(ctx: &AppContext) -> MonaliasResult<InstanceStatus> {
    let snapshot = ctx.watchdog.check_once().await?;
    Ok(snapshot.status)
}

/// Evict idle per-source buckets, returning how many went
pub fn sweep_rate_limit_buckets(ctx: &AppContext) -> usize {
    ctx.rate_limiter.sweep()
}
