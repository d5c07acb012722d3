//! Quota command.

use std::sync::Arc;

use console::style;

use crate::api::ApiClient;
use crate::config::Settings;
use crate::scraper::rate_limiter::RateLimiter;

/// Authenticate and report the account's daily quota and thread allowance.
pub async fn cmd_quota(settings: &Settings) -> anyhow::Result<()> {
    let rate_limiter = Arc::new(RateLimiter::with_config(settings.rate_limit_config()));
    let api = ApiClient::new(&settings.api, rate_limiter.clone())?;

    let user = api.authenticate().await?;
    let quota = rate_limiter.get_quota_stats();

    println!("{} Authenticated as {}", style("✓").green(), user.username);
    println!("  Thread allowance: {}", user.max_threads);
    println!("  Requests today:   {}/{}", quota.used, quota.limit);
    println!("  Remaining:        {}", quota.remaining());

    if quota.exhausted() {
        println!(
            "{} Daily quota exhausted; scraping will fail until it resets",
            style("!").yellow()
        );
    }

    Ok(())
}
