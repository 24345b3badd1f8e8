//! Syndication feed: modeled as a feature flag discovered at startup,
//! whose absence causes the feed endpoint to return 404 rather than
//! conditionally mounting routes.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use rss::{ChannelBuilder, ItemBuilder};

use crate::error::ProtocolError;
use crate::state::AppState;

/// `GET /feed.rss` — a chronological feed of recent job events across
/// every non-retired job, suitable for a feed reader.
pub async fn feed(State(state): State<AppState>) -> Result<Response, ProtocolError> {
    if !state.config.crab.feed {
        return Err(ProtocolError::FeedDisabled);
    }

    let jobs = state.store.get_jobs(false).await?;
    let mut items = Vec::new();
    for job in &jobs {
        let events = state.store.get_events(job.job_ref, None, Some(20)).await?;
        for event in events {
            let label = job.crabid.as_deref().unwrap_or(&job.command);
            let title = format!("{} on {}: {}", label, job.host, event.kind.as_str());
            let link = format!("{}/jobs/{}", state.config.crab.base_url.trim_end_matches('/'), job.job_ref.0);
            let mut description = format!("host={} command={}", job.host, job.command);
            if let Some(code) = event.status_code {
                description.push_str(&format!(" status={code}"));
            }
            let item = ItemBuilder::default()
                .title(Some(title))
                .link(Some(link))
                .description(Some(description))
                .pub_date(Some(event.timestamp.to_rfc2822()))
                .build();
            items.push((event.timestamp, item));
        }
    }
    items.sort_by(|a, b| b.0.cmp(&a.0));
    let items: Vec<_> = items.into_iter().map(|(_, item)| item).take(100).collect();

    let channel = ChannelBuilder::default()
        .title("crab job status")
        .link(state.config.crab.base_url.clone())
        .description("Lifecycle events for monitored cron jobs")
        .items(items)
        .build();

    Ok((
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        channel.to_string(),
    )
        .into_response())
}
