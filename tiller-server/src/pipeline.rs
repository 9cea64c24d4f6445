//! The mapping loop.
//!
//! One instance, one loop: receive a raw message, map it, run the aggregate
//! stage, publish. Per-message failures are logged and the loop continues;
//! the loop itself only ends when the raw subscription closes.

use crate::bus::Publisher;
use anyhow::Result;
use tiller_core::{AggregateMapper, Mapper, RawMessage};
use tokio::sync::mpsc;

pub async fn run(
    mut mapper: Box<dyn Mapper + Send>,
    mut aggregate: Option<AggregateMapper>,
    mut receiver: mpsc::Receiver<RawMessage>,
    publisher: Publisher,
) -> Result<()> {
    while let Some(raw) = receiver.recv().await {
        let mapped = match mapper.map(&raw) {
            Ok(Some(mapped)) => mapped,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("dropping message from {}: {}", raw.connector, e);
                continue;
            }
        };
        let mapped = match aggregate.as_mut() {
            Some(aggregate) => match aggregate.map(&mapped) {
                Ok(mapped) => mapped,
                Err(e) => {
                    log::error!("aggregate stage failed: {}", e);
                    mapped
                }
            },
            None => mapped,
        };
        publisher.publish(&mapped)?;
    }
    log::info!("raw subscription closed, stopping");
    Ok(())
}
