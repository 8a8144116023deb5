//! JSON-lines port event stream.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, warn};

use nos_fabric_common::PortEvent;

use crate::mechanism::NosMechanism;

/// Outcome of one stream run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    pub applied: usize,
    pub failed: usize,
    pub malformed: usize,
}

/// Parses one line; blank lines and `#` comments yield `None`.
pub fn parse_event(line: &str) -> Option<Result<PortEvent, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Feeds every event of `reader` to the engine, in order.
///
/// A failed event is logged and counted; later events still run.
pub async fn run_events<R>(mech: &NosMechanism, reader: R) -> std::io::Result<EventStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = EventStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let event = match parse_event(&line) {
            None => continue,
            Some(Ok(event)) => event,
            Some(Err(err)) => {
                warn!(line = line_no, error = %err, "Skipping malformed event");
                stats.malformed += 1;
                continue;
            }
        };

        let result = match &event {
            PortEvent::Update(ctx) => mech.update_port(ctx).await,
            PortEvent::Delete(ctx) => mech.delete_port(ctx).await,
        };
        match result {
            Ok(()) => {
                debug!(line = line_no, "Event applied");
                stats.applied += 1;
            }
            Err(err) => {
                error!(line = line_no, error = %err, "Event failed");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}
