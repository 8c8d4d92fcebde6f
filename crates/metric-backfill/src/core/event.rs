//! Metric events and the emitter packages write them into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Atomic output unit of the backfill.
///
/// Downstream aggregation sums `metric_value` per key, so emitting the same
/// event twice double-counts rather than corrupting the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetricEvent {
    pub entity_type: String,
    pub entity_id: i64,
    pub user_id: i64,
    pub metric_type: String,
    pub metric_value: f64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl EntityMetricEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: i64,
        user_id: i64,
        metric_type: impl Into<String>,
        metric_value: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            user_id,
            metric_type: metric_type.into(),
            metric_value,
            created_at,
        }
    }

    /// Unit increment, the shape almost every counter metric takes.
    pub fn count(
        entity_type: impl Into<String>,
        entity_id: i64,
        user_id: i64,
        metric_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(entity_type, entity_id, user_id, metric_type, 1.0, created_at)
    }
}

/// Append-only buffer a package processor emits into.
///
/// One emitter is created per batch; the orchestrator drains it into the sink
/// once the processor returns.
#[derive(Debug, Default)]
pub struct MetricEmitter {
    events: Vec<EntityMetricEvent>,
    skipped_rows: usize,
}

impl MetricEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: EntityMetricEvent) {
        self.events.push(event);
    }

    pub fn emit_all(&mut self, events: impl IntoIterator<Item = EntityMetricEvent>) {
        self.events.extend(events);
    }

    /// Record that a source row produced no metrics because an auxiliary
    /// lookup came back empty.
    pub fn skip_row(&mut self) {
        self.skipped_rows += 1;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    pub fn events(&self) -> &[EntityMetricEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<EntityMetricEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wire_shape() {
        let created_at = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        let event = EntityMetricEvent::count("post", 10, 20, "views", created_at);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["entityType"], "post");
        assert_eq!(json["entityId"], 10);
        assert_eq!(json["userId"], 20);
        assert_eq!(json["metricType"], "views");
        assert_eq!(json["metricValue"], 1.0);
        assert_eq!(json["createdAt"], created_at.timestamp());
    }

    #[test]
    fn test_emitter_collects_events_and_skips() {
        let now = Utc::now();
        let mut emitter = MetricEmitter::new();
        assert!(emitter.is_empty());

        emitter.emit(EntityMetricEvent::count("user", 1, 2, "followers", now));
        emitter.emit_all([
            EntityMetricEvent::count("post", 3, 4, "comments", now),
            EntityMetricEvent::new("post", 3, 4, "reactions:like", 2.0, now),
        ]);
        emitter.skip_row();

        assert_eq!(emitter.len(), 3);
        assert_eq!(emitter.skipped_rows(), 1);
        assert_eq!(emitter.into_events()[2].metric_value, 2.0);
    }
}
