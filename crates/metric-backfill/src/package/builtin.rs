//! Built-in packages.
//!
//! Post metrics are attributed to the post's author (`user_id`), follower
//! counts to the followed user.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::{MigrationPackage, PackageContext};
use crate::core::{BatchRange, EntityMetricEvent, MetricEmitter, SqlRow, SqlValue};
use crate::error::Result;
use crate::resolver;

/// Post views from the columnar event log, batched by hour.
pub struct PostViews;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub post_id: i64,
    pub owner_id: i64,
    pub viewed_at: DateTime<Utc>,
}

impl ViewRow {
    fn from_row(row: &SqlRow) -> Result<Self> {
        Ok(Self {
            post_id: row.i64("post_id")?,
            owner_id: row.i64("owner_id")?,
            viewed_at: row.timestamp("viewed_at")?,
        })
    }
}

#[async_trait]
impl MigrationPackage for PostViews {
    type Row = ViewRow;

    fn name(&self) -> &str {
        "post_views"
    }

    fn query_batch_size(&self) -> u64 {
        3600
    }

    async fn range(&self, ctx: &PackageContext) -> Result<BatchRange> {
        let predicate = format!("viewed_at < toDateTime({})", ctx.cutoff.timestamp());
        resolver::timestamp_range(ctx.columnar.as_ref(), "post_view_events", "viewed_at", &predicate).await
    }

    async fn query(&self, ctx: &PackageContext, range: BatchRange) -> Result<Vec<ViewRow>> {
        let sql = format!(
            "SELECT post_id, owner_id, toUnixTimestamp(viewed_at) AS viewed_at \
             FROM post_view_events \
             WHERE viewed_at >= toDateTime({}) AND viewed_at < toDateTime({}) \
             AND viewed_at < toDateTime({})",
            range.start,
            range.end + 1,
            ctx.cutoff.timestamp()
        );
        ctx.columnar
            .query(&sql)
            .await?
            .iter()
            .map(ViewRow::from_row)
            .collect()
    }

    async fn process(
        &self,
        _ctx: &PackageContext,
        rows: Vec<ViewRow>,
        emitter: &mut MetricEmitter,
    ) -> Result<()> {
        emitter.emit_all(
            rows.into_iter()
                .map(|r| EntityMetricEvent::count("post", r.post_id, r.owner_id, "views", r.viewed_at)),
        );
        Ok(())
    }
}

/// Reactions joined to their post for the owner. Only reactions on posts
/// created before the cutoff are counted.
pub struct PostReactions;

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionRow {
    pub id: i64,
    pub post_id: i64,
    pub owner_id: i64,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl ReactionRow {
    fn from_row(row: &SqlRow) -> Result<Self> {
        Ok(Self {
            id: row.i64("id")?,
            post_id: row.i64("post_id")?,
            owner_id: row.i64("owner_id")?,
            kind: row.text("kind")?.to_string(),
            created_at: row.timestamp("created_at")?,
        })
    }
}

#[async_trait]
impl MigrationPackage for PostReactions {
    type Row = ReactionRow;

    fn name(&self) -> &str {
        "post_reactions"
    }

    async fn range(&self, ctx: &PackageContext) -> Result<BatchRange> {
        let cutoff = SqlValue::Timestamp(ctx.cutoff);
        let source = ctx.relational.as_ref();

        let Some(last_post) = resolver::max_id(source, "posts", "created_at < $1", &[cutoff.clone()]).await? else {
            return Ok(BatchRange::EMPTY);
        };

        resolver::id_range(
            source,
            "reactions",
            "created_at < $1 AND post_id <= $2",
            &[cutoff, SqlValue::I64(last_post)],
        )
        .await
    }

    async fn query(&self, ctx: &PackageContext, range: BatchRange) -> Result<Vec<ReactionRow>> {
        let sql = "SELECT r.id::int8 AS id, r.post_id::int8 AS post_id, p.user_id::int8 AS owner_id, \
                   r.kind AS kind, r.created_at AS created_at \
                   FROM reactions r JOIN posts p ON p.id = r.post_id \
                   WHERE r.id BETWEEN $1 AND $2 AND r.created_at < $3 AND p.created_at < $3";
        let params = [
            SqlValue::I64(range.start),
            SqlValue::I64(range.end),
            SqlValue::Timestamp(ctx.cutoff),
        ];
        ctx.relational
            .query(sql, &params)
            .await?
            .iter()
            .map(ReactionRow::from_row)
            .collect()
    }

    async fn process(
        &self,
        _ctx: &PackageContext,
        rows: Vec<ReactionRow>,
        emitter: &mut MetricEmitter,
    ) -> Result<()> {
        for r in rows {
            emitter.emit(EntityMetricEvent::count("post", r.post_id, r.owner_id, "reactions", r.created_at));
            emitter.emit(EntityMetricEvent::count(
                "post",
                r.post_id,
                r.owner_id,
                format!("reactions:{}", r.kind),
                r.created_at,
            ));
        }
        Ok(())
    }
}

/// Comment counts per post. The post owner is looked up per batch; a comment
/// whose post is gone is skipped.
pub struct Comments;

#[derive(Debug, Clone, PartialEq)]
pub struct CommentRow {
    pub id: i64,
    pub post_id: i64,
    pub created_at: DateTime<Utc>,
}

impl CommentRow {
    fn from_row(row: &SqlRow) -> Result<Self> {
        Ok(Self {
            id: row.i64("id")?,
            post_id: row.i64("post_id")?,
            created_at: row.timestamp("created_at")?,
        })
    }
}

#[async_trait]
impl MigrationPackage for Comments {
    type Row = CommentRow;

    fn name(&self) -> &str {
        "comments"
    }

    async fn range(&self, ctx: &PackageContext) -> Result<BatchRange> {
        resolver::id_range(
            ctx.relational.as_ref(),
            "comments",
            "created_at < $1",
            &[SqlValue::Timestamp(ctx.cutoff)],
        )
        .await
    }

    async fn query(&self, ctx: &PackageContext, range: BatchRange) -> Result<Vec<CommentRow>> {
        let sql = "SELECT id::int8 AS id, post_id::int8 AS post_id, created_at \
                   FROM comments WHERE id BETWEEN $1 AND $2 AND created_at < $3";
        let params = [
            SqlValue::I64(range.start),
            SqlValue::I64(range.end),
            SqlValue::Timestamp(ctx.cutoff),
        ];
        ctx.relational
            .query(sql, &params)
            .await?
            .iter()
            .map(CommentRow::from_row)
            .collect()
    }

    async fn process(
        &self,
        ctx: &PackageContext,
        rows: Vec<CommentRow>,
        emitter: &mut MetricEmitter,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut post_ids: Vec<i64> = rows.iter().map(|r| r.post_id).collect();
        post_ids.sort_unstable();
        post_ids.dedup();

        let owners: HashMap<i64, i64> = ctx
            .relational
            .query(
                "SELECT id::int8 AS id, user_id::int8 AS user_id FROM posts WHERE id = ANY($1)",
                &[SqlValue::I64List(post_ids)],
            )
            .await?
            .iter()
            .map(|row| Ok((row.i64("id")?, row.i64("user_id")?)))
            .collect::<Result<_>>()?;

        for comment in rows {
            match owners.get(&comment.post_id) {
                Some(&owner_id) => emitter.emit(EntityMetricEvent::count(
                    "post",
                    comment.post_id,
                    owner_id,
                    "comments",
                    comment.created_at,
                )),
                None => {
                    warn!(
                        "comments: post {} of comment {} not found, skipping",
                        comment.post_id, comment.id
                    );
                    emitter.skip_row();
                }
            }
        }

        Ok(())
    }
}

/// Follower counts per followed user.
pub struct Follows;

#[derive(Debug, Clone, PartialEq)]
pub struct FollowRow {
    pub followee_id: i64,
    pub created_at: DateTime<Utc>,
}

impl FollowRow {
    fn from_row(row: &SqlRow) -> Result<Self> {
        Ok(Self {
            followee_id: row.i64("followee_id")?,
            created_at: row.timestamp("created_at")?,
        })
    }
}

#[async_trait]
impl MigrationPackage for Follows {
    type Row = FollowRow;

    fn name(&self) -> &str {
        "follows"
    }

    fn query_batch_size(&self) -> u64 {
        5000
    }

    async fn range(&self, ctx: &PackageContext) -> Result<BatchRange> {
        resolver::id_range(
            ctx.relational.as_ref(),
            "follows",
            "created_at < $1",
            &[SqlValue::Timestamp(ctx.cutoff)],
        )
        .await
    }

    async fn query(&self, ctx: &PackageContext, range: BatchRange) -> Result<Vec<FollowRow>> {
        let sql = "SELECT followee_id::int8 AS followee_id, created_at \
                   FROM follows WHERE id BETWEEN $1 AND $2 AND created_at < $3";
        let params = [
            SqlValue::I64(range.start),
            SqlValue::I64(range.end),
            SqlValue::Timestamp(ctx.cutoff),
        ];
        ctx.relational
            .query(sql, &params)
            .await?
            .iter()
            .map(FollowRow::from_row)
            .collect()
    }

    async fn process(
        &self,
        _ctx: &PackageContext,
        rows: Vec<FollowRow>,
        emitter: &mut MetricEmitter,
    ) -> Result<()> {
        emitter.emit_all(rows.into_iter().map(|r| {
            EntityMetricEvent::count("user", r.followee_id, r.followee_id, "followers", r.created_at)
        }));
        Ok(())
    }
}
