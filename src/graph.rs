//! Graph store (Neo4j)
//!
//! Memory nodes plus Entity/Tag/Project/Session neighbours, full-text
//! search, and the activeness predicate every read surface must apply.
//! The graph is the authoritative store for forgetting and expiry; the
//! markdown and vector layers only mirror it.
//!
//! Memories are never physically deleted. Forgetting erases `content` and
//! `summary` and stamps `forgottenAt`/`deleteReason`, which keeps
//! SUPERSEDES chains intact for auditing.

use neo4rs::{query, Graph, Query};
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::error::{MemoryError, Result};
use crate::types::{EntitySummary, HitSource, Memory, MemoryPatch, SearchHit};

/// Full-text index over Memory.content + Memory.summary
pub const MEMORY_FULLTEXT_INDEX: &str = "memory_fulltext";

/// Full-text index over Entity.name
pub const ENTITY_FULLTEXT_INDEX: &str = "entity_fulltext";

/// Expiry sentinel: memories without decayDays effectively never expire
pub const NO_DECAY_DAYS: i64 = 36_500;

/// Entity hits are worth a bit less than direct content hits
const ENTITY_SCORE_FACTOR: f64 = 0.8;

/// Sortable columns for paged listing; anything else falls back to `created`
const SORT_ALLOWLIST: &[&str] = &["created", "importance", "confidence", "updated"];

/// Lucene metacharacters escaped before a raw query reaches the index
const FULLTEXT_RESERVED: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/',
];

/// Activeness predicate for alias `m`: not forgotten and not expired.
fn active_clause(alias: &str) -> String {
    format!(
        "NOT coalesce({a}.forgotten, false) AND ({a}.decayDays IS NULL OR \
         datetime({a}.created) + duration({{days: coalesce({a}.decayDays, {sentinel})}}) > datetime())",
        a = alias,
        sentinel = NO_DECAY_DAYS
    )
}

/// Escape reserved query-engine metacharacters in a raw query string.
/// Returns `None` when nothing searchable remains.
pub fn sanitize_fulltext(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if FULLTEXT_RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Validate a caller-supplied sort field against the allowlist.
pub fn validate_sort_by(requested: Option<&str>) -> &'static str {
    match requested {
        Some(field) => SORT_ALLOWLIST
            .iter()
            .find(|allowed| **allowed == field)
            .copied()
            .unwrap_or("created"),
        None => "created",
    }
}

/// Validate a caller-supplied sort order; only ASC/DESC pass through.
pub fn validate_sort_order(requested: Option<&str>) -> &'static str {
    match requested.map(|s| s.to_ascii_uppercase()) {
        Some(order) if order == "ASC" => "ASC",
        Some(order) if order == "DESC" => "DESC",
        _ => "DESC",
    }
}

/// A memory as read back from the graph
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRow {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub importance: i64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub created: String,
}

/// Filters for the paged listing surface
#[derive(Debug, Clone, Default)]
pub struct PageArgs {
    pub project: Option<String>,
    pub memory_type: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

/// Filters for recall
#[derive(Debug, Clone, Default)]
pub struct RecallFilter {
    pub id: Option<String>,
    pub memory_type: Option<String>,
    pub project: Option<String>,
    pub limit: i64,
}

const MEMORY_RETURN: &str = "m.id AS id, m.content AS content, m.summary AS summary, \
     m.type AS type, m.importance AS importance, m.confidence AS confidence, \
     m.project AS project, m.created AS created";

/// Connected Neo4j driver plus the query surface over the data model
#[derive(Clone)]
pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    /// Connect and verify. Callers treat failure as DependencyUnavailable
    /// and run degraded.
    pub async fn connect(config: &Config) -> Result<Self> {
        let uri = config
            .neo4j_uri
            .clone()
            .ok_or_else(|| MemoryError::Config("EVA_NEO4J_URI not set".into()))?;
        let pass = config
            .neo4j_pass
            .clone()
            .ok_or_else(|| MemoryError::Config("EVA_NEO4J_PASS not set".into()))?;

        let graph = Graph::new(&uri, &config.neo4j_user, &pass)
            .await
            .map_err(|e| MemoryError::GraphUnavailable(e.to_string()))?;
        graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| MemoryError::GraphUnavailable(e.to_string()))?;
        Ok(Self { graph })
    }

    /// Merge a memory node, its scalar fields, and all neighbour
    /// relationships. When the memory supersedes a predecessor, the
    /// predecessor is tombstoned in the same call.
    pub async fn upsert_memory(&self, memory: &Memory) -> Result<()> {
        let mut sets = vec![
            "m.content = $content",
            "m.summary = $summary",
            "m.type = $type",
            "m.importance = $importance",
            "m.confidence = $confidence",
            "m.created = $created",
            "m.updated = $updated",
            "m.forgotten = coalesce(m.forgotten, false)",
        ];
        if memory.decay_days.is_some() {
            sets.push("m.decayDays = $decayDays");
        }
        if memory.project.is_some() {
            sets.push("m.project = $project");
        }
        if memory.session_id.is_some() {
            sets.push("m.sessionId = $sessionId");
        }
        if memory.source.is_some() {
            sets.push("m.source = $source");
        }
        if memory.source_channel.is_some() {
            sets.push("m.sourceChannel = $sourceChannel");
        }
        if memory.source_message_id.is_some() {
            sets.push("m.sourceMessageId = $sourceMessageId");
        }
        if !memory.tags.is_empty() {
            sets.push("m.tags = $tags");
        }

        let cypher = format!("MERGE (m:Memory {{id: $id}}) SET {}", sets.join(", "));
        let mut q = query(&cypher)
            .param("id", memory.id.as_str())
            .param("content", memory.content.as_str())
            .param("summary", memory.summary.as_str())
            .param("type", memory.memory_type.as_str())
            .param("importance", memory.importance)
            .param("confidence", memory.confidence)
            .param("created", rfc3339(&memory.created))
            .param("updated", rfc3339(&memory.updated));
        if let Some(days) = memory.decay_days {
            q = q.param("decayDays", days);
        }
        if let Some(project) = memory.project.as_deref() {
            q = q.param("project", project);
        }
        if let Some(session) = memory.session_id.as_deref() {
            q = q.param("sessionId", session);
        }
        if let Some(source) = memory.source.as_deref() {
            q = q.param("source", source);
        }
        if let Some(channel) = memory.source_channel.as_deref() {
            q = q.param("sourceChannel", channel);
        }
        if let Some(msg) = memory.source_message_id.as_deref() {
            q = q.param("sourceMessageId", msg);
        }
        if !memory.tags.is_empty() {
            q = q.param("tags", memory.tags.clone());
        }
        self.graph.run(q).await?;

        if !memory.entities.is_empty() {
            self.merge_entities(&memory.id, &memory.entities).await?;
        }
        if !memory.tags.is_empty() {
            self.graph
                .run(
                    query(
                        "MATCH (m:Memory {id: $id}) \
                         UNWIND $tags AS name \
                         MERGE (t:Tag {name: name}) \
                         MERGE (m)-[:TAGGED]->(t)",
                    )
                    .param("id", memory.id.as_str())
                    .param("tags", memory.tags.clone()),
                )
                .await?;
        }
        if let Some(project) = memory.project.as_deref() {
            self.graph
                .run(
                    query(
                        "MATCH (m:Memory {id: $id}) \
                         MERGE (p:Project {name: $project}) \
                         MERGE (m)-[:BELONGS_TO]->(p)",
                    )
                    .param("id", memory.id.as_str())
                    .param("project", project),
                )
                .await?;
        }
        if let Some(session) = memory.session_id.as_deref() {
            self.graph
                .run(
                    query(
                        "MATCH (m:Memory {id: $id}) \
                         MERGE (s:Session {id: $sessionId}) \
                         MERGE (m)-[:RECORDED_IN]->(s)",
                    )
                    .param("id", memory.id.as_str())
                    .param("sessionId", session),
                )
                .await?;
        }
        if let Some(predecessor) = memory.supersedes.as_deref() {
            self.graph
                .run(
                    query(
                        "MATCH (m:Memory {id: $id}) \
                         MATCH (old:Memory {id: $old}) \
                         MERGE (m)-[:SUPERSEDES]->(old) \
                         SET old.forgotten = true, \
                             old.forgottenAt = $now, \
                             old.deleteReason = 'superseded by ' + $id, \
                             old.content = null, \
                             old.summary = null",
                    )
                    .param("id", memory.id.as_str())
                    .param("old", predecessor)
                    .param("now", rfc3339(&chrono::Utc::now())),
                )
                .await?;
        }

        Ok(())
    }

    async fn merge_entities(&self, memory_id: &str, entities: &[String]) -> Result<()> {
        self.graph
            .run(
                query(
                    "MATCH (m:Memory {id: $id}) \
                     UNWIND $entities AS name \
                     MERGE (e:Entity {name: name}) \
                     MERGE (m)-[:MENTIONS]->(e)",
                )
                .param("id", memory_id)
                .param("entities", entities.to_vec()),
            )
            .await?;
        Ok(())
    }

    /// Soft-delete: erase content and summary, stamp the tombstone.
    /// Returns false when the id does not exist.
    pub async fn forget(&self, id: &str, reason: Option<&str>) -> Result<bool> {
        let cypher = if reason.is_some() {
            "MATCH (m:Memory {id: $id}) \
             SET m.forgotten = true, m.forgottenAt = $now, m.deleteReason = $reason, \
                 m.content = null, m.summary = null \
             RETURN m.id AS id"
        } else {
            "MATCH (m:Memory {id: $id}) \
             SET m.forgotten = true, m.forgottenAt = $now, \
                 m.content = null, m.summary = null \
             RETURN m.id AS id"
        };
        let mut q = query(cypher)
            .param("id", id)
            .param("now", rfc3339(&chrono::Utc::now()));
        if let Some(reason) = reason {
            q = q.param("reason", reason);
        }

        let mut rows = self.graph.execute(q).await?;
        Ok(rows.next().await?.is_some())
    }

    /// Apply a partial update; `new_entities` carries re-extracted entities
    /// when content changed. Existing MENTIONS edges are kept, so entity
    /// history is monotonic. Returns false when the id does not exist.
    pub async fn update_memory(
        &self,
        id: &str,
        patch: &MemoryPatch,
        new_entities: Option<&[String]>,
    ) -> Result<bool> {
        let mut sets = vec!["m.updated = $updated".to_string()];
        if patch.content.is_some() {
            sets.push("m.content = $content".to_string());
        }
        if patch.summary.is_some() {
            sets.push("m.summary = $summary".to_string());
        }
        if patch.memory_type.is_some() {
            sets.push("m.type = $type".to_string());
        }
        if patch.importance.is_some() {
            sets.push("m.importance = $importance".to_string());
        }
        if patch.project.is_some() {
            sets.push("m.project = $project".to_string());
        }
        if patch.confidence.is_some() {
            sets.push("m.confidence = $confidence".to_string());
        }
        if patch.decay_days.is_some() {
            sets.push("m.decayDays = $decayDays".to_string());
        }

        let cypher = format!(
            "MATCH (m:Memory {{id: $id}}) SET {} RETURN m.id AS id",
            sets.join(", ")
        );
        let mut q = query(&cypher)
            .param("id", id)
            .param("updated", rfc3339(&chrono::Utc::now()));
        if let Some(content) = patch.content.as_deref() {
            q = q.param("content", content);
        }
        if let Some(summary) = patch.summary.as_deref() {
            q = q.param("summary", summary);
        }
        if let Some(mtype) = patch.memory_type.as_deref() {
            q = q.param("type", mtype);
        }
        if let Some(importance) = patch.importance {
            q = q.param("importance", importance);
        }
        if let Some(project) = patch.project.as_deref() {
            q = q.param("project", project);
        }
        if let Some(confidence) = patch.confidence {
            q = q.param("confidence", confidence);
        }
        if let Some(days) = patch.decay_days {
            q = q.param("decayDays", days);
        }

        let mut rows = self.graph.execute(q).await?;
        let found = rows.next().await?.is_some();

        if found {
            if let Some(entities) = new_entities {
                if !entities.is_empty() {
                    self.merge_entities(id, entities).await?;
                }
            }
        }
        Ok(found)
    }

    /// Full-text search over content + summary. Active memories only.
    pub async fn fulltext_memory(
        &self,
        raw_query: &str,
        project: Option<&str>,
        memory_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let Some(sanitized) = sanitize_fulltext(raw_query) else {
            return Ok(Vec::new());
        };

        let mut clauses = vec![active_clause("node")];
        if project.is_some() {
            clauses.push("node.project = $project".to_string());
        }
        if memory_type.is_some() {
            clauses.push("node.type = $type".to_string());
        }

        let cypher = format!(
            "CALL db.index.fulltext.queryNodes('{index}', $q) YIELD node, score \
             WHERE {clauses} \
             RETURN node.id AS id, node.content AS content, node.summary AS summary, \
                    node.type AS type, node.importance AS importance, \
                    node.confidence AS confidence, node.project AS project, \
                    node.created AS created, score \
             ORDER BY score DESC LIMIT $limit",
            index = MEMORY_FULLTEXT_INDEX,
            clauses = clauses.join(" AND ")
        );
        let mut q = query(&cypher)
            .param("q", sanitized.as_str())
            .param("limit", limit);
        if let Some(project) = project {
            q = q.param("project", project);
        }
        if let Some(mtype) = memory_type {
            q = q.param("type", mtype);
        }

        self.collect_hits(q, HitSource::GraphFulltext, 1.0).await
    }

    /// Full-text search over entity names, following MENTIONS back to
    /// active memories. Scores are discounted relative to direct hits.
    pub async fn fulltext_entity(
        &self,
        raw_query: &str,
        project: Option<&str>,
        memory_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let Some(sanitized) = sanitize_fulltext(raw_query) else {
            return Ok(Vec::new());
        };

        let mut clauses = vec![active_clause("m")];
        if project.is_some() {
            clauses.push("m.project = $project".to_string());
        }
        if memory_type.is_some() {
            clauses.push("m.type = $type".to_string());
        }

        let cypher = format!(
            "CALL db.index.fulltext.queryNodes('{index}', $q) YIELD node, score \
             MATCH (m:Memory)-[:MENTIONS]->(node) \
             WHERE {clauses} \
             WITH m, max(score) AS score \
             RETURN {ret}, score \
             ORDER BY score DESC LIMIT $limit",
            index = ENTITY_FULLTEXT_INDEX,
            clauses = clauses.join(" AND "),
            ret = MEMORY_RETURN
        );
        let mut q = query(&cypher)
            .param("q", sanitized.as_str())
            .param("limit", limit);
        if let Some(project) = project {
            q = q.param("project", project);
        }
        if let Some(mtype) = memory_type {
            q = q.param("type", mtype);
        }

        self.collect_hits(q, HitSource::GraphEntity, ENTITY_SCORE_FACTOR)
            .await
    }

    /// Important non-instruction memories for per-turn context injection.
    pub async fn auto_recall(
        &self,
        project: Option<&str>,
        min_importance: i64,
        limit: i64,
    ) -> Result<Vec<MemoryRow>> {
        let mut clauses = vec![
            active_clause("m"),
            "m.type <> 'instruction'".to_string(),
            "m.importance >= $minImportance".to_string(),
        ];
        if project.is_some() {
            clauses.push("m.project = $project".to_string());
        }

        let cypher = format!(
            "MATCH (m:Memory) WHERE {clauses} \
             RETURN {ret} \
             ORDER BY m.importance DESC, m.created DESC LIMIT $limit",
            clauses = clauses.join(" AND "),
            ret = MEMORY_RETURN
        );
        let mut q = query(&cypher)
            .param("minImportance", min_importance)
            .param("limit", limit);
        if let Some(project) = project {
            q = q.param("project", project);
        }
        self.collect_rows(q).await
    }

    /// All active standing instructions, most important first. No limit.
    pub async fn get_instructions(&self, project: Option<&str>) -> Result<Vec<MemoryRow>> {
        let mut clauses = vec![active_clause("m"), "m.type = 'instruction'".to_string()];
        if project.is_some() {
            clauses.push("m.project = $project".to_string());
        }

        let cypher = format!(
            "MATCH (m:Memory) WHERE {clauses} \
             RETURN {ret} ORDER BY m.importance DESC",
            clauses = clauses.join(" AND "),
            ret = MEMORY_RETURN
        );
        let mut q = query(&cypher);
        if let Some(project) = project {
            q = q.param("project", project);
        }
        self.collect_rows(q).await
    }

    /// Top entities by incoming MENTIONS count.
    pub async fn list_entities(&self, limit: i64) -> Result<Vec<EntitySummary>> {
        let cypher = "MATCH (m:Memory)-[:MENTIONS]->(e:Entity) \
             RETURN e.name AS name, count(m) AS mentions, \
                    collect(DISTINCT m.type)[0..5] AS types \
             ORDER BY mentions DESC LIMIT $limit";
        let mut rows = self.graph.execute(query(cypher).param("limit", limit)).await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let name: String = match row.get("name") {
                Ok(name) => name,
                Err(_) => continue,
            };
            out.push(EntitySummary {
                name,
                mentions: row.get("mentions").unwrap_or(0),
                types: row.get("types").unwrap_or_default(),
            });
        }
        Ok(out)
    }

    /// Keep only ids that are active. Fails open: on graph trouble the full
    /// input comes back, because this filter removes tombstones from search
    /// results rather than gating writes.
    pub async fn filter_active(&self, ids: &[String]) -> Vec<String> {
        if ids.is_empty() {
            return Vec::new();
        }
        let cypher = format!(
            "MATCH (m:Memory) WHERE m.id IN $ids AND {} RETURN m.id AS id",
            active_clause("m")
        );

        let result = async {
            let mut rows = self
                .graph
                .execute(query(&cypher).param("ids", ids.to_vec()))
                .await?;
            let mut active = Vec::new();
            while let Some(row) = rows.next().await? {
                if let Ok(id) = row.get::<String>("id") {
                    active.push(id);
                }
            }
            Ok::<_, neo4rs::Error>(active)
        }
        .await;

        match result {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "filter_active failing open");
                ids.to_vec()
            }
        }
    }

    /// Paged listing with validated sort. Returns (rows, total).
    pub async fn page(&self, args: &PageArgs) -> Result<(Vec<MemoryRow>, i64)> {
        let sort_by = validate_sort_by(args.sort_by.as_deref());
        let sort_order = validate_sort_order(args.sort_order.as_deref());
        let page = args.page.max(1);
        let page_size = args.page_size.clamp(1, 200);

        let mut clauses = vec![active_clause("m")];
        if args.project.is_some() {
            clauses.push("m.project = $project".to_string());
        }
        if args.memory_type.is_some() {
            clauses.push("m.type = $type".to_string());
        }
        let where_clause = clauses.join(" AND ");

        let count_cypher = format!("MATCH (m:Memory) WHERE {} RETURN count(m) AS total", where_clause);
        let mut count_q = query(&count_cypher);
        if let Some(project) = args.project.as_deref() {
            count_q = count_q.param("project", project);
        }
        if let Some(mtype) = args.memory_type.as_deref() {
            count_q = count_q.param("type", mtype);
        }
        let mut count_rows = self.graph.execute(count_q).await?;
        let total: i64 = match count_rows.next().await? {
            Some(row) => row.get("total").unwrap_or(0),
            None => 0,
        };

        // sort field and direction are interpolated only after allowlist
        // validation; everything else stays parameterized
        let cypher = format!(
            "MATCH (m:Memory) WHERE {where_clause} \
             RETURN {ret} \
             ORDER BY m.{sort_by} {sort_order} SKIP $skip LIMIT $limit",
            where_clause = where_clause,
            ret = MEMORY_RETURN,
            sort_by = sort_by,
            sort_order = sort_order
        );
        let mut q = query(&cypher)
            .param("skip", (page - 1) * page_size)
            .param("limit", page_size);
        if let Some(project) = args.project.as_deref() {
            q = q.param("project", project);
        }
        if let Some(mtype) = args.memory_type.as_deref() {
            q = q.param("type", mtype);
        }

        let rows = self.collect_rows(q).await?;
        Ok((rows, total))
    }

    /// Single-id lookup or filtered recent listing.
    pub async fn recent_by_filter(&self, filter: &RecallFilter) -> Result<Vec<MemoryRow>> {
        if let Some(id) = filter.id.as_deref() {
            let cypher = format!(
                "MATCH (m:Memory {{id: $id}}) WHERE {} RETURN {}",
                active_clause("m"),
                MEMORY_RETURN
            );
            return self.collect_rows(query(&cypher).param("id", id)).await;
        }

        let mut clauses = vec![active_clause("m")];
        if filter.memory_type.is_some() {
            clauses.push("m.type = $type".to_string());
        }
        if filter.project.is_some() {
            clauses.push("m.project = $project".to_string());
        }

        let cypher = format!(
            "MATCH (m:Memory) WHERE {clauses} \
             RETURN {ret} ORDER BY m.created DESC LIMIT $limit",
            clauses = clauses.join(" AND "),
            ret = MEMORY_RETURN
        );
        let mut q = query(&cypher).param("limit", filter.limit.max(1));
        if let Some(mtype) = filter.memory_type.as_deref() {
            q = q.param("type", mtype);
        }
        if let Some(project) = filter.project.as_deref() {
            q = q.param("project", project);
        }
        self.collect_rows(q).await
    }

    /// Soft-delete old low-importance memories. Returns the count pruned.
    pub async fn prune_old(&self, min_importance: i64, max_age_days: i64) -> Result<i64> {
        let cypher = format!(
            "MATCH (m:Memory) \
             WHERE {active} AND m.importance < $minImportance \
               AND datetime(m.created) < datetime() - duration({{days: $maxAgeDays}}) \
             SET m.forgotten = true, m.forgottenAt = $now, \
                 m.deleteReason = 'maintenance-pruned', \
                 m.content = null, m.summary = null \
             RETURN count(m) AS pruned",
            active = active_clause("m")
        );
        let mut rows = self
            .graph
            .execute(
                query(&cypher)
                    .param("minImportance", min_importance)
                    .param("maxAgeDays", max_age_days)
                    .param("now", rfc3339(&chrono::Utc::now())),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get("pruned").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Merge the session node at sync-start.
    pub async fn link_session(
        &self,
        session_id: &str,
        started_at: &chrono::DateTime<chrono::Utc>,
        project: Option<&str>,
        branch: Option<&str>,
    ) -> Result<()> {
        let mut sets = vec!["s.startedAt = $startedAt"];
        if project.is_some() {
            sets.push("s.project = $project");
        }
        if branch.is_some() {
            sets.push("s.branch = $branch");
        }
        let cypher = format!("MERGE (s:Session {{id: $id}}) SET {}", sets.join(", "));
        let mut q = query(&cypher)
            .param("id", session_id)
            .param("startedAt", rfc3339(started_at));
        if let Some(project) = project {
            q = q.param("project", project);
        }
        if let Some(branch) = branch {
            q = q.param("branch", branch);
        }
        self.graph.run(q).await?;

        if let Some(project) = project {
            self.graph
                .run(
                    query(
                        "MATCH (s:Session {id: $id}) \
                         MERGE (p:Project {name: $project}) \
                         MERGE (s)-[:BELONGS_TO]->(p)",
                    )
                    .param("id", session_id)
                    .param("project", project),
                )
                .await?;
        }
        Ok(())
    }

    /// Close the session node at sync-end.
    pub async fn close_session(
        &self,
        session_id: &str,
        ended_at: &chrono::DateTime<chrono::Utc>,
        summary: Option<&str>,
    ) -> Result<()> {
        let mut sets = vec!["s.endedAt = $endedAt"];
        if summary.is_some() {
            sets.push("s.summary = $summary");
        }
        let cypher = format!(
            "MATCH (s:Session {{id: $id}}) SET {}",
            sets.join(", ")
        );
        let mut q = query(&cypher)
            .param("id", session_id)
            .param("endedAt", rfc3339(ended_at));
        if let Some(summary) = summary {
            q = q.param("summary", summary);
        }
        self.graph.run(q).await?;
        Ok(())
    }

    /// Count of active memories.
    pub async fn count_active(&self) -> Result<i64> {
        let cypher = format!(
            "MATCH (m:Memory) WHERE {} RETURN count(m) AS total",
            active_clause("m")
        );
        let mut rows = self.graph.execute(query(&cypher)).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get("total").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// All known project names.
    pub async fn project_names(&self) -> Result<Vec<String>> {
        let mut rows = self
            .graph
            .execute(query("MATCH (p:Project) RETURN p.name AS name ORDER BY name"))
            .await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            if let Ok(name) = row.get::<String>("name") {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn collect_rows(&self, q: Query) -> Result<Vec<MemoryRow>> {
        let mut rows = self.graph.execute(q).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            if let Some(memory) = memory_from_row(&row) {
                out.push(memory);
            }
        }
        Ok(out)
    }

    async fn collect_hits(
        &self,
        q: Query,
        source: HitSource,
        score_factor: f64,
    ) -> Result<Vec<SearchHit>> {
        let mut rows = self.graph.execute(q).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let Some(memory) = memory_from_row(&row) else {
                continue;
            };
            let score: f64 = row.get("score").unwrap_or(0.0);
            out.push(SearchHit {
                id: memory.id,
                content: memory.content,
                summary: memory.summary,
                memory_type: memory.memory_type,
                importance: memory.importance,
                confidence: memory.confidence,
                project: memory.project,
                created: memory.created,
                score: score * score_factor,
                source,
            });
        }
        Ok(out)
    }
}

fn memory_from_row(row: &neo4rs::Row) -> Option<MemoryRow> {
    let id: String = row.get("id").ok()?;
    Some(MemoryRow {
        id,
        content: row.get("content").ok().flatten(),
        summary: row.get("summary").ok().flatten(),
        memory_type: row
            .get("type")
            .ok()
            .flatten()
            .unwrap_or_else(|| "info".to_string()),
        importance: row.get("importance").unwrap_or(0),
        confidence: row.get("confidence").unwrap_or(0.0),
        project: row.get("project").ok().flatten(),
        created: row.get("created").ok().flatten().unwrap_or_default(),
    })
}

fn rfc3339(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_escapes_reserved_chars() {
        let sanitized = sanitize_fulltext(r#"foo+bar (baz) "qux" a/b"#).unwrap();
        assert_eq!(sanitized, r#"foo\+bar \(baz\) \"qux\" a\/b"#);
    }

    #[test]
    fn sanitize_rejects_empty_queries() {
        assert_eq!(sanitize_fulltext(""), None);
        assert_eq!(sanitize_fulltext("   "), None);
    }

    #[test]
    fn sanitize_passes_plain_text() {
        assert_eq!(
            sanitize_fulltext("database choice").as_deref(),
            Some("database choice")
        );
    }

    #[test]
    fn sort_field_falls_back_to_created() {
        assert_eq!(validate_sort_by(Some("importance")), "importance");
        assert_eq!(validate_sort_by(Some("updated")), "updated");
        assert_eq!(validate_sort_by(Some("id; DROP")), "created");
        assert_eq!(validate_sort_by(None), "created");
    }

    #[test]
    fn sort_order_falls_back_to_desc() {
        assert_eq!(validate_sort_order(Some("asc")), "ASC");
        assert_eq!(validate_sort_order(Some("DESC")), "DESC");
        assert_eq!(validate_sort_order(Some("sideways")), "DESC");
        assert_eq!(validate_sort_order(None), "DESC");
    }

    #[test]
    fn active_clause_names_alias() {
        let clause = active_clause("node");
        assert!(clause.contains("node.forgotten"));
        assert!(clause.contains("node.decayDays"));
        assert!(clause.contains("36500"));
    }
}
