//! Hierarchy repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Load nodes, children, subtrees and subtasks for the hierarchy engine.
//! - Persist node updates under optimistic version checks.
//!
//! # Invariants
//! - Only active (`deleted_at IS NULL`) nodes are returned.
//! - Child listing is deterministic: `sort_order ASC, id ASC`, legacy NULL
//!   positions last.
//! - `save` succeeds only when the stored `version` matches the caller's copy.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::node::{Node, NodeId, NodeKind, Subtask, SubtaskId, MAX_PROGRESS};
use rusqlite::{params, Connection, Row, Rows};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const NODE_SELECT_SQL: &str = "SELECT
    id,
    kind,
    parent_id,
    title,
    sort_order,
    progress,
    version,
    deleted_at
FROM work_items";

const SUBTASK_SELECT_SQL: &str = "SELECT
    id,
    task_id,
    title,
    is_completed,
    sort_order
FROM subtasks";

/// Result type used by hierarchy repository operations.
pub type HierarchyRepoResult<T> = Result<T, HierarchyRepoError>;

/// Errors from hierarchy repository operations.
#[derive(Debug)]
pub enum HierarchyRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Node does not exist or is soft-deleted.
    NodeNotFound(NodeId),
    /// Subtask does not exist.
    SubtaskNotFound(SubtaskId),
    /// Stored row changed since the caller loaded it.
    VersionConflict {
        node_id: NodeId,
        expected_version: i64,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for HierarchyRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NodeNotFound(id) => write!(f, "work item not found: {id}"),
            Self::SubtaskNotFound(id) => write!(f, "subtask not found: {id}"),
            Self::VersionConflict {
                node_id,
                expected_version,
            } => write!(
                f,
                "work item {node_id} was modified concurrently (expected version {expected_version})"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "hierarchy repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "hierarchy repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "hierarchy repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid hierarchy data: {message}"),
        }
    }
}

impl Error for HierarchyRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for HierarchyRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for HierarchyRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Data-access contract consumed by the hierarchy engine.
pub trait HierarchyRepository {
    /// Loads one active node.
    fn find_by_id(&self, id: NodeId) -> HierarchyRepoResult<Option<Node>>;
    /// Lists active direct children, optionally filtered by kind.
    fn find_children(
        &self,
        parent_id: Option<NodeId>,
        kind: Option<NodeKind>,
    ) -> HierarchyRepoResult<Vec<Node>>;
    /// Loads the active subtree rooted at `root_id`, root included.
    fn find_all_descendants(&self, root_id: NodeId) -> HierarchyRepoResult<Vec<Node>>;
    /// Highest sibling sort order under `parent_id`, if any sibling is ordered.
    fn find_max_sort_order(&self, parent_id: Option<NodeId>) -> HierarchyRepoResult<Option<i64>>;
    /// Persists mutable node fields and bumps `node.version` on success.
    fn save(&self, node: &mut Node) -> HierarchyRepoResult<()>;
    /// Persists many nodes; stops at the first failure.
    fn save_all(&self, nodes: &mut [Node]) -> HierarchyRepoResult<()> {
        for node in nodes.iter_mut() {
            self.save(node)?;
        }
        Ok(())
    }
    /// Lists subtasks owned by one node in sibling order.
    fn find_subtasks(&self, task_id: NodeId) -> HierarchyRepoResult<Vec<Subtask>>;

    /// Inserts one node as given.
    fn insert_node(&self, node: &Node) -> HierarchyRepoResult<()>;
    /// Tombstones one active node.
    fn soft_delete_node(&self, id: NodeId, deleted_at: i64) -> HierarchyRepoResult<()>;
    fn find_subtask(&self, id: SubtaskId) -> HierarchyRepoResult<Option<Subtask>>;
    fn insert_subtask(&self, subtask: &Subtask) -> HierarchyRepoResult<()>;
    fn update_subtask(&self, subtask: &Subtask) -> HierarchyRepoResult<()>;
    fn delete_subtask(&self, id: SubtaskId) -> HierarchyRepoResult<()>;
}

impl<R: HierarchyRepository + ?Sized> HierarchyRepository for &R {
    fn find_by_id(&self, id: NodeId) -> HierarchyRepoResult<Option<Node>> {
        (**self).find_by_id(id)
    }

    fn find_children(
        &self,
        parent_id: Option<NodeId>,
        kind: Option<NodeKind>,
    ) -> HierarchyRepoResult<Vec<Node>> {
        (**self).find_children(parent_id, kind)
    }

    fn find_all_descendants(&self, root_id: NodeId) -> HierarchyRepoResult<Vec<Node>> {
        (**self).find_all_descendants(root_id)
    }

    fn find_max_sort_order(&self, parent_id: Option<NodeId>) -> HierarchyRepoResult<Option<i64>> {
        (**self).find_max_sort_order(parent_id)
    }

    fn save(&self, node: &mut Node) -> HierarchyRepoResult<()> {
        (**self).save(node)
    }

    fn save_all(&self, nodes: &mut [Node]) -> HierarchyRepoResult<()> {
        (**self).save_all(nodes)
    }

    fn find_subtasks(&self, task_id: NodeId) -> HierarchyRepoResult<Vec<Subtask>> {
        (**self).find_subtasks(task_id)
    }

    fn insert_node(&self, node: &Node) -> HierarchyRepoResult<()> {
        (**self).insert_node(node)
    }

    fn soft_delete_node(&self, id: NodeId, deleted_at: i64) -> HierarchyRepoResult<()> {
        (**self).soft_delete_node(id, deleted_at)
    }

    fn find_subtask(&self, id: SubtaskId) -> HierarchyRepoResult<Option<Subtask>> {
        (**self).find_subtask(id)
    }

    fn insert_subtask(&self, subtask: &Subtask) -> HierarchyRepoResult<()> {
        (**self).insert_subtask(subtask)
    }

    fn update_subtask(&self, subtask: &Subtask) -> HierarchyRepoResult<()> {
        (**self).update_subtask(subtask)
    }

    fn delete_subtask(&self, id: SubtaskId) -> HierarchyRepoResult<()> {
        (**self).delete_subtask(id)
    }
}

/// SQLite-backed hierarchy repository.
///
/// Borrowing a `Transaction` (via deref) keeps every call inside the
/// caller's transaction boundary.
#[derive(Clone, Copy)]
pub struct SqliteHierarchyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteHierarchyRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> HierarchyRepoResult<Self> {
        ensure_hierarchy_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl HierarchyRepository for SqliteHierarchyRepository<'_> {
    fn find_by_id(&self, id: NodeId) -> HierarchyRepoResult<Option<Node>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NODE_SELECT_SQL}
             WHERE id = ?1
               AND deleted_at IS NULL;"
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_node_row(row)?));
        }
        Ok(None)
    }

    fn find_children(
        &self,
        parent_id: Option<NodeId>,
        kind: Option<NodeKind>,
    ) -> HierarchyRepoResult<Vec<Node>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NODE_SELECT_SQL}
             WHERE parent_id IS ?1
               AND deleted_at IS NULL
               AND (?2 IS NULL OR kind = ?2)
             ORDER BY sort_order IS NULL, sort_order ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![
            parent_id.map(|value| value.to_string()),
            kind.map(NodeKind::as_str),
        ])?;
        collect_nodes(&mut rows)
    }

    fn find_all_descendants(&self, root_id: NodeId) -> HierarchyRepoResult<Vec<Node>> {
        // UNION (not UNION ALL) deduplicates, so corrupt cycles still terminate.
        let mut stmt = self.conn.prepare(&format!(
            "WITH RECURSIVE subtree(id) AS (
                SELECT id
                FROM work_items
                WHERE id = ?1
                  AND deleted_at IS NULL
                UNION
                SELECT child.id
                FROM work_items child
                INNER JOIN subtree parent ON child.parent_id = parent.id
                WHERE child.deleted_at IS NULL
            )
            {NODE_SELECT_SQL}
            WHERE id IN (SELECT id FROM subtree)
            ORDER BY parent_id ASC, sort_order IS NULL, sort_order ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([root_id.to_string()])?;
        collect_nodes(&mut rows)
    }

    fn find_max_sort_order(&self, parent_id: Option<NodeId>) -> HierarchyRepoResult<Option<i64>> {
        let max = self.conn.query_row(
            "SELECT MAX(sort_order)
             FROM work_items
             WHERE parent_id IS ?1
               AND deleted_at IS NULL;",
            [parent_id.map(|value| value.to_string())],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(max)
    }

    fn save(&self, node: &mut Node) -> HierarchyRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE work_items
             SET parent_id = ?2,
                 title = ?3,
                 sort_order = ?4,
                 progress = ?5,
                 version = version + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND version = ?6
               AND deleted_at IS NULL;",
            params![
                node.id.to_string(),
                node.parent_id.map(|value| value.to_string()),
                node.title.as_str(),
                node.sort_order,
                i64::from(node.progress),
                node.version,
            ],
        )?;

        if changed == 0 {
            let still_active: i64 = self.conn.query_row(
                "SELECT EXISTS(
                    SELECT 1
                    FROM work_items
                    WHERE id = ?1
                      AND deleted_at IS NULL
                );",
                [node.id.to_string()],
                |row| row.get(0),
            )?;
            if still_active == 1 {
                return Err(HierarchyRepoError::VersionConflict {
                    node_id: node.id,
                    expected_version: node.version,
                });
            }
            return Err(HierarchyRepoError::NodeNotFound(node.id));
        }

        node.version += 1;
        Ok(())
    }

    fn find_subtasks(&self, task_id: NodeId) -> HierarchyRepoResult<Vec<Subtask>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SUBTASK_SELECT_SQL}
             WHERE task_id = ?1
             ORDER BY sort_order ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([task_id.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_subtask_row(row)?);
        }
        Ok(items)
    }

    fn insert_node(&self, node: &Node) -> HierarchyRepoResult<()> {
        self.conn.execute(
            "INSERT INTO work_items (
                id,
                kind,
                parent_id,
                title,
                sort_order,
                progress,
                version,
                deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                node.id.to_string(),
                node.kind.as_str(),
                node.parent_id.map(|value| value.to_string()),
                node.title.as_str(),
                node.sort_order,
                i64::from(node.progress),
                node.version,
                node.deleted_at,
            ],
        )?;
        Ok(())
    }

    fn soft_delete_node(&self, id: NodeId, deleted_at: i64) -> HierarchyRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE work_items
             SET deleted_at = ?2,
                 version = version + 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id.to_string(), deleted_at],
        )?;
        if changed == 0 {
            return Err(HierarchyRepoError::NodeNotFound(id));
        }
        Ok(())
    }

    fn find_subtask(&self, id: SubtaskId) -> HierarchyRepoResult<Option<Subtask>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SUBTASK_SELECT_SQL}
             WHERE id = ?1;"
        ))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_subtask_row(row)?));
        }
        Ok(None)
    }

    fn insert_subtask(&self, subtask: &Subtask) -> HierarchyRepoResult<()> {
        self.conn.execute(
            "INSERT INTO subtasks (
                id,
                task_id,
                title,
                is_completed,
                sort_order
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                subtask.id.to_string(),
                subtask.task_id.to_string(),
                subtask.title.as_str(),
                bool_to_int(subtask.is_completed),
                subtask.sort_order,
            ],
        )?;
        Ok(())
    }

    fn update_subtask(&self, subtask: &Subtask) -> HierarchyRepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE subtasks
             SET title = ?2,
                 is_completed = ?3,
                 sort_order = ?4,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                subtask.id.to_string(),
                subtask.title.as_str(),
                bool_to_int(subtask.is_completed),
                subtask.sort_order,
            ],
        )?;
        if changed == 0 {
            return Err(HierarchyRepoError::SubtaskNotFound(subtask.id));
        }
        Ok(())
    }

    fn delete_subtask(&self, id: SubtaskId) -> HierarchyRepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM subtasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(HierarchyRepoError::SubtaskNotFound(id));
        }
        Ok(())
    }
}

fn collect_nodes(rows: &mut Rows<'_>) -> HierarchyRepoResult<Vec<Node>> {
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_node_row(row)?);
    }
    Ok(items)
}

fn parse_node_row(row: &Row<'_>) -> HierarchyRepoResult<Node> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "work_items.id")?;

    let parent_id = row
        .get::<_, Option<String>>("parent_id")?
        .map(|value| parse_uuid(&value, "work_items.parent_id"))
        .transpose()?;

    let kind_text: String = row.get("kind")?;
    let kind = NodeKind::parse(&kind_text).ok_or_else(|| {
        HierarchyRepoError::InvalidData(format!(
            "invalid node kind `{kind_text}` in work_items.kind"
        ))
    })?;

    // Legacy rows may carry NULL progress; it counts as zero.
    let raw_progress = row.get::<_, Option<i64>>("progress")?.unwrap_or(0);
    let progress = u8::try_from(raw_progress)
        .ok()
        .filter(|value| *value <= MAX_PROGRESS)
        .ok_or_else(|| {
            HierarchyRepoError::InvalidData(format!(
                "invalid progress value `{raw_progress}` in work_items.progress"
            ))
        })?;

    Ok(Node {
        id,
        kind,
        parent_id,
        title: row.get("title")?,
        sort_order: row.get("sort_order")?,
        progress,
        version: row.get("version")?,
        deleted_at: row.get("deleted_at")?,
    })
}

fn parse_subtask_row(row: &Row<'_>) -> HierarchyRepoResult<Subtask> {
    let id_text: String = row.get("id")?;
    let task_text: String = row.get("task_id")?;

    let is_completed = match row.get::<_, i64>("is_completed")? {
        0 => false,
        1 => true,
        other => {
            return Err(HierarchyRepoError::InvalidData(format!(
                "invalid is_completed value `{other}` in subtasks.is_completed"
            )));
        }
    };

    Ok(Subtask {
        id: parse_uuid(&id_text, "subtasks.id")?,
        task_id: parse_uuid(&task_text, "subtasks.task_id")?,
        title: row.get("title")?,
        is_completed,
        sort_order: row.get("sort_order")?,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> HierarchyRepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| HierarchyRepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "work_items",
        &[
            "id",
            "kind",
            "parent_id",
            "title",
            "sort_order",
            "progress",
            "version",
            "deleted_at",
        ],
    ),
    (
        "subtasks",
        &["id", "task_id", "title", "is_completed", "sort_order"],
    ),
];

fn ensure_hierarchy_connection_ready(conn: &Connection) -> HierarchyRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(HierarchyRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &(table, columns) in REQUIRED_COLUMNS {
        if !table_exists(conn, table)? {
            return Err(HierarchyRepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(HierarchyRepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> HierarchyRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> HierarchyRepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

