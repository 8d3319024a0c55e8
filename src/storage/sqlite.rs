//! SQLite storage backend

use super::traits::{Mutation, NodeRecord, OpenStore, StorageError, StorageResult, TreeStore};
use crate::model::{
    ArcId, Instance, InstanceId, InstanceKind, MaceType, NodeId, Outline, OutlineId, OwnerRef,
    StoryArc,
};
use crate::tree::NodePayload;
use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rusqlite::{params, Connection, OptionalExtension, ToSql, TransactionBehavior};
use std::collections::{BTreeSet, HashMap};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const NODE_COLUMNS: &str = "n.id, n.tree_kind, n.owner_id, n.outline_id, n.node_type, n.path, \
                            n.depth, n.title, n.description, n.story_node_id, n.created_at, n.modified_at";

type NodeRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

/// SQLite-backed outline store
///
/// One database file holds outlines, arcs, instances and every tree node.
/// Thread-safe via an internal mutex on the connection; each `apply` runs in
/// an IMMEDIATE transaction so concurrent processes serialize their writes
/// and a failed unit of work leaves nothing behind.
///
/// An exclusive section keeps one IMMEDIATE transaction open across many
/// calls. The section gate is reentrant: calls from the thread that owns the
/// section join its transaction, every other thread waits at the gate and
/// never sees uncommitted rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    gate: ReentrantMutex<()>,
}

/// The connection together with the section gate it was taken under
struct Held<'a> {
    conn: MutexGuard<'a, Connection>,
    _gate: ReentrantMutexGuard<'a, ()>,
}

impl Deref for Held<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for Held<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Rolls back a section that never reached COMMIT, including on panic
struct OpenSection<'a> {
    conn: &'a Mutex<Connection>,
    closed: bool,
}

impl Drop for OpenSection<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                debug!(error = %e, "rollback of abandoned section failed");
            }
        }
    }
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL lets readers keep a committed snapshot while a writer works
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS outlines (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS arcs (
                id TEXT PRIMARY KEY,
                outline_id TEXT NOT NULL,
                name TEXT NOT NULL,
                mace_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (outline_id) REFERENCES outlines(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_arcs_outline ON arcs(outline_id);

            CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                outline_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                label TEXT NOT NULL,
                FOREIGN KEY (outline_id) REFERENCES outlines(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_instances_outline ON instances(outline_id);

            -- Tree nodes of both kinds. (tree_kind, owner_id) is the tree owner;
            -- path is the materialized path, unique within its tree.
            CREATE TABLE IF NOT EXISTS tree_nodes (
                id TEXT PRIMARY KEY,
                tree_kind TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                outline_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                path TEXT NOT NULL,
                depth INTEGER NOT NULL,
                title TEXT,
                description TEXT,
                story_node_id TEXT,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                UNIQUE (tree_kind, owner_id, path),
                FOREIGN KEY (outline_id) REFERENCES outlines(id) ON DELETE CASCADE,
                FOREIGN KEY (story_node_id) REFERENCES tree_nodes(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tree_nodes_outline ON tree_nodes(outline_id);

            CREATE TABLE IF NOT EXISTS node_associations (
                node_id TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (node_id, instance_id),
                FOREIGN KEY (node_id) REFERENCES tree_nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (instance_id) REFERENCES instances(id) ON DELETE CASCADE
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<Held<'_>> {
        let gate = self.gate.lock();
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(Held { conn, _gate: gate })
    }

    /// Load nodes matching `filter` (a condition over alias `n`) with their associations.
    ///
    /// Two statements under one savepoint, whatever the number of nodes. Inside
    /// an exclusive section the savepoint nests in its transaction.
    fn read_nodes(
        conn: &mut Connection,
        filter: &str,
        params: &[Box<dyn ToSql>],
    ) -> StorageResult<Vec<NodeRecord>> {
        let tx = conn.savepoint()?;
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();

        let mut records = {
            let sql = format!(
                "SELECT {} FROM tree_nodes n WHERE {} ORDER BY n.path",
                NODE_COLUMNS, filter
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_refs.as_slice(), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                    row.get(11)?,
                ))
            })?;
            let mut records = Vec::new();
            for row in rows {
                records.push(Self::row_to_node(row?)?);
            }
            records
        };

        if !records.is_empty() {
            let sql = format!(
                "SELECT a.node_id, a.instance_id, a.kind FROM node_associations a \
                 JOIN tree_nodes n ON n.id = a.node_id WHERE {}",
                filter
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let index: HashMap<String, usize> = records
                .iter()
                .enumerate()
                .map(|(i, r)| (r.id.to_string(), i))
                .collect();
            for row in rows {
                let (node_id, instance_id, kind) = row?;
                let Some(&i) = index.get(&node_id) else {
                    continue;
                };
                let instance: InstanceId = parse_id(&instance_id)?;
                match InstanceKind::parse(&kind) {
                    Some(InstanceKind::Character) => {
                        records[i].payload.characters.insert(instance);
                    }
                    Some(InstanceKind::Location) => {
                        records[i].payload.locations.insert(instance);
                    }
                    None => {
                        return Err(StorageError::Corrupt(format!(
                            "association of node {} has unknown kind '{}'",
                            node_id, kind
                        )))
                    }
                }
            }
        }

        Ok(records)
    }

    fn row_to_node(row: NodeRow) -> StorageResult<NodeRecord> {
        let (
            id,
            tree_kind,
            owner_id,
            outline_id,
            node_type,
            path,
            depth,
            title,
            description,
            story_node,
            created_at,
            modified_at,
        ) = row;

        let owner = OwnerRef::from_parts(&tree_kind, &owner_id).ok_or_else(|| {
            StorageError::Corrupt(format!("node {} has invalid owner {}:{}", id, tree_kind, owner_id))
        })?;
        let depth = usize::try_from(depth)
            .map_err(|_| StorageError::Corrupt(format!("node {} has negative depth", id)))?;

        Ok(NodeRecord {
            id: parse_id(&id)?,
            owner,
            outline_id: parse_id(&outline_id)?,
            node_type,
            path,
            depth,
            payload: NodePayload {
                title,
                description,
                characters: BTreeSet::new(),
                locations: BTreeSet::new(),
                story_node: story_node.as_deref().map(parse_id::<NodeId>).transpose()?,
            },
            created_at: parse_date(&created_at)?,
            modified_at: parse_date(&modified_at)?,
        })
    }

    fn owner_params(owner: &OwnerRef) -> Vec<Box<dyn ToSql>> {
        vec![
            Box::new(owner.tree_kind().as_str()),
            Box::new(owner.id_string()),
        ]
    }

    fn write_associations(conn: &Connection, record: &NodeRecord) -> StorageResult<()> {
        let id = record.id.to_string();
        let tagged = record
            .payload
            .characters
            .iter()
            .map(|i| (i, InstanceKind::Character))
            .chain(record.payload.locations.iter().map(|i| (i, InstanceKind::Location)));
        for (instance, kind) in tagged {
            conn.execute(
                "INSERT INTO node_associations (node_id, instance_id, kind) VALUES (?1, ?2, ?3)",
                params![id, instance.to_string(), kind.as_str()],
            )?;
        }
        Ok(())
    }

    fn apply_one(conn: &Connection, mutation: &Mutation) -> StorageResult<()> {
        match mutation {
            Mutation::SaveOutline(outline) => {
                conn.execute(
                    r#"
                    INSERT INTO outlines (id, title, description, created_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        description = excluded.description
                    "#,
                    params![
                        outline.id.to_string(),
                        outline.title,
                        outline.description,
                        outline.created_at.to_rfc3339(),
                    ],
                )?;
            }
            Mutation::SaveArc(arc) => {
                conn.execute(
                    r#"
                    INSERT INTO arcs (id, outline_id, name, mace_type, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        mace_type = excluded.mace_type
                    "#,
                    params![
                        arc.id.to_string(),
                        arc.outline_id.to_string(),
                        arc.name,
                        arc.mace_type.as_str(),
                        arc.created_at.to_rfc3339(),
                    ],
                )?;
            }
            Mutation::SaveInstance(instance) => {
                conn.execute(
                    r#"
                    INSERT INTO instances (id, outline_id, kind, label)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        label = excluded.label
                    "#,
                    params![
                        instance.id.to_string(),
                        instance.outline_id.to_string(),
                        instance.kind.as_str(),
                        instance.label,
                    ],
                )?;
            }
            Mutation::DeleteOutline(id) => {
                // Arcs, instances and nodes of both kinds cascade
                conn.execute("DELETE FROM outlines WHERE id = ?1", params![id.to_string()])?;
            }
            Mutation::DeleteArc(id) => {
                conn.execute(
                    "DELETE FROM tree_nodes WHERE tree_kind = 'arc' AND owner_id = ?1",
                    params![id.to_string()],
                )?;
                conn.execute("DELETE FROM arcs WHERE id = ?1", params![id.to_string()])?;
            }
            Mutation::InsertNode(record) => {
                conn.execute(
                    r#"
                    INSERT INTO tree_nodes (id, tree_kind, owner_id, outline_id, node_type, path, depth,
                                            title, description, story_node_id, created_at, modified_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    "#,
                    params![
                        record.id.to_string(),
                        record.owner.tree_kind().as_str(),
                        record.owner.id_string(),
                        record.outline_id.to_string(),
                        record.node_type,
                        record.path,
                        record.depth as i64,
                        record.payload.title,
                        record.payload.description,
                        record.payload.story_node.map(|n| n.to_string()),
                        record.created_at.to_rfc3339(),
                        record.modified_at.to_rfc3339(),
                    ],
                )?;
                Self::write_associations(conn, record)?;
            }
            Mutation::UpdateNode(record) => {
                let rows = conn.execute(
                    r#"
                    UPDATE tree_nodes SET
                        node_type = ?2,
                        title = ?3,
                        description = ?4,
                        story_node_id = ?5,
                        modified_at = ?6
                    WHERE id = ?1
                    "#,
                    params![
                        record.id.to_string(),
                        record.node_type,
                        record.payload.title,
                        record.payload.description,
                        record.payload.story_node.map(|n| n.to_string()),
                        record.modified_at.to_rfc3339(),
                    ],
                )?;
                if rows != 1 {
                    return Err(StorageError::Corrupt(format!(
                        "node {} vanished during update",
                        record.id
                    )));
                }
                conn.execute(
                    "DELETE FROM node_associations WHERE node_id = ?1",
                    params![record.id.to_string()],
                )?;
                Self::write_associations(conn, record)?;
            }
            Mutation::Relocate {
                owner,
                from,
                to,
                depth_delta,
            } => {
                // Only rows inside the moved subtree match; each keeps its suffix.
                let rows = conn.execute(
                    r#"
                    UPDATE tree_nodes SET
                        path = ?4 || substr(path, ?5),
                        depth = depth + ?6,
                        modified_at = ?7
                    WHERE tree_kind = ?1 AND owner_id = ?2
                      AND (path = ?3 OR (path > ?3 || '/' AND path < ?3 || '0'))
                    "#,
                    params![
                        owner.tree_kind().as_str(),
                        owner.id_string(),
                        from,
                        to,
                        from.len() as i64 + 1,
                        depth_delta,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                debug!(%owner, from = %from, to = %to, rows, "relocated subtree");
            }
            Mutation::DeleteSubtree { owner, path } => {
                let rows = conn.execute(
                    r#"
                    DELETE FROM tree_nodes
                    WHERE tree_kind = ?1 AND owner_id = ?2
                      AND (path = ?3 OR (path > ?3 || '/' AND path < ?3 || '0'))
                    "#,
                    params![owner.tree_kind().as_str(), owner.id_string(), path],
                )?;
                debug!(%owner, path = %path, rows, "deleted subtree");
            }
        }
        Ok(())
    }

    fn row_to_arc(
        id: String,
        outline_id: String,
        name: String,
        mace_type: String,
        created_at: String,
    ) -> StorageResult<StoryArc> {
        Ok(StoryArc {
            id: parse_id(&id)?,
            outline_id: parse_id(&outline_id)?,
            name,
            mace_type: MaceType::from_str(&mace_type).map_err(StorageError::Corrupt)?,
            created_at: parse_date(&created_at)?,
        })
    }

    fn row_to_instance(
        id: String,
        outline_id: String,
        kind: String,
        label: String,
    ) -> StorageResult<Instance> {
        Ok(Instance {
            id: parse_id(&id)?,
            outline_id: parse_id(&outline_id)?,
            kind: InstanceKind::parse(&kind).ok_or_else(|| {
                StorageError::Corrupt(format!("instance {} has unknown kind '{}'", id, kind))
            })?,
            label,
        })
    }
}

fn parse_id<T>(s: &str) -> StorageResult<T>
where
    T: FromStr<Err = uuid::Error>,
{
    s.parse()
        .map_err(|e| StorageError::Corrupt(format!("invalid id '{}': {}", s, e)))
}

fn parse_date(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(e.to_string()))
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            gate: ReentrantMutex::new(()),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            gate: ReentrantMutex::new(()),
        })
    }
}

impl TreeStore for SqliteStore {
    // === Owner Operations ===

    fn load_outline(&self, id: &OutlineId) -> StorageResult<Option<Outline>> {
        let conn = self.conn()?;
        let row: Option<(String, Option<String>, String)> = conn
            .query_row(
                "SELECT title, description, created_at FROM outlines WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(title, description, created_at)| {
            Ok(Outline {
                id: *id,
                title,
                description,
                created_at: parse_date(&created_at)?,
            })
        })
        .transpose()
    }

    fn list_outlines(&self) -> StorageResult<Vec<Outline>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, created_at FROM outlines ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut outlines = Vec::new();
        for row in rows {
            let (id, title, description, created_at) = row?;
            outlines.push(Outline {
                id: parse_id(&id)?,
                title,
                description,
                created_at: parse_date(&created_at)?,
            });
        }
        Ok(outlines)
    }

    fn load_arc(&self, id: &ArcId) -> StorageResult<Option<StoryArc>> {
        let conn = self.conn()?;
        let row: Option<(String, String, String, String, String)> = conn
            .query_row(
                "SELECT id, outline_id, name, mace_type, created_at FROM arcs WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        match row {
            Some((id, outline_id, name, mace_type, created_at)) => Ok(Some(Self::row_to_arc(
                id, outline_id, name, mace_type, created_at,
            )?)),
            None => Ok(None),
        }
    }

    fn list_arcs(&self, outline_id: &OutlineId) -> StorageResult<Vec<StoryArc>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, outline_id, name, mace_type, created_at FROM arcs
             WHERE outline_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![outline_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut arcs = Vec::new();
        for row in rows {
            let (id, outline_id, name, mace_type, created_at) = row?;
            arcs.push(Self::row_to_arc(id, outline_id, name, mace_type, created_at)?);
        }
        Ok(arcs)
    }

    fn load_instance(&self, id: &InstanceId) -> StorageResult<Option<Instance>> {
        let conn = self.conn()?;
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT id, outline_id, kind, label FROM instances WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            Some((id, outline_id, kind, label)) => {
                Ok(Some(Self::row_to_instance(id, outline_id, kind, label)?))
            }
            None => Ok(None),
        }
    }

    fn list_instances(&self, outline_id: &OutlineId) -> StorageResult<Vec<Instance>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, outline_id, kind, label FROM instances
             WHERE outline_id = ?1 ORDER BY kind, label",
        )?;
        let rows = stmt.query_map(params![outline_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut instances = Vec::new();
        for row in rows {
            let (id, outline_id, kind, label) = row?;
            instances.push(Self::row_to_instance(id, outline_id, kind, label)?);
        }
        Ok(instances)
    }

    // === Node Operations ===

    fn load_node(&self, id: &NodeId) -> StorageResult<Option<NodeRecord>> {
        let mut conn = self.conn()?;
        let params: Vec<Box<dyn ToSql>> = vec![Box::new(id.to_string())];
        Ok(Self::read_nodes(&mut conn, "n.id = ?1", &params)?.pop())
    }

    fn load_node_at(&self, owner: &OwnerRef, path: &str) -> StorageResult<Option<NodeRecord>> {
        let mut conn = self.conn()?;
        let mut params = Self::owner_params(owner);
        params.push(Box::new(path.to_string()));
        Ok(Self::read_nodes(
            &mut conn,
            "n.tree_kind = ?1 AND n.owner_id = ?2 AND n.path = ?3",
            &params,
        )?
        .pop())
    }

    fn load_nodes_at(&self, owner: &OwnerRef, paths: &[String]) -> StorageResult<Vec<NodeRecord>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let mut params = Self::owner_params(owner);
        let placeholders: Vec<String> = (0..paths.len()).map(|i| format!("?{}", i + 3)).collect();
        params.extend(paths.iter().map(|p| Box::new(p.clone()) as Box<dyn ToSql>));
        let filter = format!(
            "n.tree_kind = ?1 AND n.owner_id = ?2 AND n.path IN ({})",
            placeholders.join(", ")
        );
        Self::read_nodes(&mut conn, &filter, &params)
    }

    fn load_children(
        &self,
        owner: &OwnerRef,
        parent_path: Option<&str>,
    ) -> StorageResult<Vec<NodeRecord>> {
        let mut conn = self.conn()?;
        let mut params = Self::owner_params(owner);
        match parent_path {
            None => Self::read_nodes(
                &mut conn,
                "n.tree_kind = ?1 AND n.owner_id = ?2 AND n.depth = 0",
                &params,
            ),
            Some(parent) => {
                params.push(Box::new(parent.to_string()));
                params.push(Box::new(parent.matches('/').count() as i64 + 1));
                Self::read_nodes(
                    &mut conn,
                    "n.tree_kind = ?1 AND n.owner_id = ?2 \
                     AND n.path > ?3 || '/' AND n.path < ?3 || '0' AND n.depth = ?4",
                    &params,
                )
            }
        }
    }

    fn load_subtree(&self, owner: &OwnerRef, path: &str) -> StorageResult<Vec<NodeRecord>> {
        let mut conn = self.conn()?;
        let mut params = Self::owner_params(owner);
        params.push(Box::new(path.to_string()));
        Self::read_nodes(
            &mut conn,
            "n.tree_kind = ?1 AND n.owner_id = ?2 \
             AND (n.path = ?3 OR (n.path > ?3 || '/' AND n.path < ?3 || '0'))",
            &params,
        )
    }

    // === Unit of Work ===

    fn apply(&self, mutations: &[Mutation]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        if conn.is_autocommit() {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for mutation in mutations {
                Self::apply_one(&tx, mutation)?;
            }
            tx.commit()?;
        } else {
            // Joins the exclusive section this thread has open
            let sp = conn.savepoint()?;
            for mutation in mutations {
                Self::apply_one(&sp, mutation)?;
            }
            sp.commit()?;
        }
        Ok(())
    }

    fn exclusive(&self, work: &mut dyn FnMut() -> bool) -> StorageResult<()> {
        let _gate = self.gate.lock();
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        let mut section = OpenSection {
            conn: &self.conn,
            closed: false,
        };

        let commit = work();
        self.conn()?
            .execute_batch(if commit { "COMMIT" } else { "ROLLBACK" })?;
        section.closed = true;
        debug!(commit, "closed exclusive section");
        Ok(())
    }
}
