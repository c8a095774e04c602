// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! The archive: a single SQLite file mapping the trajectory tree to
//! node rows with payload blobs. Append mode is write-once per node;
//! replacing a node takes an explicit overwrite.

use std::{
	path::{Path, PathBuf},
	time::{SystemTime, UNIX_EPOCH},
};

use rusqlite::{Connection, OptionalExtension, params};
use sweep_core::{
	Annotations, Group, Node, NodeKind, NodeRecord, ParamValue, Parameter, ResultLeaf, Trajectory,
	naming::parse_run_name,
};
use tracing::{debug, instrument, warn};

use crate::{
	Error, Result,
	report::{RunReport, RunStatus, TrajectoryInfo},
	schema::{CREATE_OVERVIEWS, CREATE_TABLES, SCHEMA_VERSION},
};

/// How a store call treats nodes already in the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
	/// First store of a trajectory; nodes behave like `Append`.
	Init,
	/// Write-once: an identical re-store is a no-op, a differing one
	/// fails with `StoreConflict`.
	Append,
	/// Replace the node wholesale.
	OverwriteNode,
}

/// Per-branch loading behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LoadMode {
	/// Skip the branch entirely.
	Nothing,
	/// Structure and metadata without payloads.
	Skeleton,
	/// Full payloads; nodes already in memory stay untouched.
	#[default]
	Data,
	/// Full payloads replacing in-memory nodes.
	OverwriteData,
}

impl LoadMode {
	fn with_data(&self) -> bool {
		matches!(self, LoadMode::Data | LoadMode::OverwriteData)
	}
}

/// What to load per reserved branch.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadPlan {
	pub config: LoadMode,
	pub parameters: LoadMode,
	pub derived_parameters: LoadMode,
	pub results: LoadMode,
}

impl LoadPlan {
	pub fn data() -> Self {
		Self::default()
	}

	pub fn skeleton() -> Self {
		Self {
			config: LoadMode::Skeleton,
			parameters: LoadMode::Skeleton,
			derived_parameters: LoadMode::Skeleton,
			results: LoadMode::Skeleton,
		}
	}

	fn for_branch(&self, branch: &str) -> LoadMode {
		match branch {
			"config" => self.config,
			"parameters" => self.parameters,
			"derived_parameters" => self.derived_parameters,
			"results" => self.results,
			_ => LoadMode::Nothing,
		}
	}
}

/// Archive-wide knobs.
#[derive(Clone, Debug)]
pub struct ArchiveOptions {
	/// Deduplicate repeated per-run comments against the name summary.
	pub comment_dedup: bool,
	/// zstd level for payload blobs, 0 disables compression.
	pub compression_level: i32,
	/// Create the overview views.
	pub overviews: bool,
}

impl Default for ArchiveOptions {
	fn default() -> Self {
		Self {
			comment_dedup: true,
			compression_level: 0,
			overviews: true,
		}
	}
}

/// Handle on one archive file. Not thread-safe by itself; the wrappers
/// in this crate make it safe under parallel workers.
pub struct Archive {
	conn: Connection,
	options: ArchiveOptions,
	path: PathBuf,
}

fn now_epoch() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `(branch, key, run index)` of a leaf living under a per-run subtree.
fn run_leaf_key(full_name: &str) -> Option<(String, String, usize)> {
	let segments: Vec<&str> = full_name.split('.').collect();
	let position = segments.iter().position(|s| parse_run_name(s).is_some())?;
	let index = parse_run_name(segments[position])?;
	let key = segments[position + 1..].join(".");
	if key.is_empty() {
		return None;
	}
	Some((segments[0].to_string(), key, index))
}

impl Archive {
	#[instrument(level = "debug", skip(options))]
	pub fn open(path: &Path, options: ArchiveOptions) -> Result<Self> {
		let conn = Connection::open(path)?;
		Self::prepare(conn, options, path.to_path_buf())
	}

	/// In-memory archive, test support.
	pub fn in_memory(options: ArchiveOptions) -> Result<Self> {
		let conn = Connection::open_in_memory()?;
		Self::prepare(conn, options, PathBuf::from(":memory:"))
	}

	fn prepare(conn: Connection, options: ArchiveOptions, path: PathBuf) -> Result<Self> {
		conn.pragma_update(None, "journal_mode", "WAL").ok();
		conn.pragma_update(None, "synchronous", "NORMAL")?;
		conn.pragma_update(None, "foreign_keys", "ON")?;
		conn.busy_timeout(std::time::Duration::from_secs(30))?;
		conn.execute_batch(CREATE_TABLES)?;
		if options.overviews {
			conn.execute_batch(CREATE_OVERVIEWS)?;
		}
		Ok(Self {
			conn,
			options,
			path,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn options(&self) -> &ArchiveOptions {
		&self.options
	}

	// --- payload codec -----------------------------------------------

	fn encode(&self, value: &ParamValue) -> Result<(Vec<u8>, bool)> {
		let raw = postcard::to_stdvec(value)?;
		self.maybe_compress(raw)
	}

	fn encode_many(&self, values: &[ParamValue]) -> Result<(Vec<u8>, bool)> {
		let raw = postcard::to_stdvec(values)?;
		self.maybe_compress(raw)
	}

	fn maybe_compress(&self, raw: Vec<u8>) -> Result<(Vec<u8>, bool)> {
		if self.options.compression_level > 0 {
			let packed = zstd::encode_all(raw.as_slice(), self.options.compression_level)?;
			Ok((packed, true))
		} else {
			Ok((raw, false))
		}
	}

	fn decode(blob: &[u8], compressed: bool) -> Result<ParamValue> {
		if compressed {
			let raw = zstd::decode_all(blob)?;
			Ok(postcard::from_bytes(&raw)?)
		} else {
			Ok(postcard::from_bytes(blob)?)
		}
	}

	fn decode_many(blob: &[u8], compressed: bool) -> Result<Vec<ParamValue>> {
		if compressed {
			let raw = zstd::decode_all(blob)?;
			Ok(postcard::from_bytes(&raw)?)
		} else {
			Ok(postcard::from_bytes(blob)?)
		}
	}

	// --- trajectory rows ---------------------------------------------

	pub fn trajectory_id(&self, name: &str) -> Result<i64> {
		self.find_trajectory_id(name)?.ok_or_else(|| Error::UnknownTrajectory {
			name: name.to_string(),
		})
	}

	fn find_trajectory_id(&self, name: &str) -> Result<Option<i64>> {
		let row = self
			.conn
			.query_row(
				"SELECT id, schema_version FROM trajectories WHERE name = ?1",
				params![name],
				|row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
			)
			.optional()?;
		match row {
			Some((id, version)) if version == SCHEMA_VERSION => Ok(Some(id)),
			Some((_, version)) => Err(Error::SchemaVersion {
				found: version,
				expected: SCHEMA_VERSION,
			}),
			None => Ok(None),
		}
	}

	fn upsert_trajectory(&self, traj: &Trajectory) -> Result<i64> {
		if let Some(id) = self.find_trajectory_id(traj.name())? {
			self.conn.execute(
				"UPDATE trajectories SET comment = ?2, length = ?3, expanded = ?4 WHERE id = ?1",
				params![id, traj.comment(), traj.length() as i64, traj.was_expanded() as i64],
			)?;
			return Ok(id);
		}
		self.conn.execute(
			"INSERT INTO trajectories (name, comment, created_at, length, expanded, schema_version)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
			params![
				traj.name(),
				traj.comment(),
				traj.created_at() as i64,
				traj.length() as i64,
				traj.was_expanded() as i64,
				SCHEMA_VERSION
			],
		)?;
		Ok(self.conn.last_insert_rowid())
	}

	// --- storing -----------------------------------------------------

	/// Persist the full tree skeleton and every non-empty leaf.
	#[instrument(level = "debug", skip(self, traj), fields(trajectory = %traj.name()))]
	pub fn store_trajectory(&mut self, traj: &Trajectory, mode: StoreMode) -> Result<()> {
		let tid = self.upsert_trajectory(traj)?;
		let explored: Vec<String> = traj.explored_names().to_vec();
		let tree = traj.tree();

		let tx_guard = self.conn.unchecked_transaction()?;
		for id in tree.iter_nodes(tree.root(), true) {
			let node = tree.node(id);
			let explore_order =
				explored.iter().position(|name| name == node.full_name());
			let record = NodeRecord {
				node: node.clone(),
				annotations: tree.annotations(id).cloned(),
			};
			self.store_record_inner(tid, &record, explore_order, mode)?;
		}
		for (owner, link_name, target) in tree.all_links() {
			tx_guard.execute(
				"INSERT OR IGNORE INTO links (trajectory_id, owner, link_name, target)
				 VALUES (?1, ?2, ?3, ?4)",
				params![tid, owner, link_name, target],
			)?;
		}
		tx_guard.commit()?;
		debug!("trajectory stored");
		Ok(())
	}

	/// Persist a batch of leaf records, creating missing ancestor group
	/// rows. The wrapper endpoints funnel per-run subtrees through here.
	pub fn store_records(&mut self, trajectory: &str, records: &[NodeRecord], mode: StoreMode) -> Result<()> {
		let tid = self.trajectory_id(trajectory)?;
		let tx_guard = self.conn.unchecked_transaction()?;
		for record in records {
			self.ensure_ancestors(tid, record.node.full_name())?;
			self.store_record_inner(tid, record, None, mode)?;
		}
		tx_guard.commit()?;
		Ok(())
	}

	/// Targeted single-item store.
	pub fn store_item(&mut self, trajectory: &str, record: &NodeRecord, mode: StoreMode) -> Result<()> {
		self.store_records(trajectory, std::slice::from_ref(record), mode)
	}

	fn ensure_ancestors(&self, tid: i64, full_name: &str) -> Result<()> {
		let mut prefix = String::new();
		let segments: Vec<&str> = full_name.split('.').collect();
		for segment in &segments[..segments.len().saturating_sub(1)] {
			if !prefix.is_empty() {
				prefix.push('.');
			}
			prefix.push_str(segment);
			self.conn.execute(
				"INSERT OR IGNORE INTO nodes (trajectory_id, full_name, kind, created_at)
				 VALUES (?1, ?2, 'group', ?3)",
				params![tid, prefix, now_epoch() as i64],
			)?;
		}
		Ok(())
	}

	fn store_record_inner(
		&self,
		tid: i64,
		record: &NodeRecord,
		explore_order: Option<usize>,
		mode: StoreMode,
	) -> Result<()> {
		let node = &record.node;
		let full_name = node.full_name();

		let existing: Option<i64> = self
			.conn
			.query_row(
				"SELECT id FROM nodes WHERE trajectory_id = ?1 AND full_name = ?2",
				params![tid, full_name],
				|row| row.get(0),
			)
			.optional()?;

		if let Some(node_id) = existing {
			match mode {
				StoreMode::OverwriteNode => {
					self.conn.execute("DELETE FROM nodes WHERE id = ?1", params![node_id])?;
				}
				StoreMode::Init | StoreMode::Append => {
					// Idempotent re-store: equal payload is a no-op,
					// metadata fills in where it was missing.
					let stored = self.load_record(node_id, true)?;
					if payload_equal(&stored.node, node) {
						self.merge_metadata(node_id, record, explore_order)?;
						return Ok(());
					}
					return Err(Error::StoreConflict {
						path: full_name.to_string(),
					});
				}
			}
		}

		self.insert_record(tid, record, explore_order)
	}

	fn merge_metadata(&self, node_id: i64, record: &NodeRecord, explore_order: Option<usize>) -> Result<()> {
		if let Some(comment) = record.node.comment() {
			self.conn.execute(
				"UPDATE nodes SET comment = ?2 WHERE id = ?1 AND comment IS NULL",
				params![node_id, comment],
			)?;
		}
		if let Some(annotations) = &record.annotations {
			if !annotations.is_empty() {
				self.conn.execute(
					"UPDATE nodes SET annotations = ?2 WHERE id = ?1 AND annotations IS NULL",
					params![node_id, serde_json::to_string(annotations)?],
				)?;
			}
		}
		if let Some(order) = explore_order {
			self.conn.execute(
				"UPDATE nodes SET explore_order = ?2 WHERE id = ?1",
				params![node_id, order as i64],
			)?;
		}
		Ok(())
	}

	fn insert_record(&self, tid: i64, record: &NodeRecord, explore_order: Option<usize>) -> Result<()> {
		let node = &record.node;
		let full_name = node.full_name();
		let kind = node.kind();

		// Every per-run leaf keeps the name summary current: one row
		// per name, pointing at the lowest-index run that produced it.
		// Comment dedup layers on top of the summary and only decides
		// whether this node keeps its comment or omits it.
		let mut comment = node.comment().map(str::to_string);
		let mut comment_deduped = false;
		if kind.is_leaf() {
			if let Some((branch, key, index)) = run_leaf_key(full_name) {
				let (kept, deduped) =
					self.update_name_summary(tid, &branch, &key, index, comment)?;
				comment = kept;
				comment_deduped = deduped;
			}
		}

		let annotations_json = match &record.annotations {
			Some(annotations) if !annotations.is_empty() => {
				for key in annotations.oversized() {
					warn!(node = full_name, key, "annotation exceeds soft size cap");
				}
				Some(serde_json::to_string(annotations)?)
			}
			_ => None,
		};

		let mut locked = false;
		let mut value_repr: Option<String> = None;
		let mut compressed = false;
		let mut default_blob: Option<Vec<u8>> = None;
		let mut range_blob: Option<Vec<u8>> = None;
		let mut range_indices_blob: Option<Vec<u8>> = None;
		let mut pool: Vec<(u32, Vec<u8>)> = Vec::new();
		let mut items: Vec<(usize, String, Vec<u8>)> = Vec::new();

		match node {
			Node::Group(_) => {}
			Node::Parameter(p) => {
				locked = p.is_locked();
				if let Some(value) = p.peek() {
					value_repr = Some(value.short_repr(64));
					let (blob, packed) = self.encode(value)?;
					compressed = packed;
					default_blob = Some(blob);
				}
				if let Some(range) = p.range() {
					if kind == NodeKind::ArrayParameter {
						// Array ranges are stored as a unique pool plus
						// an index sequence.
						let (unique, indices) = Parameter::encode_range(range);
						for (slot, value) in unique.iter().enumerate() {
							let (blob, packed) = self.encode(value)?;
							compressed = packed;
							pool.push((slot as u32, blob));
						}
						let raw = postcard::to_stdvec(&indices)?;
						let (blob, packed) = self.maybe_compress(raw)?;
						compressed = packed;
						range_indices_blob = Some(blob);
					} else {
						let (blob, packed) = self.encode_many(range)?;
						compressed = packed;
						range_blob = Some(blob);
					}
				}
			}
			Node::Result(r) => {
				if let Some((_, value)) = r.items().next() {
					value_repr = Some(value.short_repr(64));
				}
				for (position, (item_name, value)) in r.items().enumerate() {
					let (blob, packed) = self.encode(value)?;
					compressed = packed;
					items.push((position, item_name.to_string(), blob));
				}
			}
		}

		self.conn.execute(
			"INSERT INTO nodes (trajectory_id, full_name, kind, comment, annotations, created_at,
			                    locked, explore_order, value_repr, compressed, comment_deduped,
			                    default_value, range_values, range_indices)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
			params![
				tid,
				full_name,
				kind.as_str(),
				comment,
				annotations_json,
				now_epoch() as i64,
				locked as i64,
				explore_order.map(|o| o as i64),
				value_repr,
				compressed as i64,
				comment_deduped as i64,
				default_blob,
				range_blob,
				range_indices_blob
			],
		)?;
		let node_id = self.conn.last_insert_rowid();

		for (slot, blob) in pool {
			self.conn.execute(
				"INSERT INTO range_pool (node_id, slot, value) VALUES (?1, ?2, ?3)",
				params![node_id, slot, blob],
			)?;
		}
		for (position, item_name, blob) in items {
			self.conn.execute(
				"INSERT INTO node_items (node_id, position, item_name, value) VALUES (?1, ?2, ?3, ?4)",
				params![node_id, position as i64, item_name, blob],
			)?;
		}
		Ok(())
	}

	/// Maintain the per-name summary row (lowest run index, first
	/// stored comment) and decide what this node keeps:
	/// `(comment to store, omitted-by-dedup flag)`.
	fn update_name_summary(
		&self,
		tid: i64,
		branch: &str,
		key: &str,
		index: usize,
		comment: Option<String>,
	) -> Result<(Option<String>, bool)> {
		let stored: Option<(i64, Option<String>)> = self
			.conn
			.query_row(
				"SELECT run_index, comment FROM name_summary
				 WHERE trajectory_id = ?1 AND branch = ?2 AND short_name = ?3",
				params![tid, branch, key],
				|row| Ok((row.get(0)?, row.get(1)?)),
			)
			.optional()?;

		let Some((first_index, first_comment)) = stored else {
			self.conn.execute(
				"INSERT INTO name_summary (trajectory_id, branch, short_name, run_index, comment)
				 VALUES (?1, ?2, ?3, ?4, ?5)",
				params![tid, branch, key, index as i64, comment],
			)?;
			return Ok((comment, false));
		};

		// Completion order is not index order; the summary tracks the
		// lowest index that produced the name.
		if (index as i64) < first_index {
			self.conn.execute(
				"UPDATE name_summary SET run_index = ?4
				 WHERE trajectory_id = ?1 AND branch = ?2 AND short_name = ?3",
				params![tid, branch, key, index as i64],
			)?;
		}

		match (first_comment, comment) {
			// First comment ever seen for this name becomes the
			// summary comment.
			(None, Some(own)) => {
				self.conn.execute(
					"UPDATE name_summary SET comment = ?4
					 WHERE trajectory_id = ?1 AND branch = ?2 AND short_name = ?3",
					params![tid, branch, key, own],
				)?;
				Ok((Some(own), false))
			}
			// A repeat of the recorded comment is omitted from the
			// node when dedup is on.
			(Some(first), Some(own)) if first == own && self.options.comment_dedup => {
				Ok((None, true))
			}
			(_, own) => Ok((own, false)),
		}
	}

	// --- loading -----------------------------------------------------

	/// Rebuild a trajectory per the load plan.
	#[instrument(level = "debug", skip(self, plan))]
	pub fn load_trajectory(&self, name: &str, plan: &LoadPlan) -> Result<Trajectory> {
		let tid = self.trajectory_id(name)?;
		let (comment, created_at, length, expanded): (Option<String>, i64, i64, i64) =
			self.conn.query_row(
				"SELECT comment, created_at, length, expanded FROM trajectories WHERE id = ?1",
				params![tid],
				|row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
			)?;

		let mut traj = Trajectory::new(name);
		if let Some(comment) = comment {
			traj.set_comment(comment);
		}
		traj.restore_metadata(created_at as u64, length as usize, expanded != 0);

		for branch in ["config", "parameters", "derived_parameters", "results"] {
			let mode = plan.for_branch(branch);
			if mode == LoadMode::Nothing {
				continue;
			}
			let records = self.load_prefix(tid, branch, mode.with_data())?;
			traj.splice(records, mode == LoadMode::OverwriteData)?;
		}

		let mut stmt = self.conn.prepare(
			"SELECT full_name FROM nodes
			 WHERE trajectory_id = ?1 AND explore_order IS NOT NULL
			 ORDER BY explore_order",
		)?;
		let explored: Vec<String> = stmt
			.query_map(params![tid], |row| row.get::<_, String>(0))?
			.collect::<std::result::Result<_, _>>()?;
		let present: Vec<String> =
			explored.into_iter().filter(|name| traj.tree().contains(name)).collect();
		traj.restore_explored(present);

		let mut stmt = self.conn.prepare(
			"SELECT owner, link_name, target FROM links WHERE trajectory_id = ?1",
		)?;
		let links: Vec<(String, String, String)> = stmt
			.query_map(params![tid], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
			.collect::<std::result::Result<_, _>>()?;
		for (owner, link_name, target) in links {
			if traj.tree().contains(&target) {
				traj.restore_link(&owner, &link_name, &target)?;
			}
		}

		Ok(traj)
	}

	/// Load the subtree at `path` (the node itself plus everything
	/// below it).
	pub fn load_subtree(&self, trajectory: &str, path: &str, with_data: bool) -> Result<Vec<NodeRecord>> {
		let tid = self.trajectory_id(trajectory)?;
		let mut records = self.load_rows(
			tid,
			"SELECT id, full_name, kind, comment, annotations, locked, compressed,
			        comment_deduped, default_value, range_values, range_indices
			 FROM nodes
			 WHERE trajectory_id = ?1 AND (full_name = ?2 OR full_name LIKE ?2 || '.%')",
			params![tid, path],
			with_data,
		)?;
		// Natural naming may hand us a suffix path; fall back to a
		// terminal-name match so auto-loading works for short names.
		if records.is_empty() && !path.contains('.') {
			records = self.load_rows(
				tid,
				"SELECT id, full_name, kind, comment, annotations, locked, compressed,
				        comment_deduped, default_value, range_values, range_indices
				 FROM nodes
				 WHERE trajectory_id = ?1
				   AND (full_name LIKE '%.' || ?2 OR full_name LIKE '%.' || ?2 || '.%')",
				params![tid, path],
				with_data,
			)?;
		}
		Ok(records)
	}

	fn load_prefix(&self, tid: i64, branch: &str, with_data: bool) -> Result<Vec<NodeRecord>> {
		self.load_rows(
			tid,
			"SELECT id, full_name, kind, comment, annotations, locked, compressed,
			        comment_deduped, default_value, range_values, range_indices
			 FROM nodes
			 WHERE trajectory_id = ?1 AND (full_name = ?2 OR full_name LIKE ?2 || '.%')",
			params![tid, branch],
			with_data,
		)
	}

	fn load_rows(
		&self,
		tid: i64,
		sql: &str,
		args: impl rusqlite::Params,
		with_data: bool,
	) -> Result<Vec<NodeRecord>> {
		struct Row {
			id: i64,
			full_name: String,
			kind: String,
			comment: Option<String>,
			annotations: Option<String>,
			locked: bool,
			compressed: bool,
			comment_deduped: bool,
			default_value: Option<Vec<u8>>,
			range_values: Option<Vec<u8>>,
			range_indices: Option<Vec<u8>>,
		}

		let mut stmt = self.conn.prepare(sql)?;
		let rows: Vec<Row> = stmt
			.query_map(args, |row| {
				Ok(Row {
					id: row.get(0)?,
					full_name: row.get(1)?,
					kind: row.get(2)?,
					comment: row.get(3)?,
					annotations: row.get(4)?,
					locked: row.get::<_, i64>(5)? != 0,
					compressed: row.get::<_, i64>(6)? != 0,
					comment_deduped: row.get::<_, i64>(7)? != 0,
					default_value: row.get(8)?,
					range_values: row.get(9)?,
					range_indices: row.get(10)?,
				})
			})?
			.collect::<std::result::Result<_, _>>()?;

		let mut records = Vec::with_capacity(rows.len());
		for row in rows {
			records.push(self.build_record(
				tid,
				row.id,
				&row.full_name,
				&row.kind,
				row.comment,
				row.annotations,
				row.locked,
				row.compressed,
				row.comment_deduped,
				row.default_value,
				row.range_values,
				row.range_indices,
				with_data,
			)?);
		}
		Ok(records)
	}

	fn load_record(&self, node_id: i64, with_data: bool) -> Result<NodeRecord> {
		self.conn
			.query_row(
				"SELECT trajectory_id, full_name, kind, comment, annotations, locked, compressed,
				        comment_deduped, default_value, range_values, range_indices
				 FROM nodes WHERE id = ?1",
				params![node_id],
				|row| {
					Ok((
						row.get::<_, i64>(0)?,
						row.get::<_, String>(1)?,
						row.get::<_, String>(2)?,
						row.get::<_, Option<String>>(3)?,
						row.get::<_, Option<String>>(4)?,
						row.get::<_, i64>(5)? != 0,
						row.get::<_, i64>(6)? != 0,
						row.get::<_, i64>(7)? != 0,
						row.get::<_, Option<Vec<u8>>>(8)?,
						row.get::<_, Option<Vec<u8>>>(9)?,
						row.get::<_, Option<Vec<u8>>>(10)?,
					))
				},
			)
			.map_err(Error::from)
			.and_then(
				|(tid, full_name, kind, comment, annotations, locked, compressed, deduped, d, rv, ri)| {
					self.build_record(
						tid, node_id, &full_name, &kind, comment, annotations, locked,
						compressed, deduped, d, rv, ri, with_data,
					)
				},
			)
	}

	#[allow(clippy::too_many_arguments)]
	fn build_record(
		&self,
		tid: i64,
		node_id: i64,
		full_name: &str,
		kind: &str,
		mut comment: Option<String>,
		annotations: Option<String>,
		locked: bool,
		compressed: bool,
		comment_deduped: bool,
		default_value: Option<Vec<u8>>,
		range_values: Option<Vec<u8>>,
		range_indices: Option<Vec<u8>>,
		with_data: bool,
	) -> Result<NodeRecord> {
		let kind = NodeKind::parse(kind).unwrap_or(NodeKind::Group);
		let short_name = full_name.rsplit('.').next().unwrap_or(full_name).to_string();

		// A comment omitted by dedup resolves to the comment of the
		// lowest-index occurrence; a leaf that never had one stays
		// uncommented.
		if comment.is_none() && comment_deduped {
			if let Some((branch, key, _)) = run_leaf_key(full_name) {
				comment = self
					.conn
					.query_row(
						"SELECT comment FROM name_summary
						 WHERE trajectory_id = ?1 AND branch = ?2 AND short_name = ?3",
						params![tid, branch, key],
						|row| row.get(0),
					)
					.optional()?
					.flatten();
			}
		}

		let annotations: Option<Annotations> = match annotations {
			Some(json) => Some(serde_json::from_str(&json)?),
			None => None,
		};

		let node = match kind {
			NodeKind::Group | NodeKind::Link => {
				Node::Group(Group::restored(full_name, comment))
			}
			NodeKind::Result => {
				let mut leaf = ResultLeaf::new();
				leaf.assign_names(short_name, full_name.to_string());
				if let Some(comment) = comment {
					leaf.set_comment(comment);
				}
				if with_data {
					let mut stmt = self.conn.prepare(
						"SELECT item_name, value FROM node_items
						 WHERE node_id = ?1 ORDER BY position",
					)?;
					let items: Vec<(String, Vec<u8>)> = stmt
						.query_map(params![node_id], |row| {
							Ok((row.get(0)?, row.get(1)?))
						})?
						.collect::<std::result::Result<_, _>>()?;
					for (item_name, blob) in items {
						leaf.push_named(item_name, Self::decode(&blob, compressed)?)?;
					}
				}
				Node::Result(leaf)
			}
			NodeKind::ScalarParameter | NodeKind::ArrayParameter | NodeKind::PickleParameter => {
				let mut leaf = match kind {
					NodeKind::ScalarParameter => Parameter::scalar(),
					NodeKind::ArrayParameter => Parameter::array(),
					_ => Parameter::pickle(),
				};
				leaf.assign_names(short_name, full_name.to_string());
				if let Some(comment) = comment {
					leaf.set_comment(comment);
				}
				if with_data {
					if let Some(blob) = default_value {
						leaf.set(Self::decode(&blob, compressed)?)?;
					}
					if let Some(blob) = range_values {
						leaf.set_range(Self::decode_many(&blob, compressed)?)?;
					} else if let Some(blob) = range_indices {
						let indices: Vec<u32> = if compressed {
							postcard::from_bytes(&zstd::decode_all(blob.as_slice())?)?
						} else {
							postcard::from_bytes(&blob)?
						};
						let mut stmt = self.conn.prepare(
							"SELECT value FROM range_pool
							 WHERE node_id = ?1 ORDER BY slot",
						)?;
						let pool_blobs: Vec<Vec<u8>> = stmt
							.query_map(params![node_id], |row| row.get(0))?
							.collect::<std::result::Result<_, _>>()?;
						let mut pool = Vec::with_capacity(pool_blobs.len());
						for blob in pool_blobs {
							pool.push(Self::decode(&blob, compressed)?);
						}
						leaf.set_range(Parameter::decode_range(&pool, &indices)?)?;
					}
					if locked {
						leaf.lock();
					}
				}
				Node::Parameter(leaf)
			}
		};

		Ok(NodeRecord {
			node,
			annotations,
		})
	}

	// --- deletion ----------------------------------------------------

	/// Delete a node and its subtree from the archive. Cascades clean
	/// the side tables; SQLite reuses the freed pages.
	pub fn delete_item(&mut self, trajectory: &str, path: &str) -> Result<usize> {
		let tid = self.trajectory_id(trajectory)?;
		let removed = self.conn.execute(
			"DELETE FROM nodes
			 WHERE trajectory_id = ?1 AND (full_name = ?2 OR full_name LIKE ?2 || '.%')",
			params![tid, path],
		)?;
		self.conn.execute(
			"DELETE FROM links
			 WHERE trajectory_id = ?1
			   AND (owner = ?2 OR owner LIKE ?2 || '.%' OR target = ?2 OR target LIKE ?2 || '.%')",
			params![tid, path],
		)?;
		Ok(removed)
	}

	// --- runs overview -----------------------------------------------

	pub fn store_run_report(&mut self, trajectory: &str, report: &RunReport) -> Result<()> {
		let tid = self.trajectory_id(trajectory)?;
		self.conn.execute(
			"INSERT INTO runs (trajectory_id, run_index, status, worker, started_at, finished_at,
			                   wall_time, message)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
			 ON CONFLICT (trajectory_id, run_index) DO UPDATE SET
			   status = excluded.status,
			   worker = excluded.worker,
			   started_at = excluded.started_at,
			   finished_at = excluded.finished_at,
			   wall_time = excluded.wall_time,
			   message = excluded.message",
			params![
				tid,
				report.index as i64,
				report.status.as_str(),
				report.worker,
				report.started_at as i64,
				report.finished_at as i64,
				report.wall_time,
				report.message
			],
		)?;
		Ok(())
	}

	pub fn run_reports(&self, trajectory: &str) -> Result<Vec<RunReport>> {
		let tid = self.trajectory_id(trajectory)?;
		let mut stmt = self.conn.prepare(
			"SELECT run_index, status, worker, started_at, finished_at, wall_time, message
			 FROM runs WHERE trajectory_id = ?1 ORDER BY run_index",
		)?;
		let reports = stmt
			.query_map(params![tid], |row| {
				Ok(RunReport {
					index: row.get::<_, i64>(0)? as usize,
					status: RunStatus::parse(&row.get::<_, String>(1)?)
						.unwrap_or(RunStatus::Failed),
					worker: row.get(2)?,
					started_at: row.get::<_, i64>(3)? as u64,
					finished_at: row.get::<_, i64>(4)? as u64,
					wall_time: row.get(5)?,
					message: row.get(6)?,
				})
			})?
			.collect::<std::result::Result<_, _>>()?;
		Ok(reports)
	}

	/// Indices whose runs reached `Stored`; the resume path starts from
	/// the lowest index missing here.
	pub fn stored_indices(&self, trajectory: &str) -> Result<Vec<usize>> {
		let tid = self.trajectory_id(trajectory)?;
		let mut stmt = self.conn.prepare(
			"SELECT run_index FROM runs
			 WHERE trajectory_id = ?1 AND status = 'stored' ORDER BY run_index",
		)?;
		let indices = stmt
			.query_map(params![tid], |row| Ok(row.get::<_, i64>(0)? as usize))?
			.collect::<std::result::Result<_, _>>()?;
		Ok(indices)
	}

	// --- info --------------------------------------------------------

	pub fn list_trajectories(&self) -> Result<Vec<TrajectoryInfo>> {
		let mut stmt = self.conn.prepare(
			"SELECT name, comment, created_at, length, expanded
			 FROM trajectories ORDER BY created_at",
		)?;
		let infos = stmt
			.query_map([], |row| {
				Ok(TrajectoryInfo {
					name: row.get(0)?,
					comment: row.get(1)?,
					created_at: row.get::<_, i64>(2)? as u64,
					length: row.get::<_, i64>(3)? as usize,
					expanded: row.get::<_, i64>(4)? != 0,
				})
			})?
			.collect::<std::result::Result<_, _>>()?;
		Ok(infos)
	}

	/// Flush and settle the archive: final trajectory row update plus a
	/// WAL checkpoint.
	pub fn finalize(&mut self, traj: &Trajectory) -> Result<()> {
		self.upsert_trajectory(traj)?;
		self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);").ok();
		Ok(())
	}
}

/// Data-only equality: names and payloads, ignoring comments and lock
/// state so an idempotent re-store under dedup stays a no-op.
fn payload_equal(a: &Node, b: &Node) -> bool {
	match (a, b) {
		(Node::Group(_), Node::Group(_)) => true,
		(Node::Parameter(x), Node::Parameter(y)) => {
			x.full_name() == y.full_name()
				&& x.variant() == y.variant()
				&& x.peek() == y.peek()
				&& x.range() == y.range()
		}
		(Node::Result(x), Node::Result(y)) => {
			x.full_name() == y.full_name() && x.items().eq(y.items())
		}
		_ => false,
	}
}
