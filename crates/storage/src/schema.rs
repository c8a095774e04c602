// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

//! Archive layout. One SQLite file holds any number of trajectories;
//! every tree node is a row with metadata, payload blobs hang off side
//! tables. Overviews are plain views over the node rows.

/// Stamped on every trajectory row. Archives of other major versions
/// are refused, no migration is attempted.
pub const SCHEMA_VERSION: i64 = 3;

pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS trajectories (
	id INTEGER PRIMARY KEY,
	name TEXT NOT NULL UNIQUE,
	comment TEXT,
	created_at INTEGER NOT NULL,
	length INTEGER NOT NULL DEFAULT 0,
	expanded INTEGER NOT NULL DEFAULT 0,
	schema_version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
	id INTEGER PRIMARY KEY,
	trajectory_id INTEGER NOT NULL REFERENCES trajectories(id) ON DELETE CASCADE,
	full_name TEXT NOT NULL,
	kind TEXT NOT NULL,
	comment TEXT,
	annotations TEXT,
	created_at INTEGER NOT NULL,
	locked INTEGER NOT NULL DEFAULT 0,
	explore_order INTEGER,
	value_repr TEXT,
	compressed INTEGER NOT NULL DEFAULT 0,
	comment_deduped INTEGER NOT NULL DEFAULT 0,
	default_value BLOB,
	range_values BLOB,
	range_indices BLOB,
	UNIQUE (trajectory_id, full_name)
);

CREATE INDEX IF NOT EXISTS nodes_by_prefix ON nodes (trajectory_id, full_name);

CREATE TABLE IF NOT EXISTS node_items (
	node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
	position INTEGER NOT NULL,
	item_name TEXT NOT NULL,
	value BLOB NOT NULL,
	UNIQUE (node_id, item_name)
);

CREATE TABLE IF NOT EXISTS range_pool (
	node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
	slot INTEGER NOT NULL,
	value BLOB NOT NULL,
	UNIQUE (node_id, slot)
);

CREATE TABLE IF NOT EXISTS links (
	trajectory_id INTEGER NOT NULL REFERENCES trajectories(id) ON DELETE CASCADE,
	owner TEXT NOT NULL,
	link_name TEXT NOT NULL,
	target TEXT NOT NULL,
	UNIQUE (trajectory_id, owner, link_name)
);

CREATE TABLE IF NOT EXISTS runs (
	trajectory_id INTEGER NOT NULL REFERENCES trajectories(id) ON DELETE CASCADE,
	run_index INTEGER NOT NULL,
	status TEXT NOT NULL,
	worker TEXT NOT NULL DEFAULT '',
	started_at INTEGER NOT NULL DEFAULT 0,
	finished_at INTEGER NOT NULL DEFAULT 0,
	wall_time REAL NOT NULL DEFAULT 0.0,
	message TEXT,
	UNIQUE (trajectory_id, run_index)
);

CREATE TABLE IF NOT EXISTS name_summary (
	trajectory_id INTEGER NOT NULL REFERENCES trajectories(id) ON DELETE CASCADE,
	branch TEXT NOT NULL,
	short_name TEXT NOT NULL,
	run_index INTEGER NOT NULL,
	comment TEXT,
	UNIQUE (trajectory_id, branch, short_name)
);
";

pub const CREATE_OVERVIEWS: &str = "
CREATE VIEW IF NOT EXISTS overview_parameters AS
	SELECT trajectory_id, full_name, kind, value_repr, comment
	FROM nodes
	WHERE full_name LIKE 'parameters.%' AND kind LIKE '%-parameter';

CREATE VIEW IF NOT EXISTS overview_config AS
	SELECT trajectory_id, full_name, kind, value_repr, comment
	FROM nodes
	WHERE full_name LIKE 'config.%' AND kind LIKE '%-parameter';

CREATE VIEW IF NOT EXISTS overview_explored_parameters AS
	SELECT trajectory_id, full_name, kind, explore_order, value_repr, comment
	FROM nodes
	WHERE explore_order IS NOT NULL;

CREATE VIEW IF NOT EXISTS overview_results_summary AS
	SELECT trajectory_id, short_name, run_index, comment
	FROM name_summary
	WHERE branch = 'results';

CREATE VIEW IF NOT EXISTS overview_derived_parameters_summary AS
	SELECT trajectory_id, short_name, run_index, comment
	FROM name_summary
	WHERE branch = 'derived_parameters';
";
