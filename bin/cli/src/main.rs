// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 Sweep

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sweep_core::Node;
use sweep_storage::{Archive, ArchiveOptions, LoadMode, LoadPlan};
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "sweep")]
#[command(about = "Inspect sweep experiment archives", long_about = None)]
#[command(version)]
struct Cli {
	/// Archive file to inspect
	#[arg(short = 'f', long, env = "SWEEP_ARCHIVE", default_value = "experiment.db")]
	archive: PathBuf,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// List the trajectories in the archive
	List,
	/// Show the tree of one trajectory
	Tree {
		trajectory: String,
		/// Load leaf data and print value reprs
		#[arg(long)]
		values: bool,
	},
	/// Show the runs overview of one trajectory
	Runs {
		trajectory: String,
		/// Only runs with this status (stored, failed, cancelled, ...)
		#[arg(long)]
		status: Option<String>,
	},
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.init();

	if let Err(err) = run(Cli::parse()) {
		eprintln!("error: {}", err);
		std::process::exit(1);
	}
}

fn run(cli: Cli) -> Result<()> {
	let archive = Archive::open(&cli.archive, ArchiveOptions::default())?;

	match cli.command {
		Command::List => {
			for info in archive.list_trajectories()? {
				println!(
					"{}\tlength={}\texpanded={}\t{}",
					info.name,
					info.length,
					info.expanded,
					info.comment.as_deref().unwrap_or("")
				);
			}
		}
		Command::Tree {
			trajectory,
			values,
		} => {
			let mode = if values { LoadMode::Data } else { LoadMode::Skeleton };
			let plan = LoadPlan {
				config: mode,
				parameters: mode,
				derived_parameters: mode,
				results: mode,
			};
			let traj = archive.load_trajectory(&trajectory, &plan)?;
			let tree = traj.tree();
			for id in tree.iter_nodes(tree.root(), true) {
				let node = tree.node(id);
				let depth = node.full_name().matches('.').count();
				let indent = "  ".repeat(depth);
				match node {
					Node::Group(g) => println!("{}{}/", indent, g.name()),
					Node::Parameter(p) => {
						let value = p
							.peek()
							.map(|v| v.short_repr(48))
							.unwrap_or_else(|| "<empty>".to_string());
						let range = p
							.range_len()
							.map(|len| format!(" range[{}]", len))
							.unwrap_or_default();
						println!("{}{} = {}{}", indent, p.name(), value, range);
					}
					Node::Result(r) => {
						println!("{}{} ({} items)", indent, r.name(), r.len());
					}
				}
			}
		}
		Command::Runs {
			trajectory,
			status,
		} => {
			for report in archive.run_reports(&trajectory)? {
				if let Some(filter) = &status {
					if report.status.as_str() != filter {
						continue;
					}
				}
				println!(
					"{:>8}\t{}\t{:.3}s\t{}\t{}",
					report.index,
					report.status.as_str(),
					report.wall_time,
					report.worker,
					report.message.as_deref().unwrap_or("")
				);
			}
		}
	}
	Ok(())
}
