use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "defloom")]
#[command(about = "Resolve definition sources into one master document")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Load configuration file (KDL)
	#[arg(long, short = 'c', global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Subcommand to execute.
	#[command(subcommand)]
	pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Merge sources, resolve inheritance, apply patches and print the result
	Resolve {
		/// Source files or directories of `*.kdl` files, in load order
		#[arg(required = true, value_name = "PATH")]
		paths: Vec<PathBuf>,

		/// Patch documents applied after inheritance is resolved
		#[arg(long, short = 'p', value_name = "PATH")]
		patches: Vec<PathBuf>,
	},
}
